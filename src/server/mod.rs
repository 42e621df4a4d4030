//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::engine::ImpactEngine;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Analysis engine owning the dependency graph.
    pub engine: Arc<ImpactEngine>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, engine: Arc<ImpactEngine>) -> Self {
        tracing::info!(
            backend = ?config.database.backend,
            forecasting = config.forecasting.base_url.is_some(),
            evidence_endpoints = config.discovery.evidence_endpoints.len(),
            "AppState initialized"
        );
        Self { config, engine }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;

    fn create_test_state() -> SharedState {
        let config = Config::default();
        let engine = ImpactEngine::new(config.clone(), Arc::new(GraphStore::new()));
        Arc::new(AppState::new(config, Arc::new(engine)))
    }

    #[test]
    fn test_app_state_clone_shares_engine() {
        let state = create_test_state();
        let cloned = (*state).clone();
        assert!(Arc::ptr_eq(&state.engine, &cloned.engine));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected() {
        let state = create_test_state();
        let err = handle_tool_call(&state, "cascade_simulate", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::McpError::UnknownTool { ref tool_name } if tool_name == "cascade_simulate"
        ));
    }

    #[tokio::test]
    async fn test_tool_round_trip_through_state() {
        let state = create_test_state();

        handle_tool_call(
            &state,
            "cascade_add_dependency",
            Some(serde_json::json!({ "from": "db", "to": "api", "kind": "synchronous" })),
        )
        .await
        .unwrap();

        let graph = handle_tool_call(&state, "cascade_get_graph", None)
            .await
            .unwrap();
        assert_eq!(graph["graph"]["edges"].as_array().map(Vec::len), Some(1));
        assert_eq!(graph["version"], 1);
    }
}
