use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SharedState;
use crate::analysis::{Severity, TriggerEvent};
use crate::discovery::{CandidateEdge, ManifestService};
use crate::error::{McpError, McpResult};
use crate::graph::{HealthStatus, ServiceHealth, ServiceNode};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        // Analysis
        "cascade_analyze_impact" => handle_analyze_impact(state, arguments).await,
        "cascade_get_analysis" => handle_get_analysis(state, arguments).await,
        "cascade_dependency_health" => handle_dependency_health(state, arguments).await,
        // Graph maintenance
        "cascade_discover_dependencies" => handle_discover(state, arguments).await,
        "cascade_add_service" => handle_add_service(state, arguments).await,
        "cascade_remove_service" => handle_remove_service(state, arguments).await,
        "cascade_add_dependency" => handle_add_dependency(state, arguments).await,
        "cascade_update_health" => handle_update_health(state, arguments).await,
        "cascade_get_graph" => handle_get_graph(state).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceIdParams {
    pub service_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeImpactParams {
    pub service_id: String,
    #[serde(default)]
    pub event_type: TriggerEvent,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::High
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetAnalysisParams {
    pub analysis_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthReading {
    pub status: HealthStatus,
    pub score: f64,
}

impl From<HealthReading> for ServiceHealth {
    fn from(reading: HealthReading) -> Self {
        ServiceHealth::new(reading.status, reading.score)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddServiceParams {
    #[serde(flatten)]
    pub service: ManifestService,
    #[serde(default)]
    pub health: Option<HealthReading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateHealthParams {
    pub service_id: String,
    pub status: HealthStatus,
    pub score: f64,
}

#[derive(Debug, Serialize)]
struct Acknowledgement<'a, T: Serialize> {
    service_id: &'a str,
    outcome: T,
}

// ============================================================================
// Analysis handlers
// ============================================================================

async fn handle_analyze_impact(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: AnalyzeImpactParams = parse_arguments("cascade_analyze_impact", arguments)?;

    let result = state
        .engine
        .analyze_service_impact(&params.service_id, params.event_type, params.severity)
        .await
        .map_err(execution_failed)?;

    serde_json::to_value(result.as_ref()).map_err(McpError::Json)
}

async fn handle_get_analysis(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: GetAnalysisParams = parse_arguments("cascade_get_analysis", arguments)?;

    let result = state
        .engine
        .get_analysis(&params.analysis_id)
        .ok_or_else(|| McpError::ExecutionFailed {
            message: format!("Analysis not found or expired: {}", params.analysis_id),
        })?;

    serde_json::to_value(result.as_ref()).map_err(McpError::Json)
}

async fn handle_dependency_health(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "cascade_dependency_health",
        arguments,
        |params: ServiceIdParams| async move {
            state
                .engine
                .get_service_dependency_health(&params.service_id)
                .await
        },
    )
    .await
}

// ============================================================================
// Graph maintenance handlers
// ============================================================================

async fn handle_discover(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "cascade_discover_dependencies",
        arguments,
        |params: ServiceIdParams| async move {
            state
                .engine
                .discover_service_dependencies(&params.service_id)
                .await
        },
    )
    .await
}

async fn handle_add_service(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: AddServiceParams = parse_arguments("cascade_add_service", arguments)?;

    let mut node = ServiceNode::from(params.service);
    if let Some(health) = params.health {
        node = node.with_health(health.into());
    }
    let service_id = node.id.clone();

    let outcome = state.engine.add_service(node).await.map_err(execution_failed)?;

    serde_json::to_value(Acknowledgement {
        service_id: &service_id,
        outcome,
    })
    .map_err(McpError::Json)
}

async fn handle_remove_service(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "cascade_remove_service",
        arguments,
        |params: ServiceIdParams| async move {
            state.engine.remove_service(&params.service_id).await
        },
    )
    .await
}

async fn handle_add_dependency(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let candidate: CandidateEdge = parse_arguments("cascade_add_dependency", arguments)?;
    let edge = candidate.into_dependency("manual");
    let (from, to) = (edge.from.clone(), edge.to.clone());

    let outcome = state
        .engine
        .add_dependency(edge)
        .await
        .map_err(execution_failed)?;

    Ok(json!({ "from": from, "to": to, "outcome": outcome }))
}

async fn handle_update_health(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: UpdateHealthParams = parse_arguments("cascade_update_health", arguments)?;

    state
        .engine
        .update_service_health(
            &params.service_id,
            ServiceHealth::new(params.status, params.score),
        )
        .await
        .map_err(execution_failed)?;

    serde_json::to_value(Acknowledgement {
        service_id: &params.service_id,
        outcome: "updated",
    })
    .map_err(McpError::Json)
}

async fn handle_get_graph(state: &SharedState) -> McpResult<Value> {
    let snapshot = state.engine.get_dependency_graph().await;
    serde_json::to_value(snapshot.as_ref()).map_err(McpError::Json)
}

// ============================================================================
// Helper functions
// ============================================================================

fn execution_failed(e: impl std::fmt::Display) -> McpError {
    McpError::ExecutionFailed {
        message: e.to_string(),
    }
}

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse typed parameters, run an engine operation and serialize its result.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params).await.map_err(execution_failed)?;

    serde_json::to_value(result).map_err(McpError::Json)
}
