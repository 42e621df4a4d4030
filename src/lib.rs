//! # MCP Cascade Impact Server
//!
//! A Model Context Protocol (MCP) server that predicts how failures propagate
//! through a graph of service dependencies.
//!
//! ## Features
//!
//! - **Dependency Graph**: Services and weighted dependencies with layering,
//!   circular-group detection and a critical path
//! - **Discovery**: Concurrent evidence sources merged into confident edges
//! - **Cascade Prediction**: Ranked propagation paths, optionally tempered by
//!   a health forecast
//! - **Blast Radius**: Affected services partitioned into time tiers
//! - **Business Impact**: Recovery times, SLA exposure, users and revenue
//! - **Mitigation**: Circuit-breaking checkpoints ranked by effectiveness
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (Rust) → ImpactEngine → GraphStore → SQLite
//!                                       ↓
//!                    Evidence sources / Forecasting service (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_cascade_impact::{AppState, Config, ImpactEngine, McpServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let engine = Arc::new(ImpactEngine::from_config(config.clone()).await?);
//!     let state = Arc::new(AppState::new(config, engine));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Cascade, blast radius, impact, mitigation and health analysis.
#[allow(missing_docs)]
pub mod analysis;
/// Command-line interface.
#[allow(missing_docs)]
pub mod cli;
/// Configuration management for the MCP server.
#[allow(missing_docs)]
pub mod config;
/// Dependency discovery from evidence sources.
#[allow(missing_docs)]
pub mod discovery;
/// Orchestration of the analysis pipeline.
#[allow(missing_docs)]
pub mod engine;
/// Error types and result aliases for the application.
#[allow(missing_docs)]
pub mod error;
/// Event notifications for analysis and graph changes.
#[allow(missing_docs)]
pub mod events;
/// Health forecasting providers.
#[allow(missing_docs)]
pub mod forecasting;
/// Dependency graph model, topology and versioned store.
#[allow(missing_docs)]
pub mod graph;
/// MCP server implementation and request handling.
#[allow(missing_docs)]
pub mod server;
/// Graph persistence.
#[allow(missing_docs)]
pub mod storage;

pub use config::Config;
pub use engine::ImpactEngine;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
