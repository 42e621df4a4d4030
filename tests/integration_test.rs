//! Integration tests for the full MCP → Engine → HTTP services → Store flow
//!
//! The forecasting service and an evidence feed are mocked with wiremock; the
//! tools are invoked through the same router the stdio server uses.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::tempdir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use mcp_cascade_impact::config::{Config, DatabaseConfig, RequestConfig, StorageBackend};
use mcp_cascade_impact::server::{handle_tool_call, AppState, SharedState};
use mcp_cascade_impact::ImpactEngine;

fn create_test_config(mock_url: &str, db_path: std::path::PathBuf) -> Config {
    let mut config = Config::default();
    config.database = DatabaseConfig {
        backend: StorageBackend::Sqlite,
        path: db_path,
        max_connections: 1,
    };
    config.request = RequestConfig {
        timeout_ms: 2000,
        max_retries: 0,
        retry_delay_ms: 10,
    };
    config.forecasting.base_url = Some(mock_url.to_string());
    config.discovery.evidence_endpoints = vec![("network_flow".to_string(), mock_url.to_string())];
    config.discovery.enabled = false;
    config
}

async fn create_state(config: Config) -> SharedState {
    let engine = ImpactEngine::from_config(config.clone())
        .await
        .expect("Failed to build engine");
    Arc::new(AppState::new(config, Arc::new(engine)))
}

async fn mount_services(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/dependencies/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "dependencies": [
                { "from": "orders", "to": "storefront", "kind": "synchronous", "confidence": 0.96 },
                { "from": "orders", "to": "fulfilment", "kind": "asynchronous", "confidence": 0.88 },
                { "from": "pg", "to": "orders", "kind": "data", "confidence": 0.99 }
            ]
        })))
        .mount(mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": 0.4,
            "confidence": 0.8
        })))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_discover_then_analyze_with_forecast() {
    let mock_server = MockServer::start().await;
    mount_services(&mock_server).await;
    let dir = tempdir().unwrap();
    let state = create_state(create_test_config(&mock_server.uri(), dir.path().join("t.db"))).await;

    let outcome = handle_tool_call(
        &state,
        "cascade_discover_dependencies",
        Some(json!({ "service_id": "orders" })),
    )
    .await
    .unwrap();
    assert_eq!(outcome["edges_written"], 3);
    assert_eq!(outcome["methods_used"], json!(["network_flow"]));

    let analysis = handle_tool_call(
        &state,
        "cascade_analyze_impact",
        Some(json!({ "service_id": "orders", "event_type": "failure", "severity": "high" })),
    )
    .await
    .unwrap();

    let cascade = &analysis["cascade_analysis"];
    assert_eq!(cascade["forecast_applied"], true);
    assert_eq!(cascade["forecast_confidence"], 0.8);
    assert_eq!(cascade["blast_radius"]["tier1"], json!(["storefront"]));
    assert_eq!(cascade["blast_radius"]["tier2"], json!(["fulfilment"]));

    // Upstream `pg` is not downstream of the failure.
    let affected: Vec<&str> = analysis["service_impacts"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["service_id"].as_str())
        .collect();
    assert!(!affected.contains(&"pg"));
    assert!(affected.contains(&"storefront"));
}

#[tokio::test]
async fn test_forecast_outage_still_returns_analysis() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    let dir = tempdir().unwrap();
    let state = create_state(create_test_config(&mock_server.uri(), dir.path().join("t.db"))).await;

    handle_tool_call(
        &state,
        "cascade_add_dependency",
        Some(json!({ "from": "auth", "to": "api", "failure_propagation_secs": 30, "health_correlation": 0.95 })),
    )
    .await
    .unwrap();

    let analysis: Value = handle_tool_call(
        &state,
        "cascade_analyze_impact",
        Some(json!({ "service_id": "auth" })),
    )
    .await
    .unwrap();

    assert_eq!(analysis["cascade_analysis"]["forecast_applied"], false);
    assert_eq!(analysis["cascade_analysis"]["blast_radius"]["tier1"], json!(["api"]));
}

#[tokio::test]
async fn test_graph_persists_across_restarts() {
    let mock_server = MockServer::start().await;
    mount_services(&mock_server).await;
    let dir = tempdir().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path().join("t.db"));

    {
        let state = create_state(config.clone()).await;
        handle_tool_call(
            &state,
            "cascade_add_service",
            Some(json!({ "id": "billing", "kind": "api", "criticality": "critical" })),
        )
        .await
        .unwrap();
        handle_tool_call(
            &state,
            "cascade_add_dependency",
            Some(json!({ "from": "billing", "to": "invoices", "kind": "data" })),
        )
        .await
        .unwrap();
    }

    let state = create_state(config).await;
    let graph = handle_tool_call(&state, "cascade_get_graph", None).await.unwrap();

    assert_eq!(graph["graph"]["nodes"]["billing"]["criticality"], "critical");
    assert_eq!(graph["graph"]["nodes"]["invoices"]["placeholder"], true);
    assert_eq!(graph["topology"]["layers"], json!([["billing"], ["invoices"]]));
}
