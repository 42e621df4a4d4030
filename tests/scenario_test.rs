//! End-to-end scenarios against the impact engine
//!
//! Builds small dependency graphs in memory and checks the analysis pipeline
//! from cascade enumeration through mitigation ranking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use mcp_cascade_impact::analysis::{Severity, TriggerEvent};
use mcp_cascade_impact::config::Config;
use mcp_cascade_impact::error::{AppError, ForecastError, ForecastResult};
use mcp_cascade_impact::events::{BroadcastEventBus, IMPACT_ANALYSIS_COMPLETED, SERVICE_REMOVED};
use mcp_cascade_impact::forecasting::{
    Forecast, ForecastOptions, ForecastingProvider, StaticForecaster,
};
use mcp_cascade_impact::graph::{
    Criticality, DependencyKind, EdgeUpsert, GraphStore, ServiceDependency, ServiceKind,
    ServiceNode, TopologyAnalyzer,
};
use mcp_cascade_impact::ImpactEngine;

struct DownForecaster;

#[async_trait]
impl ForecastingProvider for DownForecaster {
    async fn predict(&self, _series: &[f64], _options: &ForecastOptions) -> ForecastResult<Forecast> {
        Err(ForecastError::Unavailable {
            message: "connection refused".to_string(),
            retries: 3,
        })
    }
}

struct HangingForecaster;

#[async_trait]
impl ForecastingProvider for HangingForecaster {
    async fn predict(&self, series: &[f64], _options: &ForecastOptions) -> ForecastResult<Forecast> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Forecast {
            value: series.last().copied().unwrap_or(0.0),
            confidence: 0.1,
        })
    }
}

fn engine() -> ImpactEngine {
    ImpactEngine::new(Config::default(), Arc::new(GraphStore::new()))
}

/// `auth → api → db` with the propagation figures from the runbook example.
async fn auth_api_db(engine: &ImpactEngine) {
    engine
        .add_service(ServiceNode::new("auth", ServiceKind::Auth).with_criticality(Criticality::Critical))
        .await
        .unwrap();
    engine
        .add_service(ServiceNode::new("api", ServiceKind::Api).with_criticality(Criticality::High))
        .await
        .unwrap();
    engine
        .add_service(ServiceNode::new("db", ServiceKind::Database))
        .await
        .unwrap();
    engine
        .add_dependency(
            ServiceDependency::new("auth", "api", DependencyKind::Synchronous, 0.95)
                .with_propagation(0.95, 30.0),
        )
        .await
        .unwrap();
    engine
        .add_dependency(
            ServiceDependency::new("api", "db", DependencyKind::Synchronous, 0.95)
                .with_propagation(0.98, 10.0),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_auth_failure_cascade() {
    let engine = engine();
    auth_api_db(&engine).await;

    let result = engine
        .analyze_service_impact("auth", TriggerEvent::Failure, Severity::Critical)
        .await
        .unwrap();
    let cascade = &result.cascade_analysis;

    assert_eq!(cascade.blast_radius.tier1, vec!["api"]);
    assert_eq!(cascade.blast_radius.tier2, vec!["db"]);
    assert!(cascade.blast_radius.tier3.is_empty());
    assert!(!cascade.forecast_applied);

    let full = cascade
        .paths
        .iter()
        .find(|p| p.services == ["auth", "api", "db"])
        .expect("full path enumerated");
    assert!((full.probability - 0.95 * 0.98).abs() < 1e-9);
    assert!(full.probability < 0.95);
    assert_eq!(full.cumulative_secs, 40.0);

    assert!(result
        .immediate_impact
        .directly_affected
        .contains(&"api".to_string()));
    assert!(result.business_impact.users_affected > 0);
    assert!(result.business_impact.revenue_at_risk > 0.0);
    assert!(!result.mitigation_strategies.is_empty());
    assert!(result
        .mitigation_strategies
        .windows(2)
        .all(|w| w[0].priority >= w[1].priority));
}

#[tokio::test]
async fn test_failing_forecaster_falls_back() {
    let engine = engine().with_forecaster(Arc::new(DownForecaster));
    auth_api_db(&engine).await;

    let result = engine
        .analyze_service_impact("auth", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap();

    assert!(!result.cascade_analysis.forecast_applied);
    assert_eq!(result.cascade_analysis.blast_radius.tier1, vec!["api"]);
}

#[tokio::test]
async fn test_hanging_forecaster_is_time_boxed() {
    let mut config = Config::default();
    config.forecasting.timeout_ms = 50;
    let engine = ImpactEngine::new(config, Arc::new(GraphStore::new()))
        .with_forecaster(Arc::new(HangingForecaster));
    auth_api_db(&engine).await;

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.analyze_service_impact("auth", TriggerEvent::Degradation, Severity::Medium),
    )
    .await
    .expect("analysis must not wait for the forecaster")
    .unwrap();

    assert!(!result.cascade_analysis.forecast_applied);
}

#[tokio::test]
async fn test_forecast_confidence_scales_probabilities() {
    let engine = engine().with_forecaster(Arc::new(StaticForecaster::new(0.5)));
    auth_api_db(&engine).await;

    let result = engine
        .analyze_service_impact("auth", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap();
    let cascade = &result.cascade_analysis;

    assert!(cascade.forecast_applied);
    assert_eq!(cascade.forecast_confidence, Some(0.5));
    let first_hop = cascade
        .paths
        .iter()
        .find(|p| p.services == ["auth", "api"])
        .unwrap();
    assert!((first_hop.probability - 0.95 * 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_monotonic_probability_along_chain() {
    let engine = engine();
    for (from, to, corr) in [("a", "b", 0.9), ("b", "c", 0.8), ("c", "d", 0.7)] {
        engine
            .add_dependency(
                ServiceDependency::new(from, to, DependencyKind::Synchronous, 0.9)
                    .with_propagation(corr, 30.0),
            )
            .await
            .unwrap();
    }

    let result = engine
        .analyze_service_impact("a", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap();
    let reach = |id: &str| {
        result
            .cascade_analysis
            .blast_radius
            .reach(id)
            .map(|r| r.probability)
            .unwrap()
    };

    assert!(reach("d") <= reach("c"));
    assert!(reach("c") <= reach("b"));
    assert!((reach("d") - 0.9 * 0.8 * 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_tiers_partition_reachable_services() {
    let engine = engine();
    let edges = [
        ("gw", "web", DependencyKind::Synchronous),
        ("gw", "mobile", DependencyKind::Synchronous),
        ("web", "reports", DependencyKind::Asynchronous),
        ("mobile", "push", DependencyKind::Asynchronous),
        ("push", "audit", DependencyKind::Asynchronous),
        ("other", "gw", DependencyKind::Data),
    ];
    for (from, to, kind) in edges {
        engine
            .add_dependency(ServiceDependency::new(from, to, kind, 0.9))
            .await
            .unwrap();
    }

    let result = engine
        .analyze_service_impact("gw", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap();
    let radius = &result.cascade_analysis.blast_radius;

    let mut tiered: Vec<&String> = radius.tiered().collect();
    let total = tiered.len();
    tiered.sort();
    tiered.dedup();
    assert_eq!(tiered.len(), total, "tiers overlap");

    let reachable = ["web", "mobile", "reports", "push", "audit"];
    assert!(tiered.iter().all(|s| reachable.contains(&s.as_str())));
    assert!(!tiered.iter().any(|s| *s == "other" || *s == "gw"));
}

#[tokio::test]
async fn test_layering_places_dependencies_earlier() {
    let engine = engine();
    let edges = [
        ("db", "api"),
        ("cache", "api"),
        ("api", "web"),
        ("auth", "web"),
        ("db", "batch"),
        ("loop_a", "loop_b"),
        ("loop_b", "loop_a"),
        ("loop_b", "downstream"),
    ];
    for (from, to) in edges {
        engine
            .add_dependency(ServiceDependency::new(from, to, DependencyKind::Synchronous, 0.9))
            .await
            .unwrap();
    }

    let snapshot = engine.get_dependency_graph().await;
    let topology = &snapshot.topology;

    for edge in snapshot.graph.edges.values() {
        if let (Some(from), Some(to)) = (topology.layer_of(&edge.from), topology.layer_of(&edge.to))
        {
            assert!(from < to, "{} must precede {}", edge.from, edge.to);
        }
    }
    assert_eq!(topology.circular_groups, vec![vec!["loop_a", "loop_b"]]);
    assert_eq!(topology.cycle_dependents, vec!["downstream"]);

    let again = TopologyAnalyzer::analyze(&snapshot.graph);
    assert_eq!(&again, topology);
}

#[tokio::test]
async fn test_dedup_keeps_higher_confidence() {
    let engine = engine();
    let strong = ServiceDependency::new("db", "api", DependencyKind::Synchronous, 0.9);
    let weak = ServiceDependency::new("db", "api", DependencyKind::Data, 0.6);

    assert_eq!(engine.add_dependency(strong).await.unwrap(), EdgeUpsert::Inserted);
    assert_eq!(engine.add_dependency(weak).await.unwrap(), EdgeUpsert::Ignored);

    let snapshot = engine.get_dependency_graph().await;
    assert_eq!(snapshot.graph.edge_count(), 1);
    let edge = snapshot.graph.edges.values().next().unwrap();
    assert_eq!(edge.confidence(), 0.9);
    assert_eq!(edge.kind, DependencyKind::Synchronous);
}

#[tokio::test]
async fn test_add_remove_round_trip() {
    let engine = engine();
    auth_api_db(&engine).await;
    let before = engine.get_dependency_graph().await;

    engine
        .add_service(ServiceNode::new("search", ServiceKind::Api))
        .await
        .unwrap();
    engine
        .add_dependency(ServiceDependency::new("db", "search", DependencyKind::Data, 0.8))
        .await
        .unwrap();
    engine.remove_service("search").await.unwrap();

    let after = engine.get_dependency_graph().await;
    assert_eq!(after.graph.node_count(), before.graph.node_count());
    assert_eq!(after.graph.edge_count(), before.graph.edge_count());
    assert!(after.version > before.version);
}

#[tokio::test]
async fn test_analysis_cached_until_graph_changes() {
    let engine = engine();
    auth_api_db(&engine).await;

    let first = engine
        .analyze_service_impact("auth", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap();
    let second = engine
        .analyze_service_impact("auth", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap();
    assert_eq!(first.analysis_id, second.analysis_id);
    assert!(engine.get_analysis(&first.analysis_id).is_some());

    engine
        .add_dependency(ServiceDependency::new("db", "reports", DependencyKind::Data, 0.9))
        .await
        .unwrap();
    let third = engine
        .analyze_service_impact("auth", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap();
    assert_ne!(first.analysis_id, third.analysis_id);
    assert!(third.cascade_analysis.blast_radius.reach("reports").is_some());
}

#[tokio::test]
async fn test_events_are_published() {
    let bus = Arc::new(BroadcastEventBus::new(16));
    let mut events = bus.subscribe();
    let engine = engine().with_event_bus(bus.clone());
    auth_api_db(&engine).await;

    engine
        .analyze_service_impact("auth", TriggerEvent::Failure, Severity::Low)
        .await
        .unwrap();
    engine.remove_service("db").await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name);
    }
    assert!(names.iter().any(|n| n == IMPACT_ANALYSIS_COMPLETED));
    assert_eq!(names.last().map(String::as_str), Some(SERVICE_REMOVED));
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let engine = engine();

    let err = engine
        .analyze_service_impact("", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = engine
        .analyze_service_impact("ghost", TriggerEvent::Failure, Severity::High)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    let err = engine
        .add_dependency(ServiceDependency::new("a", "b", DependencyKind::Synchronous, -0.1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
}
