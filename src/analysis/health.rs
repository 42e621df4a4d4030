use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forecasting::Forecast;
use crate::graph::{
    Criticality, DependencyKind, GraphSnapshot, HealthStatus, ServiceHealth,
};

/// Scores below this count as degraded for reporting.
const DEGRADED_SCORE: f64 = 0.7;
/// Correlation at which an unhealthy upstream is worth flagging.
const HIGH_CORRELATION: f64 = 0.7;
/// Drop across the recent history window that counts as a decline.
const DECLINE_THRESHOLD: f64 = 0.1;
const TREND_WINDOW: usize = 5;

/// Health of one upstream dependency, seen from the dependent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub service_id: String,
    pub kind: DependencyKind,
    pub criticality: Criticality,
    pub health: ServiceHealth,
    pub health_correlation: f64,
    pub recovery_dependency: bool,
    pub confidence: f64,
}

/// Health along the graph's critical path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalPathHealth {
    pub services: Vec<String>,
    pub min_score: f64,
    pub average_score: f64,
    pub degraded: Vec<String>,
    /// Whether the queried service lies on the critical path.
    pub contains_service: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    UpstreamDegradation,
    CircularDependency,
    DecliningTrend,
    RecoveryBottleneck,
    ForecastedDecline,
}

/// Something likely to matter soon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveInsight {
    pub kind: InsightKind,
    pub message: String,
    /// Confidence in the insight (0.0-1.0).
    pub confidence: f64,
    pub related_services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyHealthReport {
    pub service_id: String,
    pub service_health: ServiceHealth,
    pub dependency_health: Vec<DependencyHealth>,
    pub critical_path_health: CriticalPathHealth,
    pub predictive_insights: Vec<PredictiveInsight>,
    pub generated_at: DateTime<Utc>,
}

/// Builds dependency health reports from a snapshot.
pub struct DependencyHealthAnalyzer;

impl DependencyHealthAnalyzer {
    /// Report on `service_id`, which must exist in `snapshot`.
    ///
    /// `history` is the service's recorded health, oldest first.
    pub fn report(
        snapshot: &GraphSnapshot,
        service_id: &str,
        history: &[f64],
    ) -> Option<DependencyHealthReport> {
        let node = snapshot.node(service_id)?;

        let dependency_health: Vec<DependencyHealth> = snapshot
            .graph
            .incoming(service_id)
            .map(|edge| DependencyHealth {
                service_id: edge.from.clone(),
                kind: edge.kind,
                criticality: edge.criticality,
                health: snapshot
                    .node(&edge.from)
                    .map(|n| n.health.clone())
                    .unwrap_or_default(),
                health_correlation: edge.health_correlation,
                recovery_dependency: edge.recovery_dependency,
                confidence: edge.confidence(),
            })
            .collect();

        let mut insights = Vec::new();

        for dep in &dependency_health {
            let unhealthy = matches!(
                dep.health.status,
                HealthStatus::Degraded | HealthStatus::Unhealthy
            ) || dep.health.score < DEGRADED_SCORE;
            if unhealthy && dep.health_correlation >= HIGH_CORRELATION {
                insights.push(PredictiveInsight {
                    kind: InsightKind::UpstreamDegradation,
                    message: format!(
                        "Upstream {} is {} (score {:.2}) and {} follows it closely",
                        dep.service_id, dep.health.status, dep.health.score, service_id
                    ),
                    confidence: (dep.health_correlation * (1.0 - dep.health.score)).clamp(0.0, 1.0),
                    related_services: vec![dep.service_id.clone()],
                });
            }
            if dep.recovery_dependency && dep.criticality >= Criticality::High {
                insights.push(PredictiveInsight {
                    kind: InsightKind::RecoveryBottleneck,
                    message: format!(
                        "{} cannot recover until {} has recovered",
                        service_id, dep.service_id
                    ),
                    confidence: dep.confidence,
                    related_services: vec![dep.service_id.clone()],
                });
            }
        }

        if let Some(group) = snapshot.topology.circular_group_of(service_id) {
            insights.push(PredictiveInsight {
                kind: InsightKind::CircularDependency,
                message: format!(
                    "{} is part of a circular dependency group of {} services",
                    service_id,
                    group.len()
                ),
                confidence: 1.0,
                related_services: group.to_vec(),
            });
        }

        if let Some(drop) = recent_decline(history) {
            insights.push(PredictiveInsight {
                kind: InsightKind::DecliningTrend,
                message: format!(
                    "Health of {} fell by {:.2} over the last {} readings",
                    service_id,
                    drop,
                    history.len().min(TREND_WINDOW)
                ),
                confidence: drop.clamp(0.0, 1.0),
                related_services: Vec::new(),
            });
        }

        Some(DependencyHealthReport {
            service_id: service_id.to_string(),
            service_health: node.health.clone(),
            dependency_health,
            critical_path_health: critical_path_health(snapshot, service_id),
            predictive_insights: insights,
            generated_at: Utc::now(),
        })
    }

    /// Insight for a forecast that predicts a drop below the current score.
    pub fn forecast_insight(
        service_id: &str,
        current_score: f64,
        forecast: &Forecast,
    ) -> Option<PredictiveInsight> {
        if forecast.value >= current_score - DECLINE_THRESHOLD {
            return None;
        }
        Some(PredictiveInsight {
            kind: InsightKind::ForecastedDecline,
            message: format!(
                "Health of {} is forecast to fall from {:.2} to {:.2}",
                service_id, current_score, forecast.value
            ),
            confidence: forecast.confidence,
            related_services: Vec::new(),
        })
    }
}

fn recent_decline(history: &[f64]) -> Option<f64> {
    if history.len() < 3 {
        return None;
    }
    let window = &history[history.len().saturating_sub(TREND_WINDOW)..];
    let first = *window.first()?;
    let last = *window.last()?;
    let drop = first - last;
    (drop > DECLINE_THRESHOLD).then_some(drop)
}

fn critical_path_health(snapshot: &GraphSnapshot, service_id: &str) -> CriticalPathHealth {
    let services = snapshot.topology.critical_path.services.clone();
    if services.is_empty() {
        return CriticalPathHealth::default();
    }

    let scores: Vec<(String, f64)> = services
        .iter()
        .map(|s| {
            let score = snapshot.node(s).map(|n| n.health.score).unwrap_or(1.0);
            (s.clone(), score)
        })
        .collect();

    CriticalPathHealth {
        min_score: scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min),
        average_score: scores.iter().map(|(_, s)| *s).sum::<f64>() / scores.len() as f64,
        degraded: scores
            .iter()
            .filter(|(_, s)| *s < DEGRADED_SCORE)
            .map(|(id, _)| id.clone())
            .collect(),
        contains_service: snapshot.topology.on_critical_path(service_id),
        services,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, ServiceDependency, ServiceKind, ServiceNode};

    async fn store() -> GraphStore {
        let store = GraphStore::new();
        store
            .upsert_node(
                ServiceNode::new("db", ServiceKind::Database)
                    .with_health(ServiceHealth::new(HealthStatus::Degraded, 0.4)),
            )
            .await
            .unwrap();
        store
            .upsert_node(ServiceNode::new("api", ServiceKind::Api))
            .await
            .unwrap();
        store
            .upsert_edge(ServiceDependency::new(
                "db",
                "api",
                DependencyKind::Synchronous,
                0.9,
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_report_flags_degraded_upstream() {
        let store = store().await;
        let snapshot = store.snapshot().await;
        let report = DependencyHealthAnalyzer::report(&snapshot, "api", &[]).unwrap();

        assert_eq!(report.dependency_health.len(), 1);
        assert_eq!(report.dependency_health[0].service_id, "db");
        assert!(report
            .predictive_insights
            .iter()
            .any(|i| i.kind == InsightKind::UpstreamDegradation));
        assert!(report
            .predictive_insights
            .iter()
            .any(|i| i.kind == InsightKind::RecoveryBottleneck));

        let cp = &report.critical_path_health;
        assert_eq!(cp.services, vec!["db", "api"]);
        assert!(cp.contains_service);
        assert_eq!(cp.min_score, 0.4);
        assert_eq!(cp.degraded, vec!["db"]);
    }

    #[tokio::test]
    async fn test_report_unknown_service() {
        let store = store().await;
        let snapshot = store.snapshot().await;
        assert!(DependencyHealthAnalyzer::report(&snapshot, "ghost", &[]).is_none());
    }

    #[tokio::test]
    async fn test_circular_membership_and_trend() {
        let store = GraphStore::new();
        store
            .upsert_edges(vec![
                ServiceDependency::new("a", "b", DependencyKind::Asynchronous, 0.9),
                ServiceDependency::new("b", "a", DependencyKind::Asynchronous, 0.9),
            ])
            .await
            .unwrap();
        let snapshot = store.snapshot().await;
        let report =
            DependencyHealthAnalyzer::report(&snapshot, "a", &[1.0, 0.9, 0.8, 0.6]).unwrap();

        let kinds: Vec<InsightKind> = report.predictive_insights.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&InsightKind::CircularDependency));
        assert!(kinds.contains(&InsightKind::DecliningTrend));
        assert!(!kinds.contains(&InsightKind::RecoveryBottleneck));
    }

    #[test]
    fn test_forecast_insight_threshold() {
        let falling = Forecast {
            value: 0.5,
            confidence: 0.8,
        };
        let steady = Forecast {
            value: 0.95,
            confidence: 0.8,
        };
        assert!(DependencyHealthAnalyzer::forecast_insight("api", 1.0, &falling).is_some());
        assert!(DependencyHealthAnalyzer::forecast_insight("api", 1.0, &steady).is_none());
    }
}
