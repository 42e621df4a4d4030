use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PropagationPath;
use crate::graph::{GraphSnapshot, ServiceKind};

/// Relative cost of putting a mitigation in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostLevel {
    Low,
    Medium,
    High,
}

/// Intervention that isolates a service from the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationAction {
    CircuitBreaker,
    DatabaseFailover,
    QueueBackpressure,
    ServeStaleCache,
    TokenCaching,
    GracefulDegradation,
    WorkerIsolation,
    ManualIsolation,
}

impl MitigationAction {
    /// Default action for a kind of service.
    pub fn for_kind(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::Api => MitigationAction::CircuitBreaker,
            ServiceKind::Database => MitigationAction::DatabaseFailover,
            ServiceKind::Queue => MitigationAction::QueueBackpressure,
            ServiceKind::Cache => MitigationAction::ServeStaleCache,
            ServiceKind::Auth => MitigationAction::TokenCaching,
            ServiceKind::Frontend => MitigationAction::GracefulDegradation,
            ServiceKind::Worker => MitigationAction::WorkerIsolation,
            ServiceKind::Unknown => MitigationAction::ManualIsolation,
        }
    }

    /// Minutes needed to put the action in place.
    pub fn time_to_implement_minutes(&self) -> f64 {
        match self {
            MitigationAction::CircuitBreaker => 5.0,
            MitigationAction::DatabaseFailover => 30.0,
            MitigationAction::QueueBackpressure => 10.0,
            MitigationAction::ServeStaleCache => 5.0,
            MitigationAction::TokenCaching => 15.0,
            MitigationAction::GracefulDegradation => 10.0,
            MitigationAction::WorkerIsolation => 10.0,
            MitigationAction::ManualIsolation => 20.0,
        }
    }

    pub fn cost(&self) -> CostLevel {
        match self {
            MitigationAction::CircuitBreaker
            | MitigationAction::ServeStaleCache
            | MitigationAction::GracefulDegradation
            | MitigationAction::WorkerIsolation => CostLevel::Low,
            MitigationAction::QueueBackpressure
            | MitigationAction::TokenCaching
            | MitigationAction::ManualIsolation => CostLevel::Medium,
            MitigationAction::DatabaseFailover => CostLevel::High,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MitigationAction::CircuitBreaker => "Open a circuit breaker in front of the service",
            MitigationAction::DatabaseFailover => "Fail over to a database replica",
            MitigationAction::QueueBackpressure => "Apply backpressure and shed queue load",
            MitigationAction::ServeStaleCache => "Serve stale cache entries",
            MitigationAction::TokenCaching => "Extend cached token validity",
            MitigationAction::GracefulDegradation => "Degrade the frontend gracefully",
            MitigationAction::WorkerIsolation => "Pause and isolate affected workers",
            MitigationAction::ManualIsolation => "Isolate the service manually",
        }
    }
}

/// A ranked intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationStrategy {
    pub target: String,
    pub action: MitigationAction,
    pub description: String,
    /// `1 - residual_probability`.
    pub effectiveness: f64,
    /// Highest probability among paths that avoid the target.
    pub residual_probability: f64,
    pub time_to_implement_minutes: f64,
    pub cost: CostLevel,
    /// Paths that pass through the target.
    pub paths_covered: usize,
    /// `effectiveness / time_to_implement_minutes`, the ranking key.
    pub priority: f64,
}

/// Ranks interventions at checkpoint services.
pub struct MitigationStrategyGenerator;

impl MitigationStrategyGenerator {
    /// One strategy per unique checkpoint, best first.
    pub fn generate(snapshot: &GraphSnapshot, paths: &[PropagationPath]) -> Vec<MitigationStrategy> {
        let mut targets: BTreeMap<&str, MitigationAction> = BTreeMap::new();
        for path in paths {
            for checkpoint in &path.checkpoints {
                targets
                    .entry(checkpoint.service_id.as_str())
                    .or_insert(checkpoint.action);
            }
        }

        let mut strategies: Vec<MitigationStrategy> = targets
            .into_iter()
            .map(|(target, action)| {
                let (covered, avoiding): (Vec<&PropagationPath>, Vec<&PropagationPath>) =
                    paths.iter().partition(|p| p.contains(target));
                let residual = avoiding
                    .iter()
                    .map(|p| p.probability)
                    .fold(0.0_f64, f64::max);
                let effectiveness = (1.0 - residual).clamp(0.0, 1.0);
                let action = snapshot
                    .node(target)
                    .map(|node| MitigationAction::for_kind(node.kind))
                    .unwrap_or(action);
                let time = action.time_to_implement_minutes();

                MitigationStrategy {
                    target: target.to_string(),
                    action,
                    description: action.description().to_string(),
                    effectiveness,
                    residual_probability: residual,
                    time_to_implement_minutes: time,
                    cost: action.cost(),
                    paths_covered: covered.len(),
                    priority: effectiveness / time,
                }
            })
            .collect();

        strategies.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| b.effectiveness.total_cmp(&a.effectiveness))
                .then_with(|| a.target.cmp(&b.target))
        });

        debug!(strategies = strategies.len(), "Mitigation strategies ranked");
        strategies
    }
}
