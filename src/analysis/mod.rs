//! Failure impact analysis.
//!
//! An analysis runs against one [`GraphSnapshot`](crate::graph::GraphSnapshot)
//! in four stages:
//!
//! 1. [`CascadePredictor`] enumerates propagation paths from the trigger.
//! 2. [`BlastRadiusCalculator`] places every reached service into a tier.
//! 3. [`ImpactAnalyzer`] turns reach into recovery time and business cost.
//! 4. [`MitigationStrategyGenerator`] ranks interventions at checkpoints.
//!
//! [`DependencyHealthAnalyzer`] is separate; it reports on one service's
//! upstream dependencies without a trigger.

mod blast_radius;
mod cascade;
mod health;
mod impact;
mod mitigation;

pub use blast_radius::{BlastRadius, BlastRadiusCalculator, ServiceReach};
pub use cascade::{CascadePrediction, CascadePredictor, Checkpoint, PropagationPath};
pub use health::{
    CriticalPathHealth, DependencyHealth, DependencyHealthAnalyzer, DependencyHealthReport,
    InsightKind, PredictiveInsight,
};
pub use impact::{BusinessImpact, ImmediateImpact, ImpactAnalyzer, ImpactSeverity, ServiceImpact};
pub use mitigation::{CostLevel, MitigationAction, MitigationStrategy, MitigationStrategyGenerator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Trigger
// ============================================================================

/// What happened to the trigger service.
///
/// The event type is carried through the result for the caller; propagation
/// itself depends only on the graph and the severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    #[default]
    Failure,
    Degradation,
    LatencySpike,
    CapacityExhaustion,
    Deployment,
}

impl TriggerEvent {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::Failure => "failure",
            TriggerEvent::Degradation => "degradation",
            TriggerEvent::LatencySpike => "latency_spike",
            TriggerEvent::CapacityExhaustion => "capacity_exhaustion",
            TriggerEvent::Deployment => "deployment",
        }
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggerEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "failure" | "outage" => Ok(TriggerEvent::Failure),
            "degradation" => Ok(TriggerEvent::Degradation),
            "latency_spike" | "latency" => Ok(TriggerEvent::LatencySpike),
            "capacity_exhaustion" | "capacity" => Ok(TriggerEvent::CapacityExhaustion),
            "deployment" => Ok(TriggerEvent::Deployment),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// Severity of the triggering event.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Multiplier applied to base recovery times.
    pub fn recovery_multiplier(&self) -> f64 {
        match self {
            Severity::Low => 0.5,
            Severity::Medium => 1.0,
            Severity::High => 1.5,
            Severity::Critical => 2.0,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// The event an analysis starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub service_id: String,
    pub event: TriggerEvent,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl Trigger {
    /// Create a trigger stamped now.
    pub fn new(service_id: impl Into<String>, event: TriggerEvent, severity: Severity) -> Self {
        Self {
            service_id: service_id.into(),
            event,
            severity,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Result
// ============================================================================

/// Propagation side of an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeAnalysis {
    /// Highest-probability paths, best first.
    pub paths: Vec<PropagationPath>,
    pub blast_radius: BlastRadius,
    /// Whether a forecast adjusted path probabilities.
    pub forecast_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_confidence: Option<f64>,
    /// Paths enumerated before ranking.
    pub paths_considered: usize,
    /// Enumeration stopped at the configured path limit.
    pub truncated: bool,
}

/// Complete outcome of one impact analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysisResult {
    pub analysis_id: String,
    pub trigger: Trigger,
    /// Graph version the analysis ran against.
    pub graph_version: u64,
    pub immediate_impact: ImmediateImpact,
    pub cascade_analysis: CascadeAnalysis,
    pub business_impact: BusinessImpact,
    /// Per-service breakdown behind the business totals.
    pub service_impacts: Vec<ServiceImpact>,
    pub mitigation_strategies: Vec<MitigationStrategy>,
    pub analyzed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_event_parsing() {
        assert_eq!("failure".parse::<TriggerEvent>().unwrap(), TriggerEvent::Failure);
        assert_eq!(
            "LATENCY_SPIKE".parse::<TriggerEvent>().unwrap(),
            TriggerEvent::LatencySpike
        );
        assert!("meteor".parse::<TriggerEvent>().is_err());
        assert_eq!(TriggerEvent::CapacityExhaustion.to_string(), "capacity_exhaustion");
    }

    #[test]
    fn test_severity_ordering_and_multiplier() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::Critical.recovery_multiplier(), 2.0);
        assert_eq!(Severity::Low.recovery_multiplier(), 0.5);
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
    }

    #[test]
    fn test_trigger_serializes_snake_case() {
        let trigger = Trigger::new("auth", TriggerEvent::LatencySpike, Severity::Critical);
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["event"], "latency_spike");
        assert_eq!(json["severity"], "critical");
    }
}
