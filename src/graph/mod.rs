//! Service dependency graph.
//!
//! This module provides the node and edge model, the [`GraphStore`] that owns
//! the live graph, and the [`TopologyAnalyzer`] that derives layering, circular
//! groups and the critical path from it.

mod store;
mod topology;

pub use store::*;
pub use topology::*;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

// ============================================================================
// Enumerations
// ============================================================================

/// What a service is, used for recovery and mitigation defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Api,
    Database,
    Queue,
    Cache,
    Auth,
    Frontend,
    Worker,
    /// Placeholder created from an edge endpoint nobody registered.
    #[default]
    Unknown,
}

impl ServiceKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Api => "api",
            ServiceKind::Database => "database",
            ServiceKind::Queue => "queue",
            ServiceKind::Cache => "cache",
            ServiceKind::Auth => "auth",
            ServiceKind::Frontend => "frontend",
            ServiceKind::Worker => "worker",
            ServiceKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" => Ok(ServiceKind::Api),
            "database" | "db" => Ok(ServiceKind::Database),
            "queue" => Ok(ServiceKind::Queue),
            "cache" => Ok(ServiceKind::Cache),
            "auth" => Ok(ServiceKind::Auth),
            "frontend" => Ok(ServiceKind::Frontend),
            "worker" => Ok(ServiceKind::Worker),
            "unknown" => Ok(ServiceKind::Unknown),
            _ => Err(format!("Unknown service kind: {}", s)),
        }
    }
}

/// Criticality tier shared by services and dependency edges.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Criticality {
    /// Numeric weight in (0, 1] used by critical path search and impact scaling.
    pub fn weight(&self) -> f64 {
        match self {
            Criticality::Low => 0.25,
            Criticality::Medium => 0.5,
            Criticality::High => 0.75,
            Criticality::Critical => 1.0,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::Low => "low",
            Criticality::Medium => "medium",
            Criticality::High => "high",
            Criticality::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Criticality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Criticality::Low),
            "medium" => Ok(Criticality::Medium),
            "high" => Ok(Criticality::High),
            "critical" => Ok(Criticality::Critical),
            _ => Err(format!("Unknown criticality: {}", s)),
        }
    }
}

/// Coarse health status of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            "unknown" => Ok(HealthStatus::Unknown),
            _ => Err(format!("Unknown health status: {}", s)),
        }
    }
}

/// How a dependent relies on its upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    #[default]
    Synchronous,
    Asynchronous,
    Data,
    SharedResource,
}

/// Edge attributes implied by a dependency kind when evidence does not say.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeDefaults {
    pub criticality: Criticality,
    pub health_correlation: f64,
    pub failure_propagation_secs: f64,
    pub recovery_dependency: bool,
    pub sla_impact: f64,
}

impl DependencyKind {
    /// Default edge attributes for this kind of dependency.
    pub fn defaults(&self) -> EdgeDefaults {
        match self {
            DependencyKind::Synchronous => EdgeDefaults {
                criticality: Criticality::High,
                health_correlation: 0.9,
                failure_propagation_secs: 30.0,
                recovery_dependency: true,
                sla_impact: 0.8,
            },
            DependencyKind::Asynchronous => EdgeDefaults {
                criticality: Criticality::Medium,
                health_correlation: 0.5,
                failure_propagation_secs: 300.0,
                recovery_dependency: false,
                sla_impact: 0.3,
            },
            DependencyKind::Data => EdgeDefaults {
                criticality: Criticality::High,
                health_correlation: 0.8,
                failure_propagation_secs: 60.0,
                recovery_dependency: true,
                sla_impact: 0.7,
            },
            DependencyKind::SharedResource => EdgeDefaults {
                criticality: Criticality::Medium,
                health_correlation: 0.6,
                failure_propagation_secs: 120.0,
                recovery_dependency: false,
                sla_impact: 0.5,
            },
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Synchronous => write!(f, "synchronous"),
            DependencyKind::Asynchronous => write!(f, "asynchronous"),
            DependencyKind::Data => write!(f, "data"),
            DependencyKind::SharedResource => write!(f, "shared_resource"),
        }
    }
}

impl std::str::FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "synchronous" | "sync" => Ok(DependencyKind::Synchronous),
            "asynchronous" | "async" => Ok(DependencyKind::Asynchronous),
            "data" => Ok(DependencyKind::Data),
            "shared_resource" => Ok(DependencyKind::SharedResource),
            _ => Err(format!("Unknown dependency kind: {}", s)),
        }
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Point-in-time health of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    /// Health score (0.0-1.0).
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

impl ServiceHealth {
    /// Create a health reading stamped now.
    pub fn new(status: HealthStatus, score: f64) -> Self {
        Self {
            status,
            score,
            updated_at: Utc::now(),
        }
    }

    /// Health of a service nobody has reported on yet.
    pub fn unknown() -> Self {
        Self::new(HealthStatus::Unknown, 1.0)
    }

    pub(crate) fn validate(&self) -> AppResult<()> {
        validate_unit("health.score", self.score)
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::unknown()
    }
}

/// SLA targets of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaTargets {
    /// Availability target as a fraction (e.g. 0.999).
    pub availability: f64,
    pub response_time_ms: u64,
    /// Error-rate budget as a fraction.
    pub error_rate: f64,
}

impl SlaTargets {
    /// Monthly downtime allowed by the availability target, in minutes.
    pub fn monthly_downtime_budget_minutes(&self) -> f64 {
        (1.0 - self.availability).max(0.0) * 30.0 * 24.0 * 60.0
    }
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            availability: 0.999,
            response_time_ms: 500,
            error_rate: 0.01,
        }
    }
}

/// Where and how a service is deployed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub replicas: u32,
}

/// Per-service overrides of the configured business estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_per_minute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<u64>,
}

/// A service in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    /// Unique service identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub health: ServiceHealth,
    #[serde(default)]
    pub sla: SlaTargets,
    #[serde(default)]
    pub deployment: DeploymentInfo,
    #[serde(default)]
    pub business: BusinessProfile,
    /// True when the node was auto-created from an edge endpoint.
    #[serde(default)]
    pub placeholder: bool,
}

impl ServiceNode {
    /// Create a registered service with default metadata.
    pub fn new(id: impl Into<String>, kind: ServiceKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            criticality: Criticality::default(),
            health: ServiceHealth::unknown(),
            sla: SlaTargets::default(),
            deployment: DeploymentInfo::default(),
            business: BusinessProfile::default(),
            placeholder: false,
        }
    }

    /// Minimal node standing in for an endpoint discovered before registration.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            placeholder: true,
            ..Self::new(id, ServiceKind::Unknown)
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the criticality tier.
    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Set the current health.
    pub fn with_health(mut self, health: ServiceHealth) -> Self {
        self.health = health;
        self
    }

    /// Set the business profile.
    pub fn with_business(mut self, business: BusinessProfile) -> Self {
        self.business = business;
        self
    }

    /// Reject malformed nodes before they reach the store.
    pub fn validate(&self) -> AppResult<()> {
        validate_id("id", &self.id)?;
        self.health.validate()?;
        validate_unit("sla.availability", self.sla.availability)?;
        validate_unit("sla.error_rate", self.sla.error_rate)?;
        if let Some(revenue) = self.business.revenue_per_minute {
            if !revenue.is_finite() || revenue < 0.0 {
                return Err(AppError::validation(
                    "business.revenue_per_minute",
                    "must be a non-negative number",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Edges
// ============================================================================

/// How an edge came to be known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub discovered_at: DateTime<Utc>,
    pub last_verified: DateTime<Utc>,
    /// Confidence score (0.0-1.0).
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Discovery method that produced the winning candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl Provenance {
    /// Provenance for an edge observed now.
    pub fn new(confidence: f64, evidence: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            discovered_at: now,
            last_verified: now,
            confidence,
            evidence,
            method: None,
        }
    }
}

/// Directed dependency: a failure of `from` propagates to `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDependency {
    /// Upstream service.
    pub from: String,
    /// Dependent service.
    pub to: String,
    pub kind: DependencyKind,
    pub criticality: Criticality,
    /// How closely the dependent's health follows the upstream (0.0-1.0).
    pub health_correlation: f64,
    /// Seconds between `from` failing and `to` being affected.
    pub failure_propagation_secs: f64,
    /// The dependent cannot recover until `from` has recovered.
    pub recovery_dependency: bool,
    /// Share of the dependent's SLA put at risk by this edge (0.0-1.0).
    pub sla_impact: f64,
    pub provenance: Provenance,
}

impl ServiceDependency {
    /// Create an edge whose attributes follow the dependency kind defaults.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: DependencyKind,
        confidence: f64,
    ) -> Self {
        let defaults = kind.defaults();
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            criticality: defaults.criticality,
            health_correlation: defaults.health_correlation,
            failure_propagation_secs: defaults.failure_propagation_secs,
            recovery_dependency: defaults.recovery_dependency,
            sla_impact: defaults.sla_impact,
            provenance: Provenance::new(confidence, Vec::new()),
        }
    }

    /// Override correlation and propagation time.
    pub fn with_propagation(mut self, health_correlation: f64, propagation_secs: f64) -> Self {
        self.health_correlation = health_correlation;
        self.failure_propagation_secs = propagation_secs;
        self
    }

    /// Override the edge criticality.
    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Override recovery dependency and SLA impact.
    pub fn with_recovery(mut self, recovery_dependency: bool, sla_impact: f64) -> Self {
        self.recovery_dependency = recovery_dependency;
        self.sla_impact = sla_impact;
        self
    }

    /// The `(from, to)` key.
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.from, &self.to)
    }

    /// Edge confidence (0.0-1.0).
    pub fn confidence(&self) -> f64 {
        self.provenance.confidence
    }

    /// Weight used by critical path search.
    pub fn criticality_weight(&self) -> f64 {
        self.criticality.weight() * self.health_correlation
    }

    /// Reject malformed edges before they reach the store.
    pub fn validate(&self) -> AppResult<()> {
        validate_id("from", &self.from)?;
        validate_id("to", &self.to)?;
        if self.from == self.to {
            return Err(AppError::validation("to", "self-dependencies are not allowed"));
        }
        validate_unit("confidence", self.provenance.confidence)?;
        validate_unit("health_correlation", self.health_correlation)?;
        validate_unit("sla_impact", self.sla_impact)?;
        if !self.failure_propagation_secs.is_finite() || self.failure_propagation_secs < 0.0 {
            return Err(AppError::validation(
                "failure_propagation_secs",
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Unique key of an edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: String,
    pub to: String,
}

impl EdgeKey {
    /// Build a key from endpoint ids.
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Nodes and edges of the dependency graph.
///
/// Ordered maps keep every derived view deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: BTreeMap<String, ServiceNode>,
    #[serde(with = "edge_list")]
    pub edges: BTreeMap<EdgeKey, ServiceDependency>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node.
    pub fn node(&self, id: &str) -> Option<&ServiceNode> {
        self.nodes.get(id)
    }

    /// Whether a node exists.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up an edge.
    pub fn edge(&self, from: &str, to: &str) -> Option<&ServiceDependency> {
        self.edges.get(&EdgeKey::new(from, to))
    }

    /// Edges leaving `id` (towards its dependents).
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a ServiceDependency> {
        self.edges.values().filter(move |e| e.from == id)
    }

    /// Edges entering `id` (from its upstream dependencies).
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a ServiceDependency> {
        self.edges.values().filter(move |e| e.to == id)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// Serialize the edge map as a list, since JSON object keys must be strings.
mod edge_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{EdgeKey, ServiceDependency};

    pub fn serialize<S: Serializer>(
        edges: &BTreeMap<EdgeKey, ServiceDependency>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&ServiceDependency> = edges.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<EdgeKey, ServiceDependency>, D::Error> {
        let list = Vec::<ServiceDependency>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|e| (e.key(), e)).collect())
    }
}

pub(crate) fn validate_id(field: &str, id: &str) -> AppResult<()> {
    if id.trim().is_empty() {
        return Err(AppError::validation(field, "cannot be empty"));
    }
    Ok(())
}

pub(crate) fn validate_unit(field: &str, value: f64) -> AppResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::validation(
            field,
            format!("must be within [0, 1], got {}", value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_kind_round_trip_strings() {
        for kind in [
            ServiceKind::Api,
            ServiceKind::Database,
            ServiceKind::Queue,
            ServiceKind::Cache,
            ServiceKind::Auth,
            ServiceKind::Frontend,
            ServiceKind::Worker,
        ] {
            assert_eq!(kind.as_str().parse::<ServiceKind>().unwrap(), kind);
        }
        assert!("mainframe".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn test_criticality_ordering_and_weight() {
        assert!(Criticality::Critical > Criticality::High);
        assert!(Criticality::Low < Criticality::Medium);
        assert_eq!(Criticality::Critical.weight(), 1.0);
        assert_eq!(Criticality::Low.weight(), 0.25);
    }

    #[test]
    fn test_edge_defaults_follow_kind() {
        let edge = ServiceDependency::new("db", "api", DependencyKind::Asynchronous, 0.8);
        assert_eq!(edge.health_correlation, 0.5);
        assert!(!edge.recovery_dependency);
        assert_eq!(edge.key(), EdgeKey::new("db", "api"));
        assert_eq!(edge.key().to_string(), "db->api");
    }

    #[test]
    fn test_edge_validation() {
        let edge = ServiceDependency::new("a", "b", DependencyKind::Synchronous, 1.2);
        assert!(matches!(edge.validate(), Err(AppError::Validation { .. })));

        let edge = ServiceDependency::new("a", "a", DependencyKind::Synchronous, 0.9);
        assert!(edge.validate().is_err());

        let edge = ServiceDependency::new("", "b", DependencyKind::Synchronous, 0.9);
        assert!(edge.validate().is_err());

        let edge = ServiceDependency::new("a", "b", DependencyKind::Data, 0.9);
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_node_validation() {
        assert!(ServiceNode::new("  ", ServiceKind::Api).validate().is_err());

        let node = ServiceNode::new("api", ServiceKind::Api)
            .with_health(ServiceHealth::new(HealthStatus::Healthy, 1.5));
        assert!(node.validate().is_err());

        assert!(ServiceNode::new("api", ServiceKind::Api).validate().is_ok());
    }

    #[test]
    fn test_placeholder_node() {
        let node = ServiceNode::placeholder("ghost");
        assert!(node.placeholder);
        assert_eq!(node.kind, ServiceKind::Unknown);
        assert_eq!(node.name, "ghost");
    }

    #[test]
    fn test_sla_downtime_budget() {
        let sla = SlaTargets {
            availability: 0.999,
            ..SlaTargets::default()
        };
        assert!((sla.monthly_downtime_budget_minutes() - 43.2).abs() < 1e-6);
    }

    #[test]
    fn test_graph_serializes_edges_as_list() {
        let mut graph = DependencyGraph::new();
        let edge = ServiceDependency::new("a", "b", DependencyKind::Synchronous, 0.9);
        graph.edges.insert(edge.key(), edge);

        let json = serde_json::to_value(&graph).unwrap();
        assert!(json["edges"].is_array());

        let back: DependencyGraph = serde_json::from_value(json).unwrap();
        assert_eq!(back, graph);
    }
}
