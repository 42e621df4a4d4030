use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{BlastRadius, ServiceReach, Severity, Trigger};
use crate::config::ImpactConfig;
use crate::graph::{GraphSnapshot, ServiceKind, ServiceNode};

/// How hard a single service is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    Minimal,
    Moderate,
    Severe,
}

impl ImpactSeverity {
    /// Weight applied to the service's user count.
    pub fn weight(&self) -> f64 {
        match self {
            ImpactSeverity::Minimal => 0.1,
            ImpactSeverity::Moderate => 0.5,
            ImpactSeverity::Severe => 1.0,
        }
    }

    fn from_trigger(severity: Severity) -> Self {
        match severity {
            Severity::Critical | Severity::High => ImpactSeverity::Severe,
            Severity::Medium => ImpactSeverity::Moderate,
            Severity::Low => ImpactSeverity::Minimal,
        }
    }

    fn from_probability(probability: f64) -> Self {
        if probability >= 0.7 {
            ImpactSeverity::Severe
        } else if probability >= 0.3 {
            ImpactSeverity::Moderate
        } else {
            ImpactSeverity::Minimal
        }
    }
}

/// Impact on one affected service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceImpact {
    pub service_id: String,
    /// Blast radius tier; `None` for the trigger and beyond-horizon services.
    pub tier: Option<u8>,
    pub directly_affected: bool,
    pub severity: ImpactSeverity,
    pub recovery_minutes: f64,
    /// SLA-impact coefficient of the edge the failure arrives through.
    pub sla_impact: f64,
    /// Whether recovery waits on the upstream it arrives from.
    pub recovery_dependency: bool,
    pub revenue_at_risk: f64,
    pub users_affected: f64,
    /// Recovery outlasts the service's monthly downtime budget.
    pub exceeds_sla_budget: bool,
}

/// Services hit immediately and their recovery estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImmediateImpact {
    /// The trigger and its one-hop dependents.
    pub directly_affected: Vec<String>,
    /// Estimated recovery minutes per affected service.
    pub recovery_estimates: BTreeMap<String, f64>,
}

/// Aggregate business cost of an analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessImpact {
    pub users_affected: u64,
    pub revenue_at_risk: f64,
    /// Highest SLA impact among tier 1 services that cannot recover independently.
    pub sla_breach_risk: f64,
    pub operational_cost: f64,
    pub services_breaching_sla: Vec<String>,
}

/// Converts technical reach into recovery time and business cost.
pub struct ImpactAnalyzer {
    config: ImpactConfig,
}

/// Base recovery minutes for a kind of service at medium severity.
fn base_recovery_minutes(kind: ServiceKind) -> f64 {
    match kind {
        ServiceKind::Api => 5.0,
        ServiceKind::Database => 30.0,
        ServiceKind::Queue => 15.0,
        ServiceKind::Cache => 5.0,
        ServiceKind::Auth => 10.0,
        ServiceKind::Frontend => 5.0,
        ServiceKind::Worker => 10.0,
        ServiceKind::Unknown => 15.0,
    }
}

impl ImpactAnalyzer {
    pub fn new(config: ImpactConfig) -> Self {
        Self { config }
    }

    /// Own recovery time of a service, ignoring what it waits on.
    fn own_recovery(&self, snapshot: &GraphSnapshot, service_id: &str, severity: Severity) -> f64 {
        let kind = snapshot
            .node(service_id)
            .map(|n| n.kind)
            .unwrap_or_default();
        base_recovery_minutes(kind) * severity.recovery_multiplier()
    }

    /// Recovery time at the end of `path`, adding an upstream's recovery
    /// wherever the edge between them is a recovery dependency.
    fn path_recovery(&self, snapshot: &GraphSnapshot, path: &[String], severity: Severity) -> f64 {
        let mut recovery = 0.0;
        for (i, service) in path.iter().enumerate() {
            let own = self.own_recovery(snapshot, service, severity);
            let waits = i > 0
                && snapshot
                    .graph
                    .edge(&path[i - 1], service)
                    .map(|e| e.recovery_dependency)
                    .unwrap_or(false);
            recovery = if waits { own + recovery } else { own };
        }
        recovery
    }

    fn revenue_per_minute(&self, node: Option<&ServiceNode>) -> f64 {
        match node {
            Some(n) => n
                .business
                .revenue_per_minute
                .unwrap_or(self.config.revenue_per_minute * n.criticality.weight()),
            None => self.config.revenue_per_minute,
        }
    }

    fn users(&self, node: Option<&ServiceNode>) -> f64 {
        match node {
            Some(n) => n
                .business
                .users
                .map(|u| u as f64)
                .unwrap_or(self.config.users_per_service as f64 * n.criticality.weight()),
            None => self.config.users_per_service as f64,
        }
    }

    fn service_impact(
        &self,
        snapshot: &GraphSnapshot,
        trigger: &Trigger,
        reach: Option<&ServiceReach>,
        service_id: &str,
        directly_affected: bool,
    ) -> ServiceImpact {
        let node = snapshot.node(service_id);

        let (recovery_minutes, sla_impact, recovery_dependency, tier, probability) = match reach {
            Some(r) => {
                let incoming = r.via().and_then(|via| snapshot.graph.edge(via, service_id));
                (
                    self.path_recovery(snapshot, &r.best_path, trigger.severity),
                    incoming.map(|e| e.sla_impact).unwrap_or(0.0),
                    incoming.map(|e| e.recovery_dependency).unwrap_or(false),
                    r.tier,
                    r.probability,
                )
            }
            None => (
                self.own_recovery(snapshot, service_id, trigger.severity),
                1.0,
                false,
                None,
                1.0,
            ),
        };

        let severity = if directly_affected {
            ImpactSeverity::from_trigger(trigger.severity)
        } else {
            ImpactSeverity::from_probability(probability)
        };
        let revenue_at_risk = self.revenue_per_minute(node) * recovery_minutes * sla_impact;
        let users_affected = self.users(node) * severity.weight();
        let exceeds_sla_budget = node
            .map(|n| recovery_minutes > n.sla.monthly_downtime_budget_minutes())
            .unwrap_or(false);

        ServiceImpact {
            service_id: service_id.to_string(),
            tier,
            directly_affected,
            severity,
            recovery_minutes,
            sla_impact,
            recovery_dependency,
            revenue_at_risk,
            users_affected,
            exceeds_sla_budget,
        }
    }

    /// Score every affected service and aggregate the totals.
    ///
    /// Affected services are the trigger, its one-hop dependents and every
    /// service in tiers 1 to 3.
    pub fn analyze(
        &self,
        snapshot: &GraphSnapshot,
        trigger: &Trigger,
        blast_radius: &BlastRadius,
    ) -> (ImmediateImpact, Vec<ServiceImpact>, BusinessImpact) {
        let mut impacts = vec![self.service_impact(
            snapshot,
            trigger,
            None,
            &trigger.service_id,
            true,
        )];

        for reach in &blast_radius.reach {
            let direct = reach.hops == 1;
            if reach.tier.is_none() && !direct {
                continue;
            }
            impacts.push(self.service_impact(
                snapshot,
                trigger,
                Some(reach),
                &reach.service_id,
                direct,
            ));
        }

        let immediate = ImmediateImpact {
            directly_affected: impacts
                .iter()
                .filter(|i| i.directly_affected)
                .map(|i| i.service_id.clone())
                .collect(),
            recovery_estimates: impacts
                .iter()
                .map(|i| (i.service_id.clone(), i.recovery_minutes))
                .collect(),
        };

        let sla_breach_risk = impacts
            .iter()
            .filter(|i| i.tier == Some(1) && i.recovery_dependency)
            .map(|i| i.sla_impact)
            .fold(0.0_f64, f64::max);

        let business = BusinessImpact {
            users_affected: impacts.iter().map(|i| i.users_affected).sum::<f64>().round() as u64,
            revenue_at_risk: impacts.iter().map(|i| i.revenue_at_risk).sum(),
            sla_breach_risk,
            operational_cost: impacts.iter().map(|i| i.recovery_minutes).sum::<f64>()
                * self.config.operational_cost_per_minute,
            services_breaching_sla: impacts
                .iter()
                .filter(|i| i.exceeds_sla_budget)
                .map(|i| i.service_id.clone())
                .collect(),
        };

        (immediate, impacts, business)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{BlastRadiusCalculator, PropagationPath, TriggerEvent};
    use crate::config::BlastRadiusConfig;
    use crate::graph::{
        BusinessProfile, Criticality, DependencyKind, GraphStore, ServiceDependency,
    };
    use std::sync::Arc;

    async fn scenario() -> Arc<GraphSnapshot> {
        let store = GraphStore::new();
        store
            .upsert_node(ServiceNode::new("auth", ServiceKind::Auth))
            .await
            .unwrap();
        store
            .upsert_node(
                ServiceNode::new("api", ServiceKind::Api)
                    .with_criticality(Criticality::Critical)
                    .with_business(BusinessProfile {
                        revenue_per_minute: Some(200.0),
                        users: Some(5000),
                    }),
            )
            .await
            .unwrap();
        store
            .upsert_node(ServiceNode::new("db", ServiceKind::Database))
            .await
            .unwrap();
        store
            .upsert_edges(vec![
                ServiceDependency::new("auth", "api", DependencyKind::Synchronous, 0.9)
                    .with_propagation(0.95, 30.0),
                ServiceDependency::new("api", "db", DependencyKind::Asynchronous, 0.9)
                    .with_propagation(0.98, 10.0),
            ])
            .await
            .unwrap();
        store.snapshot().await
    }

    fn paths() -> Vec<PropagationPath> {
        vec![
            PropagationPath {
                services: vec!["auth".into(), "api".into()],
                probability: 0.95,
                cumulative_secs: 30.0,
                checkpoints: Vec::new(),
            },
            PropagationPath {
                services: vec!["auth".into(), "api".into(), "db".into()],
                probability: 0.931,
                cumulative_secs: 40.0,
                checkpoints: Vec::new(),
            },
        ]
    }

    #[tokio::test]
    async fn test_recovery_follows_recovery_dependencies() {
        let snapshot = scenario().await;
        let radius = BlastRadiusCalculator::new(&BlastRadiusConfig::default()).calculate(&paths());
        let trigger = Trigger::new("auth", TriggerEvent::Failure, Severity::Critical);

        let analyzer = ImpactAnalyzer::new(ImpactConfig::default());
        let (immediate, impacts, business) = analyzer.analyze(&snapshot, &trigger, &radius);

        assert_eq!(immediate.directly_affected, vec!["auth", "api"]);
        // auth 10 * 2 = 20; api waits on auth: 5 * 2 + 20 = 30.
        assert_eq!(immediate.recovery_estimates["auth"], 20.0);
        assert_eq!(immediate.recovery_estimates["api"], 30.0);
        // api -> db is asynchronous: db recovers on its own, 30 * 2.
        assert_eq!(immediate.recovery_estimates["db"], 60.0);

        let api = impacts.iter().find(|i| i.service_id == "api").unwrap();
        assert_eq!(api.severity, ImpactSeverity::Severe);
        assert_eq!(api.sla_impact, 0.8);
        assert_eq!(api.revenue_at_risk, 200.0 * 30.0 * 0.8);
        assert_eq!(api.users_affected, 5000.0);

        let db = impacts.iter().find(|i| i.service_id == "db").unwrap();
        assert!(!db.directly_affected);
        assert_eq!(db.tier, Some(2));
        assert_eq!(db.severity, ImpactSeverity::Severe);

        assert_eq!(business.sla_breach_risk, 0.8);
        assert_eq!(business.operational_cost, (20.0 + 30.0 + 60.0) * 25.0);
        // Default SLA allows 43.2 minutes a month.
        assert_eq!(business.services_breaching_sla, vec!["db"]);
    }

    #[tokio::test]
    async fn test_lonely_trigger_only_counts_itself() {
        let snapshot = scenario().await;
        let trigger = Trigger::new("db", TriggerEvent::Degradation, Severity::Low);
        let analyzer = ImpactAnalyzer::new(ImpactConfig::default());
        let (immediate, impacts, business) =
            analyzer.analyze(&snapshot, &trigger, &BlastRadius::default());

        assert_eq!(immediate.directly_affected, vec!["db"]);
        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].severity, ImpactSeverity::Minimal);
        assert_eq!(impacts[0].recovery_minutes, 15.0);
        assert_eq!(business.sla_breach_risk, 0.0);
        // 1000 users * medium weight 0.5 * minimal 0.1
        assert_eq!(business.users_affected, 50);
    }

    #[test]
    fn test_severity_from_probability() {
        assert_eq!(ImpactSeverity::from_probability(0.7), ImpactSeverity::Severe);
        assert_eq!(ImpactSeverity::from_probability(0.3), ImpactSeverity::Moderate);
        assert_eq!(ImpactSeverity::from_probability(0.29), ImpactSeverity::Minimal);
    }
}
