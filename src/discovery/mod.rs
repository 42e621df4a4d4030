//! Dependency discovery.
//!
//! A discovery run asks every configured [`EvidenceSource`] about one service
//! concurrently, merges the candidate edges they return and writes the
//! survivors into the [`GraphStore`]. A source that fails or runs past its
//! timeout is logged and left out; the run still succeeds with whatever the
//! other sources produced.

mod scheduler;
mod sources;

pub use scheduler::run_discovery_loop;
pub use sources::{HttpEvidenceSource, Manifest, ManifestService, ManifestSource};

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{AppResult, EvidenceError, EvidenceResult};
use crate::graph::{
    validate_id, Criticality, DependencyKind, EdgeKey, GraphStore, Provenance, ServiceDependency,
};

// ============================================================================
// Evidence sources
// ============================================================================

fn default_confidence() -> f64 {
    0.9
}

/// An edge proposed by an evidence source.
///
/// Attributes a source does not know are filled from the dependency kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: DependencyKind,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_correlation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_propagation_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_dependency: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_impact: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl CandidateEdge {
    /// Candidate with kind defaults for every optional attribute.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: DependencyKind,
        confidence: f64,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            confidence,
            criticality: None,
            health_correlation: None,
            failure_propagation_secs: None,
            recovery_dependency: None,
            sla_impact: None,
            evidence: Vec::new(),
        }
    }

    /// Attach a piece of evidence.
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    /// Materialize the candidate as an edge attributed to `method`.
    pub fn into_dependency(self, method: &str) -> ServiceDependency {
        let defaults = self.kind.defaults();
        let mut provenance = Provenance::new(self.confidence, self.evidence);
        provenance.method = Some(method.to_string());

        ServiceDependency {
            from: self.from,
            to: self.to,
            kind: self.kind,
            criticality: self.criticality.unwrap_or(defaults.criticality),
            health_correlation: self
                .health_correlation
                .unwrap_or(defaults.health_correlation),
            failure_propagation_secs: self
                .failure_propagation_secs
                .unwrap_or(defaults.failure_propagation_secs),
            recovery_dependency: self
                .recovery_dependency
                .unwrap_or(defaults.recovery_dependency),
            sla_impact: self.sla_impact.unwrap_or(defaults.sla_impact),
            provenance,
        }
    }
}

/// A feed of candidate dependency edges.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Method name reported in discovery outcomes, e.g. `network_flow`.
    fn method(&self) -> &str;

    /// Candidate edges touching `service_id`.
    async fn discover(&self, service_id: &str) -> EvidenceResult<Vec<CandidateEdge>>;
}

// ============================================================================
// Discovery
// ============================================================================

/// Result of one discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    pub service_id: String,
    /// Accepted edges after merging.
    pub edges: Vec<ServiceDependency>,
    /// Mean confidence of the accepted edges, 0 when none.
    pub confidence: f64,
    /// Sources that answered with at least one candidate.
    pub methods_used: Vec<String>,
    /// Sources that errored or timed out.
    pub failed_methods: Vec<String>,
    /// Edges whose stored version changed.
    pub edges_written: usize,
    pub discovered_at: DateTime<Utc>,
}

/// Fans out to evidence sources and merges what they return.
pub struct DependencyDiscovery {
    sources: Vec<Arc<dyn EvidenceSource>>,
    store: Arc<GraphStore>,
    source_timeout: Duration,
    min_confidence: f64,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Clears a service's in-flight mark when dropped.
struct InFlightGuard {
    service_id: String,
    registry: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.registry.lock() {
            set.remove(&self.service_id);
        }
    }
}

impl DependencyDiscovery {
    /// Create a discovery runner over `sources`.
    pub fn new(
        sources: Vec<Arc<dyn EvidenceSource>>,
        store: Arc<GraphStore>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            sources,
            store,
            source_timeout: Duration::from_millis(config.source_timeout_ms),
            min_confidence: config.min_confidence,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of configured sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Whether a run for `service_id` is currently executing.
    pub fn is_in_flight(&self, service_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(service_id))
            .unwrap_or(false)
    }

    fn try_begin(&self, service_id: &str) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(service_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            service_id: service_id.to_string(),
            registry: self.in_flight.clone(),
        })
    }

    /// Run discovery unless a run for the same service is already executing.
    pub async fn discover_if_idle(&self, service_id: &str) -> AppResult<Option<DiscoveryOutcome>> {
        validate_id("service_id", service_id)?;
        match self.try_begin(service_id) {
            Some(_guard) => self.run(service_id).await.map(Some),
            None => {
                debug!(service_id = %service_id, "Discovery already in flight, skipping");
                Ok(None)
            }
        }
    }

    /// Discover dependencies of `service_id` and write them to the store.
    pub async fn discover(&self, service_id: &str) -> AppResult<DiscoveryOutcome> {
        validate_id("service_id", service_id)?;
        let _guard = self.try_begin(service_id);
        self.run(service_id).await
    }

    async fn run(&self, service_id: &str) -> AppResult<DiscoveryOutcome> {
        let start = Instant::now();
        let mut tasks = JoinSet::new();

        for (index, source) in self.sources.iter().enumerate() {
            let source = source.clone();
            let service_id = service_id.to_string();
            let timeout = self.source_timeout;
            tasks.spawn(async move {
                let method = source.method().to_string();
                let result = match tokio::time::timeout(timeout, source.discover(&service_id)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(EvidenceError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                (index, method, result)
            });
        }

        let mut answers = Vec::with_capacity(self.sources.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(answer) => answers.push(answer),
                Err(e) => warn!(service_id = %service_id, error = %e, "Evidence task aborted"),
            }
        }
        // Source order, not completion order, decides confidence ties.
        answers.sort_by_key(|(index, _, _)| *index);

        let mut methods_used = Vec::new();
        let mut failed_methods = Vec::new();
        let mut candidates = Vec::new();

        for (_, method, result) in answers {
            match result {
                Ok(found) => {
                    debug!(
                        service_id = %service_id,
                        method = %method,
                        candidates = found.len(),
                        "Evidence source answered"
                    );
                    if !found.is_empty() {
                        methods_used.push(method.clone());
                    }
                    candidates.extend(found.into_iter().map(|c| (method.clone(), c)));
                }
                Err(e) => {
                    warn!(
                        service_id = %service_id,
                        method = %method,
                        error = %e,
                        "Evidence source failed, skipping"
                    );
                    failed_methods.push(method);
                }
            }
        }

        methods_used.sort();
        methods_used.dedup();
        failed_methods.sort();

        let edges = merge_candidates(candidates, self.min_confidence);
        let confidence = if edges.is_empty() {
            0.0
        } else {
            edges.iter().map(ServiceDependency::confidence).sum::<f64>() / edges.len() as f64
        };

        let edges_written = if edges.is_empty() {
            0
        } else {
            self.store
                .upsert_edges(edges.clone())
                .await?
                .into_iter()
                .filter(|outcome| *outcome != crate::graph::EdgeUpsert::Ignored)
                .count()
        };

        info!(
            service_id = %service_id,
            edges = edges.len(),
            edges_written,
            confidence,
            methods = ?methods_used,
            failed = failed_methods.len(),
            latency_ms = start.elapsed().as_millis(),
            "Dependency discovery completed"
        );

        Ok(DiscoveryOutcome {
            service_id: service_id.to_string(),
            edges,
            confidence,
            methods_used,
            failed_methods,
            edges_written,
            discovered_at: Utc::now(),
        })
    }
}

/// Group candidates by `(from, to)`, keep the most confident of each group and
/// drop groups at or below `min_confidence`.
///
/// Evidence from every candidate in a group is kept on the winner.
pub fn merge_candidates(
    candidates: Vec<(String, CandidateEdge)>,
    min_confidence: f64,
) -> Vec<ServiceDependency> {
    let mut groups: BTreeMap<EdgeKey, (String, CandidateEdge, Vec<String>)> = BTreeMap::new();

    for (method, candidate) in candidates {
        let probe = candidate.clone().into_dependency(&method);
        if let Err(e) = probe.validate() {
            warn!(
                method = %method,
                from = %candidate.from,
                to = %candidate.to,
                error = %e,
                "Dropping invalid candidate edge"
            );
            continue;
        }

        let key = probe.key();
        match groups.get_mut(&key) {
            Some((best_method, best, evidence)) => {
                evidence.extend(candidate.evidence.iter().cloned());
                if candidate.confidence > best.confidence {
                    *best_method = method;
                    *best = candidate;
                }
            }
            None => {
                let evidence = candidate.evidence.clone();
                groups.insert(key, (method, candidate, evidence));
            }
        }
    }

    groups
        .into_values()
        .filter(|(_, best, _)| best.confidence > min_confidence)
        .map(|(method, mut best, mut evidence)| {
            evidence.sort();
            evidence.dedup();
            best.evidence = evidence;
            best.into_dependency(&method)
        })
        .collect()
}
