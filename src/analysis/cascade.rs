use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{MitigationAction, Trigger};
use crate::config::{CascadeConfig, ForecastingConfig};
use crate::forecasting::{Forecast, ForecastOptions, ForecastingProvider};
use crate::graph::{DependencyGraph, GraphSnapshot, ServiceDependency};

/// A service on a path whose isolation would break the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub service_id: String,
    pub action: MitigationAction,
}

/// One way a failure can travel from the trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationPath {
    /// Trigger first.
    pub services: Vec<String>,
    pub probability: f64,
    /// Sum of edge propagation times along the path.
    pub cumulative_secs: f64,
    pub checkpoints: Vec<Checkpoint>,
}

impl PropagationPath {
    /// Last service on the path.
    pub fn target(&self) -> &str {
        self.services.last().map(String::as_str).unwrap_or_default()
    }

    /// Number of edges traversed.
    pub fn hops(&self) -> usize {
        self.services.len().saturating_sub(1)
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.iter().any(|s| s == service_id)
    }
}

/// Every enumerated path, ranked.
#[derive(Debug, Clone, Default)]
pub struct CascadePrediction {
    /// All enumerated paths, best first.
    pub paths: Vec<PropagationPath>,
    /// Factor applied to every raw probability product.
    pub forecast_factor: f64,
    pub forecast: Option<Forecast>,
    pub truncated: bool,
}

impl CascadePrediction {
    /// The `n` most probable paths.
    pub fn top(&self, n: usize) -> Vec<PropagationPath> {
        self.paths.iter().take(n).cloned().collect()
    }

    pub fn forecast_applied(&self) -> bool {
        self.forecast.is_some()
    }
}

/// Walks the graph from a trigger and scores propagation paths.
pub struct CascadePredictor {
    config: CascadeConfig,
    forecaster: Option<Arc<dyn ForecastingProvider>>,
    options: ForecastOptions,
    forecast_timeout: Duration,
}

impl CascadePredictor {
    /// Create a predictor; without a forecaster every analysis is static.
    pub fn new(
        config: CascadeConfig,
        forecasting: &ForecastingConfig,
        forecaster: Option<Arc<dyn ForecastingProvider>>,
    ) -> Self {
        Self {
            config,
            forecaster,
            options: ForecastOptions::from(forecasting),
            forecast_timeout: Duration::from_millis(forecasting.timeout_ms),
        }
    }

    /// Predict propagation from `trigger` over `snapshot`.
    ///
    /// `history` is the trigger's recent health series, oldest first. Never
    /// fails: forecasting problems fall back to the raw correlation product.
    pub async fn predict(
        &self,
        snapshot: &GraphSnapshot,
        trigger: &Trigger,
        history: &[f64],
    ) -> CascadePrediction {
        let start = Instant::now();
        let (raw_paths, truncated) = enumerate_paths(
            &snapshot.graph,
            &trigger.service_id,
            self.config.max_depth,
            self.config.max_enumerated_paths,
        );
        if truncated {
            warn!(
                service_id = %trigger.service_id,
                limit = self.config.max_enumerated_paths,
                "Path enumeration truncated"
            );
        }

        let forecast = if raw_paths.is_empty() {
            None
        } else {
            let series = if history.is_empty() {
                snapshot
                    .node(&trigger.service_id)
                    .map(|n| vec![n.health.score])
                    .unwrap_or_default()
            } else {
                history.to_vec()
            };
            self.forecast(&trigger.service_id, &series).await
        };
        let forecast_factor = forecast
            .map(|f| (1.0 - self.config.forecast_weight * (1.0 - f.confidence)).clamp(0.0, 1.0))
            .unwrap_or(1.0);

        let mut paths: Vec<PropagationPath> = raw_paths
            .into_iter()
            .map(|edges| self.score(snapshot, &trigger.service_id, &edges, forecast_factor))
            .collect();
        paths.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.cumulative_secs.total_cmp(&b.cumulative_secs))
                .then_with(|| a.services.cmp(&b.services))
        });

        info!(
            service_id = %trigger.service_id,
            paths = paths.len(),
            forecast_factor,
            latency_ms = start.elapsed().as_millis(),
            "Cascade prediction completed"
        );

        CascadePrediction {
            paths,
            forecast_factor,
            forecast,
            truncated,
        }
    }

    fn score(
        &self,
        snapshot: &GraphSnapshot,
        trigger_id: &str,
        edges: &[&ServiceDependency],
        forecast_factor: f64,
    ) -> PropagationPath {
        let mut services = Vec::with_capacity(edges.len() + 1);
        services.push(trigger_id.to_string());
        let mut raw = 1.0;
        let mut cumulative_secs = 0.0;
        let mut checkpoints = Vec::with_capacity(edges.len());

        for edge in edges {
            raw *= edge.health_correlation;
            cumulative_secs += edge.failure_propagation_secs;
            services.push(edge.to.clone());
            let kind = snapshot.node(&edge.to).map(|n| n.kind).unwrap_or_default();
            checkpoints.push(Checkpoint {
                service_id: edge.to.clone(),
                action: MitigationAction::for_kind(kind),
            });
        }

        PropagationPath {
            services,
            probability: (raw * forecast_factor).min(self.config.probability_cap),
            cumulative_secs,
            checkpoints,
        }
    }

    async fn forecast(&self, service_id: &str, series: &[f64]) -> Option<Forecast> {
        let forecaster = self.forecaster.as_ref()?;
        match tokio::time::timeout(self.forecast_timeout, forecaster.predict(series, &self.options))
            .await
        {
            Ok(Ok(forecast)) if (0.0..=1.0).contains(&forecast.confidence) => {
                debug!(
                    service_id = %service_id,
                    confidence = forecast.confidence,
                    "Forecast received"
                );
                Some(forecast)
            }
            Ok(Ok(forecast)) => {
                warn!(
                    service_id = %service_id,
                    confidence = forecast.confidence,
                    "Forecast confidence out of range, using static analysis"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(
                    service_id = %service_id,
                    error = %e,
                    "Forecasting unavailable, using static analysis"
                );
                None
            }
            Err(_) => {
                warn!(
                    service_id = %service_id,
                    timeout_ms = self.forecast_timeout.as_millis(),
                    "Forecast timed out, using static analysis"
                );
                None
            }
        }
    }
}

/// Every simple path from `start` of at most `max_depth` edges.
///
/// Each prefix of a longer path is reported as a path of its own, and always
/// before its extensions. Returns the edge sequences and whether `max_paths`
/// cut the enumeration short.
pub fn enumerate_paths<'a>(
    graph: &'a DependencyGraph,
    start: &str,
    max_depth: usize,
    max_paths: usize,
) -> (Vec<Vec<&'a ServiceDependency>>, bool) {
    let mut adjacency: BTreeMap<&str, Vec<&ServiceDependency>> = BTreeMap::new();
    for edge in graph.edges.values() {
        adjacency.entry(edge.from.as_str()).or_default().push(edge);
    }

    let mut paths = Vec::new();
    let mut stack: Vec<Vec<&ServiceDependency>> = vec![Vec::new()];

    while let Some(path) = stack.pop() {
        if path.len() >= max_depth {
            continue;
        }
        let tail = path.last().map(|e| e.to.as_str()).unwrap_or(start);
        let Some(next) = adjacency.get(tail) else {
            continue;
        };

        let mut extensions = Vec::new();
        for edge in next {
            let revisits = edge.to == start || path.iter().any(|e| e.to == edge.to);
            if revisits {
                continue;
            }
            if paths.len() >= max_paths {
                return (paths, true);
            }
            let mut extended = path.clone();
            extended.push(*edge);
            paths.push(extended.clone());
            extensions.push(extended);
        }
        // Reverse so the stack pops extensions in edge order.
        stack.extend(extensions.into_iter().rev());
    }

    (paths, false)
}
