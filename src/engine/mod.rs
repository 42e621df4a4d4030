//! The public facade.
//!
//! [`ImpactEngine`] owns one [`GraphStore`] and wires discovery, the analysis
//! pipeline, the forecaster and the event bus around it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{
    BlastRadiusCalculator, CascadeAnalysis, CascadePredictor, DependencyHealthAnalyzer,
    DependencyHealthReport, ImpactAnalysisResult, ImpactAnalyzer, MitigationStrategyGenerator,
    Severity, Trigger, TriggerEvent,
};
use crate::config::{Config, StorageBackend};
use crate::discovery::{
    run_discovery_loop, DependencyDiscovery, DiscoveryOutcome, EvidenceSource,
    HttpEvidenceSource, Manifest, ManifestSource,
};
use crate::error::{AppError, AppResult};
use crate::events::{
    EventBus, LoggingEventBus, DEPENDENCIES_DISCOVERED, IMPACT_ANALYSIS_COMPLETED, SERVICE_ADDED,
    SERVICE_REMOVED,
};
use crate::forecasting::{ForecastOptions, ForecastingProvider, HttpForecastingClient};
use crate::graph::{
    validate_id, EdgeUpsert, GraphSnapshot, GraphStore, NodeUpsert, RemovedService,
    ServiceDependency, ServiceHealth, ServiceNode,
};
use crate::storage::{GraphRepository, MemoryRepository, SqliteRepository};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AnalysisKey {
    service_id: String,
    event: TriggerEvent,
    severity: Severity,
    graph_version: u64,
}

/// Service cascade impact engine.
pub struct ImpactEngine {
    config: Config,
    store: Arc<GraphStore>,
    discovery: Arc<DependencyDiscovery>,
    predictor: CascadePredictor,
    blast_radius: BlastRadiusCalculator,
    impact: ImpactAnalyzer,
    forecaster: Option<Arc<dyn ForecastingProvider>>,
    events: Arc<dyn EventBus>,
    by_trigger: Cache<AnalysisKey, Arc<ImpactAnalysisResult>>,
    by_id: Cache<String, Arc<ImpactAnalysisResult>>,
}

impl ImpactEngine {
    /// Create an engine over `store` with no forecaster, no evidence sources
    /// and a logging event bus.
    pub fn new(config: Config, store: Arc<GraphStore>) -> Self {
        let ttl = Duration::from_secs(config.cache.ttl_secs);
        let by_trigger = Cache::builder()
            .max_capacity(config.cache.max_entries)
            .time_to_live(ttl)
            .build();
        let by_id = Cache::builder()
            .max_capacity(config.cache.max_entries)
            .time_to_live(ttl)
            .build();

        Self {
            discovery: Arc::new(DependencyDiscovery::new(
                Vec::new(),
                store.clone(),
                &config.discovery,
            )),
            predictor: CascadePredictor::new(config.cascade.clone(), &config.forecasting, None),
            blast_radius: BlastRadiusCalculator::new(&config.blast_radius),
            impact: ImpactAnalyzer::new(config.impact.clone()),
            forecaster: None,
            events: Arc::new(LoggingEventBus),
            by_trigger,
            by_id,
            store,
            config,
        }
    }

    /// Use `forecaster` to scale cascade probabilities and for health insights.
    pub fn with_forecaster(mut self, forecaster: Arc<dyn ForecastingProvider>) -> Self {
        self.predictor = CascadePredictor::new(
            self.config.cascade.clone(),
            &self.config.forecasting,
            Some(forecaster.clone()),
        );
        self.forecaster = Some(forecaster);
        self
    }

    /// Replace the evidence sources used by discovery.
    pub fn with_sources(mut self, sources: Vec<Arc<dyn EvidenceSource>>) -> Self {
        self.discovery = Arc::new(DependencyDiscovery::new(
            sources,
            self.store.clone(),
            &self.config.discovery,
        ));
        self
    }

    /// Publish events on `events` instead of logging them.
    pub fn with_event_bus(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Build a fully wired engine from configuration.
    ///
    /// Opens the configured repository, connects the forecasting service and
    /// evidence feeds that are configured, and seeds services declared in the
    /// dependency manifest.
    pub async fn from_config(config: Config) -> AppResult<Self> {
        let repository: Arc<dyn GraphRepository> = match config.database.backend {
            StorageBackend::Memory => Arc::new(MemoryRepository::new()),
            StorageBackend::Sqlite => Arc::new(SqliteRepository::new(&config.database).await?),
        };
        let store = Arc::new(GraphStore::open(repository).await?);

        let mut sources: Vec<Arc<dyn EvidenceSource>> = Vec::new();
        if let Some(path) = &config.discovery.manifest_path {
            sources.push(Arc::new(ManifestSource::new(path.clone())));
        }
        for (method, url) in &config.discovery.evidence_endpoints {
            sources.push(Arc::new(HttpEvidenceSource::new(
                method.clone(),
                url,
                &config.request,
            )?));
        }

        let forecaster: Option<Arc<dyn ForecastingProvider>> = match &config.forecasting.base_url
        {
            Some(url) => Some(Arc::new(HttpForecastingClient::new(
                url,
                config.forecasting.api_key.clone(),
                config.request.clone(),
            )?)),
            None => {
                info!("No forecasting service configured, cascade analysis will be static");
                None
            }
        };

        let manifest_path = config.discovery.manifest_path.clone();
        let mut engine = Self::new(config, store).with_sources(sources);
        if let Some(forecaster) = forecaster {
            engine = engine.with_forecaster(forecaster);
        }

        if let Some(path) = manifest_path {
            engine.seed_from_manifest(&path).await?;
        }

        Ok(engine)
    }

    /// Register services declared in a manifest that are not yet known.
    ///
    /// Placeholder nodes are replaced; registered services keep their state.
    pub async fn seed_from_manifest(&self, path: &std::path::Path) -> AppResult<usize> {
        let manifest = Manifest::load(path).await?;
        let snapshot = self.store.snapshot().await;
        let mut seeded = 0;

        for service in manifest.services {
            let known = snapshot
                .node(&service.id)
                .map(|n| !n.placeholder)
                .unwrap_or(false);
            if known {
                continue;
            }
            self.store.upsert_node(service.into()).await?;
            seeded += 1;
        }

        info!(path = %path.display(), seeded, "Services seeded from manifest");
        Ok(seeded)
    }

    /// Start periodic discovery if it is enabled and any source is configured.
    pub fn spawn_discovery_loop(&self) -> Option<JoinHandle<()>> {
        if !self.config.discovery.enabled || self.discovery.source_count() == 0 {
            return None;
        }
        Some(tokio::spawn(run_discovery_loop(
            self.discovery.clone(),
            self.store.clone(),
            self.events.clone(),
            Duration::from_secs(self.config.discovery.interval_secs),
        )))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying graph store.
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Predict the cascade of an event on `service_id` and its impact.
    ///
    /// Repeated calls for the same trigger against an unchanged graph return
    /// the cached result.
    pub async fn analyze_service_impact(
        &self,
        service_id: &str,
        event: TriggerEvent,
        severity: Severity,
    ) -> AppResult<Arc<ImpactAnalysisResult>> {
        validate_id("service_id", service_id)?;
        let snapshot = self.store.snapshot().await;
        if !snapshot.contains(service_id) {
            return Err(AppError::not_found(service_id));
        }

        let key = AnalysisKey {
            service_id: service_id.to_string(),
            event,
            severity,
            graph_version: snapshot.version,
        };
        if let Some(cached) = self.by_trigger.get(&key) {
            info!(
                service_id = %service_id,
                analysis_id = %cached.analysis_id,
                "Serving cached impact analysis"
            );
            return Ok(cached);
        }

        let start = Instant::now();
        let trigger = Trigger::new(service_id, event, severity);
        let history = self.store.health_history(service_id).await;

        let prediction = self.predictor.predict(&snapshot, &trigger, &history).await;
        let blast_radius = self.blast_radius.calculate(&prediction.paths);
        let (immediate_impact, service_impacts, business_impact) =
            self.impact.analyze(&snapshot, &trigger, &blast_radius);
        let mitigation_strategies =
            MitigationStrategyGenerator::generate(&snapshot, &prediction.paths);

        let result = Arc::new(ImpactAnalysisResult {
            analysis_id: Uuid::new_v4().to_string(),
            graph_version: snapshot.version,
            immediate_impact,
            cascade_analysis: CascadeAnalysis {
                paths: prediction.top(self.config.cascade.max_paths),
                forecast_applied: prediction.forecast_applied(),
                forecast_confidence: prediction.forecast.map(|f| f.confidence),
                paths_considered: prediction.paths.len(),
                truncated: prediction.truncated,
                blast_radius,
            },
            business_impact,
            service_impacts,
            mitigation_strategies,
            trigger,
            analyzed_at: chrono::Utc::now(),
        });

        self.by_trigger.insert(key, result.clone());
        self.by_id.insert(result.analysis_id.clone(), result.clone());

        info!(
            service_id = %service_id,
            analysis_id = %result.analysis_id,
            event = %event,
            severity = %severity,
            affected = result.service_impacts.len(),
            revenue_at_risk = result.business_impact.revenue_at_risk,
            latency_ms = start.elapsed().as_millis(),
            "Impact analysis completed"
        );

        self.events.emit(
            IMPACT_ANALYSIS_COMPLETED,
            json!({
                "analysis_id": result.analysis_id,
                "service_id": service_id,
                "event": event,
                "severity": severity,
                "affected_services": result.service_impacts.len(),
                "revenue_at_risk": result.business_impact.revenue_at_risk,
                "sla_breach_risk": result.business_impact.sla_breach_risk,
            }),
        );

        Ok(result)
    }

    /// A previously computed analysis, while it is still cached.
    pub fn get_analysis(&self, analysis_id: &str) -> Option<Arc<ImpactAnalysisResult>> {
        self.by_id.get(analysis_id)
    }

    /// Health of a service and of everything it depends on.
    pub async fn get_service_dependency_health(
        &self,
        service_id: &str,
    ) -> AppResult<DependencyHealthReport> {
        validate_id("service_id", service_id)?;
        let snapshot = self.store.snapshot().await;
        let history = self.store.health_history(service_id).await;

        let mut report = DependencyHealthAnalyzer::report(&snapshot, service_id, &history)
            .ok_or_else(|| AppError::not_found(service_id))?;

        if let (Some(forecaster), true) = (&self.forecaster, history.len() >= 2) {
            let options = ForecastOptions::from(&self.config.forecasting);
            let timeout = Duration::from_millis(self.config.forecasting.timeout_ms);
            match tokio::time::timeout(timeout, forecaster.predict(&history, &options)).await {
                Ok(Ok(forecast)) if !(0.0..=1.0).contains(&forecast.confidence) => {
                    warn!(
                        service_id = %service_id,
                        confidence = forecast.confidence,
                        "Health forecast confidence out of range, skipping insight"
                    );
                }
                Ok(Ok(forecast)) => {
                    if let Some(insight) = DependencyHealthAnalyzer::forecast_insight(
                        service_id,
                        report.service_health.score,
                        &forecast,
                    ) {
                        report.predictive_insights.push(insight);
                    }
                }
                Ok(Err(e)) => warn!(service_id = %service_id, error = %e, "Health forecast failed"),
                Err(_) => warn!(service_id = %service_id, "Health forecast timed out"),
            }
        }

        Ok(report)
    }

    // ========================================================================
    // Graph maintenance
    // ========================================================================

    /// Query evidence sources for `service_id` and store what they agree on.
    pub async fn discover_service_dependencies(
        &self,
        service_id: &str,
    ) -> AppResult<DiscoveryOutcome> {
        let outcome = self.discovery.discover(service_id).await?;
        if let Ok(payload) = serde_json::to_value(&outcome) {
            self.events.emit(DEPENDENCIES_DISCOVERED, payload);
        }
        Ok(outcome)
    }

    /// Register or update a service.
    pub async fn add_service(&self, node: ServiceNode) -> AppResult<NodeUpsert> {
        let service_id = node.id.clone();
        let outcome = self.store.upsert_node(node).await?;
        info!(service_id = %service_id, outcome = ?outcome, "Service registered");
        self.events.emit(
            SERVICE_ADDED,
            json!({ "service_id": service_id, "outcome": outcome }),
        );
        Ok(outcome)
    }

    /// Remove a service and every dependency touching it.
    pub async fn remove_service(&self, service_id: &str) -> AppResult<RemovedService> {
        let removed = self.store.remove_node(service_id).await?;
        info!(
            service_id = %service_id,
            edges_removed = removed.edges_removed,
            "Service removed"
        );
        self.events.emit(
            SERVICE_REMOVED,
            json!({ "service_id": service_id, "edges_removed": removed.edges_removed }),
        );
        Ok(removed)
    }

    /// Record a dependency directly, without going through discovery.
    pub async fn add_dependency(&self, edge: ServiceDependency) -> AppResult<EdgeUpsert> {
        self.store.upsert_edge(edge).await
    }

    pub async fn update_service_health(
        &self,
        service_id: &str,
        health: ServiceHealth,
    ) -> AppResult<()> {
        self.store.update_health(service_id, health).await
    }

    /// Immutable snapshot of the graph and its topology.
    pub async fn get_dependency_graph(&self) -> Arc<GraphSnapshot> {
        self.store.snapshot().await
    }
}
