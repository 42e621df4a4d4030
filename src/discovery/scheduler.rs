use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::DependencyDiscovery;
use crate::events::{EventBus, DEPENDENCIES_DISCOVERED};
use crate::graph::GraphStore;

/// Periodically re-run discovery for every registered service.
///
/// Services with a run already in flight are skipped for that tick. Runs until
/// the surrounding task is aborted.
pub async fn run_discovery_loop(
    discovery: Arc<DependencyDiscovery>,
    store: Arc<GraphStore>,
    events: Arc<dyn EventBus>,
    period: Duration,
) {
    if period.is_zero() {
        error!("Discovery interval is zero; scheduler not started");
        return;
    }
    info!(interval_secs = period.as_secs(), "Discovery scheduler started");

    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; startup discovery is the caller's job.
    interval.tick().await;

    loop {
        interval.tick().await;

        let snapshot = store.snapshot().await;
        let services: Vec<String> = snapshot
            .graph
            .nodes
            .values()
            .filter(|node| !node.placeholder)
            .map(|node| node.id.clone())
            .collect();
        debug!(services = services.len(), "Discovery tick");

        for service_id in services {
            let discovery = discovery.clone();
            let events = events.clone();

            tokio::spawn(async move {
                match discovery.discover_if_idle(&service_id).await {
                    Ok(Some(outcome)) => {
                        if let Ok(payload) = serde_json::to_value(&outcome) {
                            events.emit(DEPENDENCIES_DISCOVERED, payload);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(service_id = %service_id, error = %e, "Scheduled discovery failed")
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::events::LoggingEventBus;

    #[tokio::test]
    async fn test_zero_period_returns_instead_of_panicking() {
        let store = Arc::new(GraphStore::new());
        let discovery = Arc::new(DependencyDiscovery::new(
            Vec::new(),
            store.clone(),
            &DiscoveryConfig::default(),
        ));

        let handle = tokio::spawn(run_discovery_loop(
            discovery,
            store,
            Arc::new(LoggingEventBus),
            Duration::ZERO,
        ));

        let joined = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should return promptly");
        assert!(joined.is_ok());
    }
}
