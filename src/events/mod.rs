//! Notification bus for completed analyses and graph changes.
//!
//! Emission is fire-and-forget: a bus never fails the operation that emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Emitted after an impact analysis is computed.
pub const IMPACT_ANALYSIS_COMPLETED: &str = "impact_analysis_completed";
/// Emitted after a discovery run.
pub const DEPENDENCIES_DISCOVERED: &str = "dependencies_discovered";
/// Emitted after a service is registered or updated.
pub const SERVICE_ADDED: &str = "service_added";
/// Emitted after a service is removed.
pub const SERVICE_REMOVED: &str = "service_removed";

/// A published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

/// Sink for engine events.
pub trait EventBus: Send + Sync {
    fn emit(&self, name: &str, payload: serde_json::Value);
}

/// Bus backed by a tokio broadcast channel.
///
/// Events emitted while nobody is subscribed are dropped.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for BroadcastEventBus {
    fn emit(&self, name: &str, payload: serde_json::Value) {
        let event = Event {
            name: name.to_string(),
            payload,
            emitted_at: Utc::now(),
        };
        if self.sender.send(event).is_err() {
            debug!(event = %name, "No event subscribers");
        }
    }
}

/// Bus that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventBus;

impl EventBus for LoggingEventBus {
    fn emit(&self, name: &str, payload: serde_json::Value) {
        info!(event = %name, payload = %payload, "Event emitted");
    }
}
