//! Outbound event hub
//!
//! One broadcast channel carries everything the out-of-scope transports
//! (WebSocket, notification pipeline) consume. Publishing never blocks and a
//! missing subscriber is not an error; slow subscribers may lag and drop,
//! which is acceptable for progress events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use crate::model::{Id, SyncResult};

/// Events published by the sync engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A reconciliation call finished
    SyncComplete {
        entity: String,
        monitor_id: Id,
        #[serde(skip_serializing_if = "Option::is_none")]
        host_id: Option<Id>,
        timestamp: DateTime<Utc>,
        result: SyncResult,
    },

    /// A GenerateAlerts task asked the alert subsystem to produce alerts
    AlertsRequested { count: u32 },
}

/// Cloneable handle to the broadcast hub
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<OutboundEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; it is fine if nobody is listening.
    pub fn broadcast(&self, event: OutboundEvent) {
        match self.tx.send(event) {
            Ok(receivers) => trace!("published event to {receivers} receivers"),
            Err(_) => trace!("no receivers for event"),
        }
    }

    /// Log and broadcast the outcome of one reconciliation call.
    pub fn sync_event(&self, entity: &str, monitor_id: Id, host_id: Option<Id>, result: SyncResult) {
        if result.failed > 0 {
            warn!(entity, monitor_id, host_id, "sync {entity}: {result}");
        } else {
            info!(entity, monitor_id, host_id, "sync {entity}: {result}");
        }

        self.broadcast(OutboundEvent::SyncComplete {
            entity: entity.to_string(),
            monitor_id,
            host_id,
            timestamp: Utc::now(),
            result,
        });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}
