//! Bidirectional sync reconcilers
//!
//! Pull (remote → local) and push (local → remote) for hosts, items, groups
//! and sites. Every operation follows the same reconcile shape:
//!
//! 1. mark the parent Syncing and fail fast if it is Disabled or in Error,
//!    propagating the reason to every descendant;
//! 2. authenticate (reusing the cached token when present);
//! 3. diff the remote set against local records by external id, creating or
//!    updating local records and flagging the ones that disappeared remotely
//!    (never deleting them);
//! 4. recompute the status cascade, record a snapshot and emit a sync event.
//!
//! Per-record failures increment `SyncResult::failed` and the batch keeps
//! going; partial success is the expected outcome, not an error.

pub mod groups;
pub mod hosts;
pub mod items;
pub mod sites;

use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use crate::events::EventHub;
use crate::model::{
    EntityStatus, HostFilter, Id, Monitor, ReasonCode, StatusReason, StatusSnapshot,
};
use crate::monitor::{ClientFactory, MonitorClient, MonitorError};
use crate::status::StatusEngine;
use crate::storage::{InventoryStore, StoreError};

/// Errors produced by reconciliation operations
#[derive(Debug)]
pub enum SyncError {
    /// Local persistence failed
    Store(StoreError),

    /// The remote backend failed
    Monitor(MonitorError),

    /// The parent monitor is Disabled or in Error; nothing was synced
    MonitorInactive { monitor_id: Id, status: EntityStatus },

    /// The owning host is not in a syncable state
    HostInactive { host_id: Id, status: EntityStatus },

    /// Cross-entity ownership mismatch (host/monitor or item/host)
    OwnershipMismatch(&'static str),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Store(e) => write!(f, "{e}"),
            SyncError::Monitor(e) => write!(f, "{e}"),
            SyncError::MonitorInactive { status, .. } => {
                write!(f, "monitor is not active (status: {status})")
            }
            SyncError::HostInactive { status, .. } => {
                write!(f, "host is not active (status: {status})")
            }
            SyncError::OwnershipMismatch(what) => write!(f, "{what}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Store(e) => Some(e),
            SyncError::Monitor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

impl From<MonitorError> for SyncError {
    fn from(e: MonitorError) -> Self {
        SyncError::Monitor(e)
    }
}

impl SyncError {
    /// Reason persisted on entities affected by this failure
    pub(crate) fn as_reason(&self) -> StatusReason {
        match self {
            SyncError::Store(e) => StatusReason::new(ReasonCode::PullFailed, e.to_string()),
            SyncError::Monitor(MonitorError::AuthenticationFailed(msg)) => {
                StatusReason::new(ReasonCode::AuthenticationFailed, msg.clone())
            }
            SyncError::Monitor(MonitorError::Timeout) => {
                StatusReason::new(ReasonCode::ConnectionFailed, "request timed out")
            }
            SyncError::Monitor(MonitorError::ConnectionFailed(msg)) => {
                StatusReason::new(ReasonCode::ConnectionFailed, msg.clone())
            }
            SyncError::Monitor(e) => StatusReason::new(ReasonCode::PullFailed, e.to_string()),
            SyncError::MonitorInactive { status, .. } => StatusReason::monitor_inactive(*status),
            SyncError::HostInactive { status, .. } => StatusReason::host_inactive(*status),
            SyncError::OwnershipMismatch(what) => {
                StatusReason::new(ReasonCode::OwnershipMismatch, *what)
            }
        }
    }
}

/// Orchestrates pull/push reconciliation against remote monitoring backends
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) store: Arc<dyn InventoryStore>,
    pub(crate) engine: StatusEngine,
    pub(crate) clients: Arc<dyn ClientFactory>,
    pub(crate) events: EventHub,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        clients: Arc<dyn ClientFactory>,
        events: EventHub,
    ) -> Self {
        let engine = StatusEngine::new(store.clone());
        Self {
            store,
            engine,
            clients,
            events,
        }
    }

    pub fn engine(&self) -> &StatusEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn InventoryStore> {
        &self.store
    }

    /// Abort a pull when the monitor is Disabled or in Error, propagating
    /// the reason to every descendant first.
    pub(crate) async fn ensure_monitor_syncable(&self, monitor: &Monitor) -> Result<(), SyncError> {
        if !matches!(monitor.status, EntityStatus::Disabled | EntityStatus::Error) {
            return Ok(());
        }
        let reason = monitor
            .status_reason
            .clone()
            .unwrap_or_else(|| StatusReason::monitor_inactive(monitor.status));
        self.engine
            .set_monitor_related_error(monitor.id, reason)
            .await?;
        Err(SyncError::MonitorInactive {
            monitor_id: monitor.id,
            status: monitor.status,
        })
    }

    /// Abort a push when the monitor is in Error (a merely disabled monitor
    /// may still receive pushes).
    pub(crate) async fn ensure_monitor_pushable(&self, monitor: &Monitor) -> Result<(), SyncError> {
        if monitor.status != EntityStatus::Error {
            return Ok(());
        }
        let reason = monitor
            .status_reason
            .clone()
            .unwrap_or_else(StatusReason::monitor_error);
        self.engine
            .set_monitor_related_error(monitor.id, reason)
            .await?;
        Err(SyncError::MonitorInactive {
            monitor_id: monitor.id,
            status: monitor.status,
        })
    }

    /// Build a client for the monitor, reusing the cached session token or
    /// authenticating and persisting the fresh one.
    ///
    /// Authentication failures cascade the reason to every descendant
    /// before returning; the whole operation for this monitor is over.
    pub(crate) async fn connect(
        &self,
        monitor: &Monitor,
    ) -> Result<Box<dyn MonitorClient>, SyncError> {
        let client = match self.clients.client_for(monitor) {
            Ok(client) => client,
            Err(e) => {
                let err = SyncError::Monitor(e);
                self.engine
                    .set_monitor_related_error(monitor.id, err.as_reason())
                    .await?;
                return Err(err);
            }
        };

        if let Some(token) = &monitor.auth_token {
            client.set_auth_token(token.clone());
            return Ok(client);
        }

        if let Err(e) = client.authenticate().await {
            let err = SyncError::Monitor(e);
            self.engine
                .set_monitor_related_error(monitor.id, err.as_reason())
                .await?;
            return Err(err);
        }
        if let Some(token) = client.auth_token() {
            self.store
                .update_monitor_auth_token(monitor.id, Some(token))
                .await?;
        }
        Ok(client)
    }

    /// Record aggregated host-status counts for trend history.
    pub(crate) async fn record_snapshot(&self) -> Result<(), SyncError> {
        let hosts = self.store.search_hosts(&HostFilter::default()).await?;
        let mut snapshot = StatusSnapshot {
            sampled_at: Some(Utc::now()),
            ..StatusSnapshot::default()
        };
        for host in &hosts {
            match host.status {
                EntityStatus::Active => snapshot.active_hosts += 1,
                EntityStatus::Error => snapshot.error_hosts += 1,
                EntityStatus::Syncing => snapshot.syncing_hosts += 1,
                EntityStatus::Disabled => snapshot.disabled_hosts += 1,
            }
            snapshot.total_items += self.store.items_for_host(host.id).await?.len() as u32;
        }
        self.store.record_status_snapshot(snapshot).await?;
        Ok(())
    }
}
