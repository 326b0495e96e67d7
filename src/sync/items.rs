//! Item reconciliation
//!
//! Item pulls and pushes additionally require the owning host to be in a
//! non-error, materialized state (a host without an external id has nothing
//! to correlate against remotely).

use std::collections::HashSet;

use tracing::{info, instrument, warn};

use super::{Reconciler, SyncError};
use crate::model::{
    EntityStatus, HostFilter, Id, Item, ReasonCode, StatusReason, SyncResult,
};
use crate::monitor::{MonitorClient, RemoteItem};
use crate::status::determine;
use crate::storage::InventoryStore;

impl Reconciler {
    /// Pull items for every host under a monitor.
    pub async fn pull_items(&self, monitor_id: Id) -> Result<SyncResult, SyncError> {
        self.pull_items_inner(monitor_id, true).await
    }

    #[instrument(skip(self))]
    pub(crate) async fn pull_items_inner(
        &self,
        monitor_id: Id,
        record_history: bool,
    ) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_monitor_syncing(monitor_id).await?;
        self.ensure_monitor_syncable(&monitor).await?;

        let hosts = self
            .store
            .search_hosts(&HostFilter::for_monitor(monitor_id))
            .await?;

        for host in hosts {
            match self
                .pull_host_items_inner(monitor_id, host.id, record_history)
                .await
            {
                Ok(host_result) => result.merge(host_result),
                Err(e) => {
                    warn!(monitor_id, host_id = host.id, "item pull failed for host: {e}");
                    result.failed += 1;
                    result.total += 1;
                }
            }
        }

        self.engine.recompute_monitor_related(monitor_id).await?;
        self.record_snapshot().await?;
        self.events.sync_event("items", monitor_id, None, result);
        Ok(result)
    }

    /// Pull the item set of a single host.
    pub async fn pull_host_items(
        &self,
        monitor_id: Id,
        host_id: Id,
    ) -> Result<SyncResult, SyncError> {
        self.pull_host_items_inner(monitor_id, host_id, true).await
    }

    #[instrument(skip(self))]
    pub(crate) async fn pull_host_items_inner(
        &self,
        monitor_id: Id,
        host_id: Id,
        record_history: bool,
    ) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        // read current state before writing the transient markers so the
        // guards below see the stored status, not our own Syncing
        let host = self.store.get_host(host_id).await?;
        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_monitor_syncing(monitor_id).await?;
        self.engine.set_host_syncing(host_id).await?;

        if host.monitor_id != monitor_id {
            let err = SyncError::OwnershipMismatch("host does not belong to the specified monitor");
            self.engine.set_host_error(host_id, err.as_reason()).await?;
            return Err(err);
        }

        if matches!(
            monitor.status,
            EntityStatus::Disabled | EntityStatus::Error
        ) {
            let reason = monitor
                .status_reason
                .clone()
                .unwrap_or_else(|| StatusReason::monitor_inactive(monitor.status));
            self.mark_host_and_items_error(host_id, reason).await?;
            return Err(SyncError::MonitorInactive {
                monitor_id,
                status: monitor.status,
            });
        }

        // the host must be syncable before we talk to the backend
        let determined = determine::host_status(&host, &monitor);
        match determined {
            EntityStatus::Error => {
                let reason = host
                    .status_reason
                    .clone()
                    .unwrap_or_else(|| StatusReason::host_inactive(determined));
                self.mark_host_and_items_error(host_id, reason).await?;
                return Err(SyncError::HostInactive {
                    host_id,
                    status: determined,
                });
            }
            EntityStatus::Disabled => {
                self.store
                    .update_host_status_reason(host_id, EntityStatus::Disabled, None)
                    .await?;
                for item in self.store.items_for_host(host_id).await? {
                    self.store
                        .update_item_status_reason(item.id, EntityStatus::Disabled, None)
                        .await?;
                }
                return Err(SyncError::HostInactive {
                    host_id,
                    status: determined,
                });
            }
            EntityStatus::Active | EntityStatus::Syncing => {}
        }

        let client = self.connect(&monitor).await?;

        // guaranteed by the determination above, but do not panic on races
        let Some(external_host_id) = host.external_id.clone() else {
            let reason = StatusReason::not_found_on_monitor("host");
            self.engine.set_host_error(host_id, reason).await?;
            return Err(SyncError::HostInactive {
                host_id,
                status: EntityStatus::Error,
            });
        };

        let remote_items = match client.get_items(&external_host_id).await {
            Ok(items) => items,
            Err(e) => {
                let err = SyncError::Monitor(e);
                self.engine.set_host_error(host_id, err.as_reason()).await?;
                return Err(err);
            }
        };

        result.total = remote_items.len() as u32;
        let remote_ids: HashSet<&str> = remote_items.iter().map(|i| i.id.as_str()).collect();

        for remote in &remote_items {
            match self.apply_remote_item(host_id, &external_host_id, remote).await {
                Ok(true) => result.added += 1,
                Ok(false) => result.updated += 1,
                Err(e) => {
                    warn!(host_id, remote_id = %remote.id, "failed to apply item: {e}");
                    result.failed += 1;
                }
            }
        }

        // flag local items that no longer exist remotely
        for local in self.store.items_for_host(host_id).await? {
            let known = local
                .external_id
                .as_deref()
                .is_some_and(|ext| remote_ids.contains(ext));
            if !known {
                self.engine
                    .set_item_error(local.id, StatusReason::not_found_on_monitor("item"))
                    .await?;
            }
        }

        self.store
            .update_host_status_reason(host_id, EntityStatus::Active, None)
            .await?;
        self.engine.recompute_items_for_host(host_id).await?;
        self.engine.recompute_host(host_id).await?;

        if record_history {
            let refreshed = self.store.get_host(host_id).await?;
            self.store
                .record_host_history(crate::model::HostHistory {
                    host_id,
                    status: refreshed.status,
                    health_score: refreshed.health_score,
                    sampled_at: chrono::Utc::now(),
                })
                .await?;
        }

        info!(
            host_id,
            added = result.added,
            updated = result.updated,
            failed = result.failed,
            "item sync finished"
        );
        Ok(result)
    }

    /// Pull a single item of a host.
    #[instrument(skip(self))]
    pub async fn pull_item(
        &self,
        monitor_id: Id,
        host_id: Id,
        item_id: Id,
    ) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let item = self.store.get_item(item_id).await?;
        self.engine.set_item_syncing(item_id).await?;

        if item.host_id != host_id {
            let err = SyncError::OwnershipMismatch("item does not belong to the specified host");
            self.engine.set_item_error(item_id, err.as_reason()).await?;
            return Err(err);
        }

        let host = self.store.get_host(host_id).await?;
        if host.monitor_id != monitor_id {
            let err = SyncError::OwnershipMismatch("host does not belong to the specified monitor");
            self.engine.set_item_error(item_id, err.as_reason()).await?;
            return Err(err);
        }

        let monitor = self.store.get_monitor(monitor_id).await?;
        self.ensure_monitor_syncable(&monitor).await?;
        let client = self.connect(&monitor).await?;

        let Some(external_id) = item.external_id.clone() else {
            let reason = StatusReason::not_found_on_monitor("item");
            self.engine.set_item_error(item_id, reason).await?;
            return Err(SyncError::Monitor(crate::monitor::MonitorError::NotFound(
                format!("item {}", item.name),
            )));
        };

        let remote = match client.get_item_by_id(&external_id).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                let reason = StatusReason::not_found_on_monitor("item");
                self.engine.set_item_error(item_id, reason).await?;
                return Err(SyncError::Monitor(crate::monitor::MonitorError::NotFound(
                    format!("item {external_id}"),
                )));
            }
            Err(e) => {
                let err = SyncError::Monitor(e);
                self.engine.set_item_error(item_id, err.as_reason()).await?;
                return Err(err);
            }
        };

        let external_host_id = host.external_id.clone().unwrap_or_default();
        self.apply_remote_item(host_id, &external_host_id, &remote)
            .await?;
        result.updated += 1;
        result.total = 1;

        self.engine.recompute_item(item_id).await?;
        self.events
            .sync_event("item", monitor_id, Some(host_id), result);
        Ok(result)
    }

    /// Push one local item to the remote backend, materializing the owning
    /// host first if it has never been pushed.
    #[instrument(skip(self))]
    pub async fn push_item(
        &self,
        monitor_id: Id,
        host_id: Id,
        item_id: Id,
    ) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let mut item = self.store.get_item(item_id).await?;
        self.engine.set_item_syncing(item_id).await?;

        if item.host_id != host_id {
            let err = SyncError::OwnershipMismatch("item does not belong to the specified host");
            self.engine.set_item_error(item_id, err.as_reason()).await?;
            return Err(err);
        }

        let mut host = self.store.get_host(host_id).await?;
        if host.monitor_id != monitor_id {
            let err = SyncError::OwnershipMismatch("host does not belong to the specified monitor");
            self.engine.set_host_error(host_id, err.as_reason()).await?;
            self.engine.set_item_error(item_id, err.as_reason()).await?;
            return Err(err);
        }

        if host.external_id.is_none() {
            if let Err(e) = self.push_host(monitor_id, host_id).await {
                self.engine.set_item_error(item_id, e.as_reason()).await?;
                return Err(e);
            }
            host = self.store.get_host(host_id).await?;
        }

        let monitor = self.store.get_monitor(monitor_id).await?;
        if monitor.status == EntityStatus::Error {
            let reason = monitor
                .status_reason
                .clone()
                .unwrap_or_else(StatusReason::monitor_error);
            self.engine.set_item_error(item_id, reason).await?;
            return Err(SyncError::MonitorInactive {
                monitor_id,
                status: monitor.status,
            });
        }

        let client = self.connect(&monitor).await?;

        let remote = RemoteItem {
            id: item.external_id.clone().unwrap_or_default(),
            host_id: host.external_id.clone().unwrap_or_default(),
            name: item.name.clone(),
            key: item.name.clone(),
            value: item.last_value.clone(),
            units: item.units.clone(),
            value_type: item.value_type.clone(),
            enabled: item.enabled,
            timestamp: None,
        };

        if item.external_id.is_none() {
            match client.create_item(&remote).await {
                Ok(created) if !created.id.is_empty() => {
                    item.external_id = Some(created.id);
                    item.external_host_id = host.external_id.clone();
                    self.store.update_item(item.clone()).await?;
                    result.added += 1;
                }
                Ok(_) => result.added += 1,
                Err(e) => {
                    let err = SyncError::Monitor(e);
                    self.engine
                        .set_item_error(
                            item_id,
                            StatusReason::new(ReasonCode::PushFailed, err.to_string()),
                        )
                        .await?;
                    return Err(err);
                }
            }
        } else if let Err(e) = client.update_item(&remote).await {
            let err = SyncError::Monitor(e);
            self.engine
                .set_item_error(
                    item_id,
                    StatusReason::new(ReasonCode::PushFailed, err.to_string()),
                )
                .await?;
            return Err(err);
        } else {
            result.updated += 1;
        }

        result.total = 1;
        info!(item_name = %item.name, host = %host.name, monitor = %monitor.name, "pushed item to monitor");

        self.engine.recompute_item(item_id).await?;
        self.engine.recompute_host(host_id).await?;
        Ok(result)
    }

    /// Push every item of a host. Per-item failures are counted and the
    /// batch continues.
    #[instrument(skip(self))]
    pub async fn push_host_items(
        &self,
        monitor_id: Id,
        host_id: Id,
    ) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let host = self.store.get_host(host_id).await?;
        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_host_syncing(host_id).await?;

        if monitor.status == EntityStatus::Error {
            let reason = monitor
                .status_reason
                .clone()
                .unwrap_or_else(StatusReason::monitor_error);
            self.engine.set_host_error(host_id, reason.clone()).await?;
            self.engine.set_monitor_error(monitor_id, reason).await?;
            return Err(SyncError::MonitorInactive {
                monitor_id,
                status: monitor.status,
            });
        }

        let determined = determine::host_status(&host, &monitor);
        if determined == EntityStatus::Error {
            let reason = host
                .status_reason
                .clone()
                .unwrap_or_else(|| StatusReason::host_inactive(determined));
            self.engine.set_host_error(host_id, reason).await?;
            return Err(SyncError::HostInactive {
                host_id,
                status: determined,
            });
        }

        let items = self.store.items_for_host(host_id).await?;
        result.total = items.len() as u32;

        for item in items {
            match self.push_item(monitor_id, host_id, item.id).await {
                Ok(item_result) => {
                    result.added += item_result.added;
                    result.updated += item_result.updated;
                }
                Err(e) => {
                    warn!(host_id, item_id = item.id, "failed to push item: {e}");
                    result.failed += 1;
                }
            }
        }

        self.engine.recompute_items_for_host(host_id).await?;
        self.engine.recompute_host(host_id).await?;
        Ok(result)
    }

    /// Push every item under every host of a monitor.
    #[instrument(skip(self))]
    pub async fn push_items(&self, monitor_id: Id) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_monitor_syncing(monitor_id).await?;
        self.ensure_monitor_pushable(&monitor).await?;

        let hosts = self
            .store
            .search_hosts(&HostFilter::for_monitor(monitor_id))
            .await?;

        for host in hosts {
            match self.push_host_items(monitor_id, host.id).await {
                Ok(host_result) => result.merge(host_result),
                Err(e) => {
                    warn!(monitor_id, host_id = host.id, "item push failed for host: {e}");
                    result.failed += 1;
                    result.total += 1;
                }
            }
        }

        self.engine.recompute_monitor_related(monitor_id).await?;
        self.events.sync_event("items", monitor_id, None, result);
        Ok(result)
    }

    async fn mark_host_and_items_error(
        &self,
        host_id: Id,
        reason: StatusReason,
    ) -> Result<(), SyncError> {
        self.engine.set_host_error(host_id, reason.clone()).await?;
        for item in self.store.items_for_host(host_id).await? {
            self.engine.set_item_error(item.id, reason.clone()).await?;
        }
        Ok(())
    }

    /// Upsert one remote item into the local inventory. Returns `true` when
    /// a new record was created.
    async fn apply_remote_item(
        &self,
        host_id: Id,
        external_host_id: &str,
        remote: &RemoteItem,
    ) -> Result<bool, SyncError> {
        match self.store.find_item_by_external_id(host_id, &remote.id).await {
            Ok(mut item) => {
                item.name = remote.name.clone();
                item.external_host_id = Some(external_host_id.to_string());
                item.value_type = remote.value_type.clone();
                item.last_value = remote.value.clone();
                item.units = remote.units.clone();
                item.enabled = remote.enabled;
                // the record exists remotely again, so any stale error is over
                item.status = if remote.enabled {
                    EntityStatus::Active
                } else {
                    EntityStatus::Disabled
                };
                item.status_reason = None;
                self.store.update_item(item).await?;
                Ok(false)
            }
            Err(e) if e.is_not_found() => {
                let item = Item {
                    id: 0,
                    name: remote.name.clone(),
                    host_id,
                    external_id: Some(remote.id.clone()),
                    external_host_id: Some(external_host_id.to_string()),
                    value_type: remote.value_type.clone(),
                    last_value: remote.value.clone(),
                    units: remote.units.clone(),
                    enabled: remote.enabled,
                    status: EntityStatus::Active,
                    status_reason: None,
                };
                self.store.add_item(item).await?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}
