//! Host reconciliation

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use super::{Reconciler, SyncError};
use crate::model::{
    EntityStatus, Host, HostFilter, HostHistory, Id, Monitor, ReasonCode, StatusReason, SyncResult,
};
use crate::monitor::{MonitorClient, RemoteHost};
use crate::storage::InventoryStore;

enum Applied {
    Added(Id),
    Updated(Id),
}

/// Local status derived from what the backend reports about a host
fn map_remote_host_status(remote: &RemoteHost) -> (EntityStatus, Option<StatusReason>) {
    if remote.metadata.get("active_available").map(String::as_str) == Some("2") {
        return (
            EntityStatus::Error,
            Some(StatusReason::new(
                ReasonCode::HostInactive,
                "monitor reports host not available",
            )),
        );
    }
    if !remote.enabled {
        return (EntityStatus::Disabled, None);
    }
    (EntityStatus::Active, None)
}

impl Reconciler {
    /// Pull the full host set of a monitor into the local inventory.
    pub async fn pull_hosts(&self, monitor_id: Id) -> Result<SyncResult, SyncError> {
        self.pull_hosts_inner(monitor_id, true).await
    }

    #[instrument(skip(self))]
    pub(crate) async fn pull_hosts_inner(
        &self,
        monitor_id: Id,
        record_history: bool,
    ) -> Result<SyncResult, SyncError> {
        info!(monitor_id, "host sync started");
        let mut result = SyncResult::default();

        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_monitor_syncing(monitor_id).await?;
        self.ensure_monitor_syncable(&monitor).await?;

        let client = self.connect(&monitor).await?;
        let remote_hosts = match client.get_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                // transient transport failure; the next pass or status
                // check corrects the monitor state
                warn!(monitor_id, "failed to fetch hosts: {e}");
                return Err(e.into());
            }
        };
        if remote_hosts.is_empty() {
            warn!(monitor_id, monitor_name = %monitor.name, "monitor returned zero hosts");
        }

        result.total = remote_hosts.len() as u32;
        let remote_ids: HashSet<&str> = remote_hosts.iter().map(|h| h.id.as_str()).collect();
        let now = Utc::now();

        for remote in &remote_hosts {
            match self
                .apply_remote_host(&monitor, remote, now, record_history)
                .await
            {
                Ok(Applied::Added(_)) => result.added += 1,
                Ok(Applied::Updated(_)) => result.updated += 1,
                Err(e) => {
                    warn!(monitor_id, remote_id = %remote.id, "failed to apply host: {e}");
                    result.failed += 1;
                }
            }
        }

        // flag local hosts that no longer exist remotely; never delete them
        let locals = self
            .store
            .search_hosts(&HostFilter::for_monitor(monitor_id))
            .await?;
        for local in locals {
            let known = local
                .external_id
                .as_deref()
                .is_some_and(|ext| remote_ids.contains(ext));
            if known {
                continue;
            }
            let reason = StatusReason::not_found_on_monitor("host");
            self.engine.set_host_error(local.id, reason.clone()).await?;
            for item in self.store.items_for_host(local.id).await? {
                self.engine.set_item_error(item.id, reason.clone()).await?;
            }
        }

        self.engine.recompute_monitor_related(monitor_id).await?;
        self.record_snapshot().await?;
        self.events.sync_event("hosts", monitor_id, None, result);
        info!(
            monitor_id,
            added = result.added,
            updated = result.updated,
            failed = result.failed,
            "host sync finished"
        );
        Ok(result)
    }

    /// Pull a single host by its local id.
    #[instrument(skip(self))]
    pub async fn pull_host(&self, monitor_id: Id, host_id: Id) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let host = self.store.get_host(host_id).await?;
        self.engine.set_host_syncing(host_id).await?;

        if host.monitor_id != monitor_id {
            let err = SyncError::OwnershipMismatch("host does not belong to the specified monitor");
            self.engine.set_host_error(host_id, err.as_reason()).await?;
            return Err(err);
        }

        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_monitor_syncing(monitor_id).await?;
        self.ensure_monitor_syncable(&monitor).await?;

        let client = self.connect(&monitor).await?;

        let Some(external_id) = host.external_id.clone() else {
            let reason = StatusReason::not_found_on_monitor("host");
            self.engine.set_host_error(host_id, reason).await?;
            return Err(SyncError::Monitor(crate::monitor::MonitorError::NotFound(
                format!("host {}", host.name),
            )));
        };

        let remote = match client.get_host_by_id(&external_id).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                let reason = StatusReason::not_found_on_monitor("host");
                self.engine.set_host_error(host_id, reason).await?;
                return Err(SyncError::Monitor(crate::monitor::MonitorError::NotFound(
                    format!("host {external_id}"),
                )));
            }
            Err(e) => {
                let err = SyncError::Monitor(e);
                self.engine.set_host_error(host_id, err.as_reason()).await?;
                return Err(err);
            }
        };

        self.apply_remote_host(&monitor, &remote, Utc::now(), true)
            .await?;
        result.updated += 1;
        result.total = 1;

        self.engine.recompute_host(host_id).await?;
        self.engine.recompute_items_for_host(host_id).await?;
        self.events
            .sync_event("host", monitor_id, Some(host_id), result);
        Ok(result)
    }

    /// Push one local host to the remote backend, creating it (and a host
    /// group to hold it) when it has no external id yet.
    #[instrument(skip(self))]
    pub async fn push_host(&self, monitor_id: Id, host_id: Id) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let mut host = self.store.get_host(host_id).await?;
        self.engine.set_host_syncing(host_id).await?;

        if host.monitor_id != monitor_id {
            let err = SyncError::OwnershipMismatch("host does not belong to the specified monitor");
            self.engine.set_host_error(host_id, err.as_reason()).await?;
            return Err(err);
        }

        let monitor = self.store.get_monitor(monitor_id).await?;
        if monitor.status == EntityStatus::Error {
            let reason = monitor
                .status_reason
                .clone()
                .unwrap_or_else(StatusReason::monitor_error);
            self.engine.set_host_error(host_id, reason).await?;
            return Err(SyncError::MonitorInactive {
                monitor_id,
                status: monitor.status,
            });
        }

        let client = self.connect(&monitor).await?;

        let group_external_id = self.resolve_push_group(&monitor, &host, client.as_ref()).await?;

        let mut remote = RemoteHost {
            id: host.external_id.clone().unwrap_or_default(),
            name: host.name.clone(),
            ip_address: host.ip_addr.clone(),
            description: host.description.clone(),
            enabled: host.enabled,
            status: String::new(),
            metadata: [("groupid".to_string(), group_external_id)]
                .into_iter()
                .collect(),
        };

        if host.external_id.is_none() {
            // match by name first so re-pushing does not duplicate the host
            let existing = match client.get_host_by_name(&host.name).await {
                Ok(existing) => existing,
                Err(e) => {
                    let err = SyncError::Monitor(e);
                    self.engine
                        .set_host_error(host_id, push_failed(&err))
                        .await?;
                    return Err(err);
                }
            };

            match existing {
                Some(found) if !found.id.is_empty() => {
                    remote.id = found.id.clone();
                    host.external_id = Some(found.id);
                    self.store.update_host(host.clone()).await?;
                    if let Err(e) = client.update_host(&remote).await {
                        let err = SyncError::Monitor(e);
                        self.engine
                            .set_host_error(host_id, push_failed(&err))
                            .await?;
                        return Err(err);
                    }
                    result.updated += 1;
                }
                _ => {
                    let created = match client.create_host(&remote).await {
                        Ok(created) => created,
                        Err(e) => {
                            let err = SyncError::Monitor(e);
                            self.engine
                                .set_host_error(host_id, push_failed(&err))
                                .await?;
                            return Err(err);
                        }
                    };
                    if !created.id.is_empty() {
                        host.external_id = Some(created.id);
                        self.store.update_host(host.clone()).await?;
                    }
                    result.added += 1;
                }
            }
        } else {
            if let Err(e) = client.update_host(&remote).await {
                let err = SyncError::Monitor(e);
                self.engine
                    .set_host_error(host_id, push_failed(&err))
                    .await?;
                return Err(err);
            }
            result.updated += 1;
        }

        result.total = 1;
        info!(
            host_name = %host.name,
            external_id = host.external_id.as_deref().unwrap_or(""),
            monitor = %monitor.name,
            "pushed host to monitor"
        );

        self.engine.recompute_host(host_id).await?;
        self.engine.recompute_monitor_related(monitor_id).await?;
        Ok(result)
    }

    /// Push every local host under a monitor. Per-host failures are counted
    /// and the batch continues.
    #[instrument(skip(self))]
    pub async fn push_hosts(&self, monitor_id: Id) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_monitor_syncing(monitor_id).await?;
        self.ensure_monitor_pushable(&monitor).await?;

        let hosts = self
            .store
            .search_hosts(&HostFilter::for_monitor(monitor_id))
            .await?;

        for host in hosts {
            match self.push_host(monitor_id, host.id).await {
                Ok(host_result) => result.merge(host_result),
                Err(e) => {
                    warn!(monitor_id, host_id = host.id, "failed to push host: {e}");
                    result.failed += 1;
                    result.total += 1;
                }
            }
        }

        self.engine.recompute_monitor_related(monitor_id).await?;
        self.events.sync_event("hosts", monitor_id, None, result);
        Ok(result)
    }

    /// Upsert one remote host into the local inventory.
    async fn apply_remote_host(
        &self,
        monitor: &Monitor,
        remote: &RemoteHost,
        now: DateTime<Utc>,
        record_history: bool,
    ) -> Result<Applied, SyncError> {
        let (status, status_reason) = map_remote_host_status(remote);
        let group_id = self.resolve_group_from_metadata(monitor, remote).await;

        let applied = match self
            .store
            .find_host_by_external_id(monitor.id, &remote.id)
            .await
        {
            Ok(mut host) => {
                host.name = remote.name.clone();
                host.description = remote.description.clone();
                host.enabled = remote.enabled;
                host.status = status;
                host.status_reason = status_reason;
                host.group_id = group_id.or(host.group_id);
                host.ip_addr = remote.ip_address.clone();
                host.last_sync_at = Some(now);
                host.external_source = monitor.name.clone();
                self.store.update_host(host.clone()).await?;
                Applied::Updated(host.id)
            }
            Err(e) if e.is_not_found() => {
                let host = Host {
                    id: 0,
                    name: remote.name.clone(),
                    external_id: Some(remote.id.clone()),
                    monitor_id: monitor.id,
                    group_id,
                    site_id: None,
                    description: remote.description.clone(),
                    enabled: remote.enabled,
                    status,
                    status_reason,
                    ip_addr: remote.ip_address.clone(),
                    health_score: 100,
                    last_sync_at: Some(now),
                    external_source: monitor.name.clone(),
                };
                let id = self.store.add_host(host).await?;
                Applied::Added(id)
            }
            Err(e) => return Err(e.into()),
        };

        if record_history {
            let id = match applied {
                Applied::Added(id) | Applied::Updated(id) => id,
            };
            let refreshed = self.store.get_host(id).await?;
            self.store
                .record_host_history(HostHistory {
                    host_id: id,
                    status: refreshed.status,
                    health_score: refreshed.health_score,
                    sampled_at: now,
                })
                .await?;
        }

        Ok(applied)
    }

    /// Map the remote group metadata to a local group, creating a local
    /// record for yet-unknown remote groups.
    async fn resolve_group_from_metadata(
        &self,
        monitor: &Monitor,
        remote: &RemoteHost,
    ) -> Option<Id> {
        let external_group_id = remote
            .metadata
            .get("groupid")
            .filter(|gid| !gid.is_empty())?;

        match self
            .store
            .find_group_by_external_id(monitor.id, external_group_id)
            .await
        {
            Ok(group) => Some(group.id),
            Err(e) if e.is_not_found() => {
                let name = remote
                    .metadata
                    .get("groupname")
                    .filter(|n| !n.trim().is_empty())
                    .map(|n| n.trim().to_string())
                    .unwrap_or_else(|| format!("Group {external_group_id}"));
                let group = crate::model::Group {
                    id: 0,
                    name,
                    description: format!("Imported from {}", monitor.name),
                    monitor_id: Some(monitor.id),
                    external_id: Some(external_group_id.clone()),
                    enabled: true,
                    status: EntityStatus::Active,
                    status_reason: None,
                    health_score: 100,
                    last_sync_at: None,
                    external_source: monitor.name.clone(),
                };
                match self.store.add_group(group).await {
                    Ok(id) => {
                        info!(external_group_id = %external_group_id, "created group from remote metadata");
                        Some(id)
                    }
                    Err(e) => {
                        warn!("failed to create group from metadata: {e}");
                        None
                    }
                }
            }
            Err(e) => {
                warn!("group lookup failed: {e}");
                None
            }
        }
    }

    /// Resolve the remote host-group id a pushed host should land in,
    /// creating the group remotely (or the "Default" fallback) as needed.
    async fn resolve_push_group(
        &self,
        monitor: &Monitor,
        host: &Host,
        client: &dyn crate::monitor::MonitorClient,
    ) -> Result<String, SyncError> {
        if let Some(group_id) = host.group_id
            && let Ok(mut group) = self.store.get_group(group_id).await
        {
            if let Some(ext) = &group.external_id
                && group.monitor_id == Some(monitor.id)
            {
                return Ok(ext.clone());
            }
            if !group.name.is_empty() {
                match client.create_host_group(&group.name).await {
                    Ok(ext) => {
                        group.external_id = Some(ext.clone());
                        group.monitor_id = Some(monitor.id);
                        self.store.update_group(group).await?;
                        return Ok(ext);
                    }
                    Err(e) => {
                        let err = SyncError::Monitor(e);
                        self.engine
                            .set_host_error(host.id, push_failed(&err))
                            .await?;
                        return Err(err);
                    }
                }
            }
        }

        client
            .create_host_group("Default")
            .await
            .map_err(SyncError::Monitor)
    }
}

fn push_failed(err: &SyncError) -> StatusReason {
    StatusReason::new(ReasonCode::PushFailed, err.to_string())
}
