//! Group reconciliation
//!
//! Groups map 1:1 to remote host groups. Pulls fall back to name matching
//! before creating a record, so a group created locally and later discovered
//! remotely is linked instead of duplicated.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::{Reconciler, SyncError};
use crate::concurrency::run_with_limit;
use crate::model::{
    EntityStatus, Group, GroupFilter, Host, HostFilter, Id, StatusReason, SyncResult,
};
use crate::monitor::MonitorClient;
use crate::storage::InventoryStore;

/// Per-status host counts for a group or site detail view
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MemberSummary {
    pub total_hosts: u32,
    pub active_hosts: u32,
    pub error_hosts: u32,
    pub syncing_hosts: u32,
    pub total_items: u32,
}

/// Group with aggregated member information
#[derive(Debug, Clone, serde::Serialize)]
pub struct GroupDetail {
    pub group: Group,
    pub summary: MemberSummary,
    pub hosts: Vec<Host>,
}

impl Reconciler {
    /// Pull the remote host-group set into local groups.
    #[instrument(skip(self))]
    pub async fn pull_groups(&self, monitor_id: Id) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();

        let monitor = self.store.get_monitor(monitor_id).await?;
        self.engine.set_monitor_syncing(monitor_id).await?;
        self.ensure_monitor_syncable(&monitor).await?;

        let client = self.connect(&monitor).await?;
        let remote_groups = match client.get_host_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(monitor_id, "failed to fetch host groups: {e}");
                return Err(e.into());
            }
        };

        result.total = remote_groups.len() as u32;
        let remote_ids: HashSet<&str> = remote_groups.iter().map(|g| g.id.as_str()).collect();
        let now = Utc::now();

        // local groups of this monitor (or unassigned) indexed by name for
        // the duplicate-avoidance fallback
        let locals = self.store.search_groups(&GroupFilter::default()).await?;
        let mut by_name: std::collections::HashMap<String, Group> = locals
            .iter()
            .filter(|g| g.monitor_id == Some(monitor_id) || g.monitor_id.is_none())
            .map(|g| (g.name.clone(), g.clone()))
            .collect();

        for remote in &remote_groups {
            match self
                .store
                .find_group_by_external_id(monitor_id, &remote.id)
                .await
            {
                Ok(mut group) => {
                    group.name = remote.name.clone();
                    group.last_sync_at = Some(now);
                    group.external_source = monitor.name.clone();
                    match self.store.update_group(group).await {
                        Ok(()) => result.updated += 1,
                        Err(e) => {
                            warn!(monitor_id, remote_id = %remote.id, "group update failed: {e}");
                            result.failed += 1;
                        }
                    }
                }
                Err(e) if e.is_not_found() => {
                    // link by name before creating a duplicate
                    if let Some(mut existing) = by_name.remove(&remote.name) {
                        existing.external_id = Some(remote.id.clone());
                        existing.monitor_id = Some(monitor_id);
                        existing.last_sync_at = Some(now);
                        existing.external_source = monitor.name.clone();
                        match self.store.update_group(existing).await {
                            Ok(()) => result.updated += 1,
                            Err(e) => {
                                warn!(monitor_id, remote_id = %remote.id, "group link failed: {e}");
                                result.failed += 1;
                            }
                        }
                        continue;
                    }

                    let group = Group {
                        id: 0,
                        name: remote.name.clone(),
                        description: format!("Imported from {}", monitor.name),
                        monitor_id: Some(monitor_id),
                        external_id: Some(remote.id.clone()),
                        enabled: true,
                        status: EntityStatus::Active,
                        status_reason: None,
                        health_score: 100,
                        last_sync_at: Some(now),
                        external_source: monitor.name.clone(),
                    };
                    match self.store.add_group(group).await {
                        Ok(_) => result.added += 1,
                        Err(e) => {
                            warn!(monitor_id, remote_id = %remote.id, "group create failed: {e}");
                            result.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(monitor_id, remote_id = %remote.id, "group lookup failed: {e}");
                    result.failed += 1;
                }
            }
        }

        // flag local groups that no longer exist remotely; never delete
        for local in self
            .store
            .search_groups(&GroupFilter::for_monitor(monitor_id))
            .await?
        {
            let known = local
                .external_id
                .as_deref()
                .is_some_and(|ext| remote_ids.contains(ext));
            if !known {
                self.store
                    .update_group_status_reason(
                        local.id,
                        EntityStatus::Error,
                        Some(StatusReason::not_found_on_monitor("group")),
                    )
                    .await?;
            }
        }

        self.engine.recompute_monitor(monitor_id).await?;
        self.record_snapshot().await?;
        self.events.sync_event("groups", monitor_id, None, result);
        info!(
            monitor_id,
            added = result.added,
            updated = result.updated,
            "group sync finished"
        );
        Ok(result)
    }

    /// Pull a single group, matching remotely by external id or name.
    #[instrument(skip(self))]
    pub async fn pull_group(&self, monitor_id: Id, group_id: Id) -> Result<SyncResult, SyncError> {
        let mut group = self.store.get_group(group_id).await?;
        let monitor = self.store.get_monitor(monitor_id).await?;
        self.ensure_monitor_syncable(&monitor).await?;

        let client = self.connect(&monitor).await?;
        let remote_groups = client.get_host_groups().await.map_err(SyncError::from)?;

        let now = Utc::now();
        for remote in remote_groups {
            let id_matches = group.external_id.as_deref() == Some(remote.id.as_str());
            if id_matches || remote.name == group.name {
                group.name = remote.name;
                group.external_id = Some(remote.id);
                group.monitor_id = Some(monitor_id);
                group.last_sync_at = Some(now);
                group.external_source = monitor.name.clone();
                self.store.update_group(group).await?;
                return Ok(SyncResult {
                    updated: 1,
                    total: 1,
                    ..SyncResult::default()
                });
            }
        }

        self.store
            .update_group_status_reason(
                group_id,
                EntityStatus::Error,
                Some(StatusReason::not_found_on_monitor("group")),
            )
            .await?;
        Err(SyncError::Monitor(crate::monitor::MonitorError::NotFound(
            format!("group {}", group.name),
        )))
    }

    /// Push one local group to the backend, linking an existing remote group
    /// with the same name before creating a new one.
    #[instrument(skip(self))]
    pub async fn push_group(&self, monitor_id: Id, group_id: Id) -> Result<SyncResult, SyncError> {
        let mut group = self.store.get_group(group_id).await?;
        let monitor = self.store.get_monitor(monitor_id).await?;
        self.ensure_monitor_pushable(&monitor).await?;

        let client = self.connect(&monitor).await?;

        let mut result = SyncResult {
            total: 1,
            ..SyncResult::default()
        };

        if let Some(external_id) = group.external_id.clone()
            && group.monitor_id == Some(monitor_id)
        {
            client
                .update_host_group(&external_id, &group.name)
                .await
                .map_err(SyncError::from)?;
            result.updated += 1;
            return Ok(result);
        }

        let linked = client
            .get_host_group_by_name(&group.name)
            .await
            .map_err(SyncError::from)?;
        let external_id = match linked {
            Some(id) if !id.is_empty() => {
                result.updated += 1;
                id
            }
            _ => {
                let id = client
                    .create_host_group(&group.name)
                    .await
                    .map_err(SyncError::from)?;
                result.added += 1;
                id
            }
        };

        group.external_id = Some(external_id);
        group.monitor_id = Some(monitor_id);
        self.store.update_group(group).await?;
        Ok(result)
    }

    /// Build the group detail view, aggregating per-host summaries with a
    /// bounded number of store lookups in flight.
    pub async fn group_detail(&self, group_id: Id, limit: usize) -> Result<GroupDetail, SyncError> {
        let group = self.store.get_group(group_id).await?;
        let hosts = self
            .store
            .search_hosts(&HostFilter::for_group(group_id))
            .await?;

        let summary = self.member_summary(&hosts, limit).await;
        Ok(GroupDetail {
            group,
            summary,
            hosts,
        })
    }

    /// Aggregate host statuses and item counts under a concurrency cap.
    pub(crate) async fn member_summary(&self, hosts: &[Host], limit: usize) -> MemberSummary {
        let summary = Arc::new(Mutex::new(MemberSummary::default()));
        let hosts: Arc<Vec<Host>> = Arc::new(hosts.to_vec());

        let store = self.store.clone();
        let summary_ref = summary.clone();
        run_with_limit(hosts.len(), limit, move |i| {
            let store = store.clone();
            let hosts = hosts.clone();
            let summary = summary_ref.clone();
            async move {
                let host = &hosts[i];
                let item_count = store
                    .items_for_host(host.id)
                    .await
                    .map(|items| items.len() as u32)
                    .unwrap_or(0);

                let mut summary = match summary.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                summary.total_hosts += 1;
                match host.status {
                    EntityStatus::Active => summary.active_hosts += 1,
                    EntityStatus::Error => summary.error_hosts += 1,
                    EntityStatus::Syncing => summary.syncing_hosts += 1,
                    EntityStatus::Disabled => {}
                }
                summary.total_items += item_count;
            }
        })
        .await;

        // the fan-in above is the last owner of the lock
        Arc::try_unwrap(summary)
            .map(|m| m.into_inner().unwrap_or_default())
            .unwrap_or_default()
    }
}
