//! Site reconciliation
//!
//! Sites follow the group reconciliation rules against the same remote
//! host-group records; they exist for a separate entity hierarchy and do not
//! use the name-matching fallback.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::groups::MemberSummary;
use super::{Reconciler, SyncError};
use crate::model::{
    EntityStatus, GroupFilter, Host, HostFilter, Id, Site, StatusReason, SyncResult,
};
use crate::monitor::MonitorClient;
use crate::storage::InventoryStore;

/// Site with aggregated member information
#[derive(Debug, Clone, serde::Serialize)]
pub struct SiteDetail {
    pub site: Site,
    pub summary: MemberSummary,
    pub hosts: Vec<Host>,
}

impl Reconciler {
    /// Pull the remote host-group set into local sites.
    #[instrument(skip(self))]
    pub async fn pull_sites(&self, monitor_id: Id) -> Result<SyncResult, SyncError> {
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

        for remote in &remote_groups {
            match self
                .store
                .find_site_by_external_id(monitor_id, &remote.id)
                .await
            {
                Ok(mut site) => {
                    site.name = remote.name.clone();
                    site.last_sync_at = Some(now);
                    match self.store.update_site(site).await {
                        Ok(()) => result.updated += 1,
                        Err(e) => {
                            warn!(monitor_id, remote_id = %remote.id, "site update failed: {e}");
                            result.failed += 1;
                        }
                    }
                }
                Err(e) if e.is_not_found() => {
                    let site = Site {
                        id: 0,
                        name: remote.name.clone(),
                        description: format!("Imported from {}", monitor.name),
                        monitor_id: Some(monitor_id),
                        external_id: Some(remote.id.clone()),
                        enabled: true,
                        status: EntityStatus::Active,
                        status_reason: None,
                        last_sync_at: Some(now),
                    };
                    match self.store.add_site(site).await {
                        Ok(_) => result.added += 1,
                        Err(e) => {
                            warn!(monitor_id, remote_id = %remote.id, "site create failed: {e}");
                            result.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(monitor_id, remote_id = %remote.id, "site lookup failed: {e}");
                    result.failed += 1;
                }
            }
        }

        // flag local sites that no longer exist remotely; never delete
        for local in self
            .store
            .search_sites(&GroupFilter::for_monitor(monitor_id))
            .await?
        {
            let known = local
                .external_id
                .as_deref()
                .is_some_and(|ext| remote_ids.contains(ext));
            if !known {
                self.store
                    .update_site_status_reason(
                        local.id,
                        EntityStatus::Error,
                        Some(StatusReason::not_found_on_monitor("site")),
                    )
                    .await?;
            }
        }

        self.engine.recompute_monitor(monitor_id).await?;
        self.record_snapshot().await?;
        self.events.sync_event("sites", monitor_id, None, result);
        info!(
            monitor_id,
            added = result.added,
            updated = result.updated,
            "site sync finished"
        );
        Ok(result)
    }

    /// Push one local site to the backend, linking an existing remote group
    /// with the same name before creating a new one.
    #[instrument(skip(self))]
    pub async fn push_site(&self, monitor_id: Id, site_id: Id) -> Result<SyncResult, SyncError> {
        let mut site = self.store.get_site(site_id).await?;
        let monitor = self.store.get_monitor(monitor_id).await?;
        self.ensure_monitor_pushable(&monitor).await?;

        let client = self.connect(&monitor).await?;

        let mut result = SyncResult {
            total: 1,
            ..SyncResult::default()
        };

        if let Some(external_id) = site.external_id.clone()
            && site.monitor_id == Some(monitor_id)
        {
            client
                .update_host_group(&external_id, &site.name)
                .await
                .map_err(SyncError::from)?;
            result.updated += 1;
            return Ok(result);
        }

        let linked = client
            .get_host_group_by_name(&site.name)
            .await
            .map_err(SyncError::from)?;
        let external_id = match linked {
            Some(id) if !id.is_empty() => {
                result.updated += 1;
                id
            }
            _ => {
                let id = client
                    .create_host_group(&site.name)
                    .await
                    .map_err(SyncError::from)?;
                result.added += 1;
                id
            }
        };

        site.external_id = Some(external_id);
        site.monitor_id = Some(monitor_id);
        self.store.update_site(site).await?;
        Ok(result)
    }

    /// Build the site detail view with bounded-parallel member aggregation.
    pub async fn site_detail(&self, site_id: Id, limit: usize) -> Result<SiteDetail, SyncError> {
        let site = self.store.get_site(site_id).await?;
        let hosts = self
            .store
            .search_hosts(&HostFilter::for_site(site_id))
            .await?;

        let summary = self.member_summary(&hosts, limit).await;
        Ok(SiteDetail {
            site,
            summary,
            hosts,
        })
    }
}
