//! Status propagation engine
//!
//! Reloads an entity and its parent, runs the pure determination functions
//! and persists the outcome. Statuses are always recomputed from current
//! stored state, never patched incrementally, so every recompute is
//! idempotent and safe to call from multiple workers.
//!
//! An `Error` status keeps its persisted reason until a recompute lands on a
//! non-error status, which clears it. The transient `Syncing` marker only
//! touches the status column.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{instrument, warn};

use super::determine;
use crate::model::{EntityStatus, GroupFilter, HostFilter, Id, StatusReason};
use crate::storage::{InventoryStore, StoreResult};

#[derive(Clone)]
pub struct StatusEngine {
    store: Arc<dyn InventoryStore>,
}

impl StatusEngine {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------
    // Transient markers
    // ------------------------------------------------------------------

    pub async fn set_monitor_syncing(&self, id: Id) -> StoreResult<()> {
        self.store
            .update_monitor_status(id, EntityStatus::Syncing)
            .await
    }

    pub async fn set_host_syncing(&self, id: Id) -> StoreResult<()> {
        self.store.update_host_status(id, EntityStatus::Syncing).await
    }

    pub async fn set_item_syncing(&self, id: Id) -> StoreResult<()> {
        self.store.update_item_status(id, EntityStatus::Syncing).await
    }

    // ------------------------------------------------------------------
    // Error marking
    // ------------------------------------------------------------------

    pub async fn set_monitor_error(&self, id: Id, reason: StatusReason) -> StoreResult<()> {
        self.store
            .update_monitor_status_reason(id, EntityStatus::Error, Some(reason))
            .await
    }

    pub async fn set_host_error(&self, id: Id, reason: StatusReason) -> StoreResult<()> {
        self.store
            .update_host_status_reason(id, EntityStatus::Error, Some(reason))
            .await
    }

    pub async fn set_item_error(&self, id: Id, reason: StatusReason) -> StoreResult<()> {
        self.store
            .update_item_status_reason(id, EntityStatus::Error, Some(reason))
            .await
    }

    /// Mark a monitor and every descendant (hosts, their items) as failed
    /// with the same reason, then refresh the affected groups and sites.
    #[instrument(skip(self, reason))]
    pub async fn set_monitor_related_error(&self, id: Id, reason: StatusReason) -> StoreResult<()> {
        self.set_monitor_error(id, reason.clone()).await?;

        let hosts = self.store.search_hosts(&HostFilter::for_monitor(id)).await?;
        for host in &hosts {
            self.set_host_error(host.id, reason.clone()).await?;
            for item in self.store.items_for_host(host.id).await? {
                self.set_item_error(item.id, reason.clone()).await?;
            }
        }

        self.recompute_collections_for_monitor(id, &hosts).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recomputes
    // ------------------------------------------------------------------

    pub async fn recompute_monitor(&self, id: Id) -> StoreResult<EntityStatus> {
        let monitor = self.store.get_monitor(id).await?;
        let status = determine::monitor_status(&monitor);
        if status == EntityStatus::Error {
            self.store.update_monitor_status(id, status).await?;
        } else {
            self.store
                .update_monitor_status_reason(id, status, None)
                .await?;
        }

        let hosts = self.store.search_hosts(&HostFilter::for_monitor(id)).await?;
        let enabled: Vec<u8> = hosts
            .iter()
            .filter(|h| h.enabled)
            .map(|h| h.health_score)
            .collect();
        let score = if !enabled.is_empty() {
            (enabled.iter().map(|s| *s as u32).sum::<u32>() / enabled.len() as u32) as u8
        } else {
            determine::health_score_for(monitor.enabled, status)
        };
        self.store.update_monitor_health(id, score).await?;

        Ok(status)
    }

    pub async fn recompute_host(&self, id: Id) -> StoreResult<EntityStatus> {
        let host = self.store.get_host(id).await?;
        let monitor = self.store.get_monitor(host.monitor_id).await?;
        let status = determine::host_status(&host, &monitor);

        if status == EntityStatus::Error {
            // keep whatever reason got the host here
            self.store
                .update_host_status_reason(id, status, host.status_reason.clone())
                .await?;
        } else {
            self.store.update_host_status_reason(id, status, None).await?;
        }

        let score = determine::health_score_for(host.enabled, status);
        self.store.update_host_health(id, score).await?;

        Ok(status)
    }

    pub async fn recompute_item(&self, id: Id) -> StoreResult<EntityStatus> {
        let item = self.store.get_item(id).await?;
        let host = self.store.get_host(item.host_id).await?;
        let status = determine::item_status(&item, &host);

        if status == EntityStatus::Error {
            self.store
                .update_item_status_reason(id, status, item.status_reason.clone())
                .await?;
        } else {
            self.store.update_item_status_reason(id, status, None).await?;
        }

        Ok(status)
    }

    pub async fn recompute_items_for_host(&self, host_id: Id) -> StoreResult<()> {
        for item in self.store.items_for_host(host_id).await? {
            self.recompute_item(item.id).await?;
        }
        Ok(())
    }

    pub async fn recompute_group(&self, id: Id) -> StoreResult<EntityStatus> {
        let group = self.store.get_group(id).await?;
        let hosts = self.store.search_hosts(&HostFilter::for_group(id)).await?;
        let status = determine::group_status(&group, &hosts);

        if status == EntityStatus::Error {
            self.store
                .update_group_status_reason(id, status, group.status_reason.clone())
                .await?;
        } else {
            self.store
                .update_group_status_reason(id, status, None)
                .await?;
        }

        let enabled: Vec<u8> = hosts
            .iter()
            .filter(|h| h.enabled)
            .map(|h| h.health_score)
            .collect();
        let score = if !enabled.is_empty() {
            (enabled.iter().map(|s| *s as u32).sum::<u32>() / enabled.len() as u32) as u8
        } else if group.enabled {
            100
        } else {
            0
        };
        self.store.update_group_health(id, score).await?;

        Ok(status)
    }

    pub async fn recompute_site(&self, id: Id) -> StoreResult<EntityStatus> {
        let site = self.store.get_site(id).await?;
        let hosts = self.store.search_hosts(&HostFilter::for_site(id)).await?;
        let status = determine::site_status(&site, &hosts);

        if status == EntityStatus::Error {
            self.store
                .update_site_status_reason(id, status, site.status_reason.clone())
                .await?;
        } else {
            self.store.update_site_status_reason(id, status, None).await?;
        }

        Ok(status)
    }

    /// Recompute everything under a monitor: items, then hosts, then the
    /// groups and sites they belong to, and finally the monitor itself.
    #[instrument(skip(self))]
    pub async fn recompute_monitor_related(&self, monitor_id: Id) -> StoreResult<()> {
        let hosts = self
            .store
            .search_hosts(&HostFilter::for_monitor(monitor_id))
            .await?;

        for host in &hosts {
            if let Err(e) = self.recompute_items_for_host(host.id).await {
                warn!(host_id = host.id, "failed to recompute items: {e}");
            }
            if let Err(e) = self.recompute_host(host.id).await {
                warn!(host_id = host.id, "failed to recompute host: {e}");
            }
        }

        self.recompute_collections_for_monitor(monitor_id, &hosts)
            .await;

        self.recompute_monitor(monitor_id).await?;
        Ok(())
    }

    /// Refresh all groups and sites owned by the monitor or referenced by
    /// its hosts.
    async fn recompute_collections_for_monitor(
        &self,
        monitor_id: Id,
        hosts: &[crate::model::Host],
    ) {
        let mut group_ids = BTreeSet::new();
        let mut site_ids = BTreeSet::new();

        if let Ok(groups) = self
            .store
            .search_groups(&GroupFilter::for_monitor(monitor_id))
            .await
        {
            group_ids.extend(groups.iter().map(|g| g.id));
        }
        if let Ok(sites) = self
            .store
            .search_sites(&GroupFilter::for_monitor(monitor_id))
            .await
        {
            site_ids.extend(sites.iter().map(|s| s.id));
        }
        for host in hosts {
            group_ids.extend(host.group_id);
            site_ids.extend(host.site_id);
        }

        for gid in group_ids {
            if let Err(e) = self.recompute_group(gid).await {
                warn!(group_id = gid, "failed to recompute group: {e}");
            }
        }
        for sid in site_ids {
            if let Err(e) = self.recompute_site(sid).await {
                warn!(site_id = sid, "failed to recompute site: {e}");
            }
        }
    }

    pub async fn recompute_media(&self, id: Id) -> StoreResult<EntityStatus> {
        let media = self.store.get_media(id).await?;
        let status = determine::media_status(&media);
        self.store.update_media_status(id, status).await?;
        Ok(status)
    }

    pub async fn recompute_media_type(&self, id: Id) -> StoreResult<EntityStatus> {
        let media_type = self.store.get_media_type(id).await?;
        let status = determine::media_type_status(&media_type);
        self.store.update_media_type_status(id, status).await?;
        Ok(status)
    }

    pub async fn recompute_action(&self, id: Id) -> StoreResult<EntityStatus> {
        let action = self.store.get_action(id).await?;
        let media = match action.media_id {
            Some(mid) => self.store.get_media(mid).await.ok(),
            None => None,
        };
        let status = determine::action_status(&action, media.as_ref());
        self.store.update_action_status(id, status).await?;
        Ok(status)
    }

    pub async fn recompute_trigger(&self, id: Id) -> StoreResult<EntityStatus> {
        let trigger = self.store.get_trigger(id).await?;
        let status = determine::trigger_status(&trigger);
        self.store.update_trigger_status(id, status).await?;
        Ok(status)
    }

    /// Refresh stored status values for every entity in the inventory.
    #[instrument(skip(self))]
    pub async fn recompute_all(&self) -> StoreResult<()> {
        for host in self.store.search_hosts(&HostFilter::default()).await? {
            let _ = self.recompute_items_for_host(host.id).await;
            let _ = self.recompute_host(host.id).await;
        }
        for group in self.store.search_groups(&GroupFilter::default()).await? {
            let _ = self.recompute_group(group.id).await;
        }
        for site in self.store.search_sites(&GroupFilter::default()).await? {
            let _ = self.recompute_site(site.id).await;
        }
        for monitor in self.store.list_monitors().await? {
            let _ = self.recompute_monitor(monitor.id).await;
        }
        for media in self.store.list_media().await? {
            let _ = self.recompute_media(media.id).await;
        }
        for media_type in self.store.list_media_types().await? {
            let _ = self.recompute_media_type(media_type.id).await;
        }
        for action in self.store.list_actions().await? {
            let _ = self.recompute_action(action.id).await;
        }
        for trigger in self.store.list_triggers().await? {
            let _ = self.recompute_trigger(trigger.id).await;
        }
        Ok(())
    }
}
