//! In-memory inventory store
//!
//! Reference implementation of the persistence port. Used by the test suite
//! and as the default backend of the hub binary; a database-backed
//! implementation plugs in behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::backend::InventoryStore;
use super::error::{StoreError, StoreResult};
use crate::model::{
    Action, EntityStatus, Group, GroupFilter, Host, HostFilter, HostHistory, Id, Item, Media,
    MediaType, Monitor, Site, StatusReason, StatusSnapshot, Trigger,
};

#[derive(Default)]
struct Inner {
    monitors: HashMap<Id, Monitor>,
    hosts: HashMap<Id, Host>,
    items: HashMap<Id, Item>,
    groups: HashMap<Id, Group>,
    sites: HashMap<Id, Site>,
    media: HashMap<Id, Media>,
    media_types: HashMap<Id, MediaType>,
    actions: HashMap<Id, Action>,
    triggers: HashMap<Id, Trigger>,
    host_history: Vec<HostHistory>,
    snapshots: Vec<StatusSnapshot>,
    next_id: Id,
}

impl Inner {
    fn alloc_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory inventory store backed by a single `RwLock`
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 0,
                ..Inner::default()
            }),
        }
    }

    /// Number of recorded host history entries (test observability)
    pub async fn host_history_len(&self) -> usize {
        self.inner.read().await.host_history.len()
    }

    /// Recorded status snapshots (test observability)
    pub async fn snapshots(&self) -> Vec<StatusSnapshot> {
        self.inner.read().await.snapshots.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn host_matches(host: &Host, filter: &HostFilter) -> bool {
    if let Some(mid) = filter.monitor_id
        && host.monitor_id != mid
    {
        return false;
    }
    if let Some(gid) = filter.group_id
        && host.group_id != Some(gid)
    {
        return false;
    }
    if let Some(sid) = filter.site_id
        && host.site_id != Some(sid)
    {
        return false;
    }
    if let Some(query) = &filter.query
        && !host.name.to_lowercase().contains(&query.to_lowercase())
    {
        return false;
    }
    true
}

fn sorted_by_id<T, F: Fn(&T) -> Id>(mut records: Vec<T>, id_of: F) -> Vec<T> {
    records.sort_by_key(|r| id_of(r));
    records
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn get_monitor(&self, id: Id) -> StoreResult<Monitor> {
        self.inner
            .read()
            .await
            .monitors
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("monitor", id))
    }

    async fn list_monitors(&self) -> StoreResult<Vec<Monitor>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner.monitors.values().cloned().collect(),
            |m: &Monitor| m.id,
        ))
    }

    async fn add_monitor(&self, mut monitor: Monitor) -> StoreResult<Id> {
        let mut inner = self.inner.write().await;
        if monitor.id == 0 {
            monitor.id = inner.alloc_id();
        } else if inner.monitors.contains_key(&monitor.id) {
            return Err(StoreError::Conflict(format!(
                "monitor {} already exists",
                monitor.id
            )));
        }
        let id = monitor.id;
        inner.monitors.insert(id, monitor);
        Ok(id)
    }

    async fn update_monitor(&self, monitor: Monitor) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.monitors.contains_key(&monitor.id) {
            return Err(StoreError::not_found("monitor", monitor.id));
        }
        inner.monitors.insert(monitor.id, monitor);
        Ok(())
    }

    async fn delete_monitor(&self, id: Id) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.monitors.remove(&id).is_none() {
            return Err(StoreError::not_found("monitor", id));
        }
        let host_ids: Vec<Id> = inner
            .hosts
            .values()
            .filter(|h| h.monitor_id == id)
            .map(|h| h.id)
            .collect();
        for hid in &host_ids {
            inner.hosts.remove(hid);
        }
        inner
            .items
            .retain(|_, item| !host_ids.contains(&item.host_id));
        inner.groups.retain(|_, g| g.monitor_id != Some(id));
        inner.sites.retain(|_, s| s.monitor_id != Some(id));
        Ok(())
    }

    async fn update_monitor_status(&self, id: Id, status: EntityStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let monitor = inner
            .monitors
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("monitor", id))?;
        monitor.status = status;
        Ok(())
    }

    async fn update_monitor_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let monitor = inner
            .monitors
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("monitor", id))?;
        monitor.status = status;
        monitor.status_reason = reason;
        Ok(())
    }

    async fn update_monitor_auth_token(&self, id: Id, token: Option<String>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let monitor = inner
            .monitors
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("monitor", id))?;
        monitor.auth_token = token;
        Ok(())
    }

    async fn update_monitor_health(&self, id: Id, score: u8) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let monitor = inner
            .monitors
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("monitor", id))?;
        monitor.health_score = score;
        Ok(())
    }

    async fn get_host(&self, id: Id) -> StoreResult<Host> {
        self.inner
            .read()
            .await
            .hosts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("host", id))
    }

    async fn search_hosts(&self, filter: &HostFilter) -> StoreResult<Vec<Host>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner
                .hosts
                .values()
                .filter(|h| host_matches(h, filter))
                .cloned()
                .collect(),
            |h: &Host| h.id,
        ))
    }

    async fn count_hosts(&self, filter: &HostFilter) -> StoreResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner.hosts.values().filter(|h| host_matches(h, filter)).count())
    }

    async fn find_host_by_external_id(
        &self,
        monitor_id: Id,
        external_id: &str,
    ) -> StoreResult<Host> {
        let inner = self.inner.read().await;
        inner
            .hosts
            .values()
            .find(|h| h.monitor_id == monitor_id && h.external_id.as_deref() == Some(external_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("host", external_id))
    }

    async fn add_host(&self, mut host: Host) -> StoreResult<Id> {
        let mut inner = self.inner.write().await;
        if !inner.monitors.contains_key(&host.monitor_id) {
            return Err(StoreError::InvalidInput(format!(
                "host references unknown monitor {}",
                host.monitor_id
            )));
        }
        if let Some(ext) = &host.external_id
            && inner
                .hosts
                .values()
                .any(|h| h.monitor_id == host.monitor_id && h.external_id.as_ref() == Some(ext))
        {
            return Err(StoreError::Conflict(format!(
                "host with external id {ext} already exists under monitor {}",
                host.monitor_id
            )));
        }
        if host.id == 0 {
            host.id = inner.alloc_id();
        }
        let id = host.id;
        inner.hosts.insert(id, host);
        Ok(id)
    }

    async fn update_host(&self, host: Host) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.hosts.contains_key(&host.id) {
            return Err(StoreError::not_found("host", host.id));
        }
        inner.hosts.insert(host.id, host);
        Ok(())
    }

    async fn delete_host(&self, id: Id) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.hosts.remove(&id).is_none() {
            return Err(StoreError::not_found("host", id));
        }
        inner.items.retain(|_, item| item.host_id != id);
        Ok(())
    }

    async fn update_host_status(&self, id: Id, status: EntityStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let host = inner
            .hosts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("host", id))?;
        host.status = status;
        Ok(())
    }

    async fn update_host_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let host = inner
            .hosts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("host", id))?;
        host.status = status;
        host.status_reason = reason;
        Ok(())
    }

    async fn update_host_health(&self, id: Id, score: u8) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let host = inner
            .hosts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("host", id))?;
        host.health_score = score;
        Ok(())
    }

    async fn get_item(&self, id: Id) -> StoreResult<Item> {
        self.inner
            .read()
            .await
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("item", id))
    }

    async fn items_for_host(&self, host_id: Id) -> StoreResult<Vec<Item>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner
                .items
                .values()
                .filter(|i| i.host_id == host_id)
                .cloned()
                .collect(),
            |i: &Item| i.id,
        ))
    }

    async fn find_item_by_external_id(&self, host_id: Id, external_id: &str) -> StoreResult<Item> {
        let inner = self.inner.read().await;
        inner
            .items
            .values()
            .find(|i| i.host_id == host_id && i.external_id.as_deref() == Some(external_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("item", external_id))
    }

    async fn add_item(&self, mut item: Item) -> StoreResult<Id> {
        let mut inner = self.inner.write().await;
        if !inner.hosts.contains_key(&item.host_id) {
            return Err(StoreError::InvalidInput(format!(
                "item references unknown host {}",
                item.host_id
            )));
        }
        if item.id == 0 {
            item.id = inner.alloc_id();
        }
        let id = item.id;
        inner.items.insert(id, item);
        Ok(id)
    }

    async fn update_item(&self, item: Item) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.items.contains_key(&item.id) {
            return Err(StoreError::not_found("item", item.id));
        }
        inner.items.insert(item.id, item);
        Ok(())
    }

    async fn delete_item(&self, id: Id) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.items.remove(&id).is_none() {
            return Err(StoreError::not_found("item", id));
        }
        Ok(())
    }

    async fn update_item_status(&self, id: Id, status: EntityStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("item", id))?;
        item.status = status;
        Ok(())
    }

    async fn update_item_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("item", id))?;
        item.status = status;
        item.status_reason = reason;
        Ok(())
    }

    async fn get_group(&self, id: Id) -> StoreResult<Group> {
        self.inner
            .read()
            .await
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", id))
    }

    async fn search_groups(&self, filter: &GroupFilter) -> StoreResult<Vec<Group>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner
                .groups
                .values()
                .filter(|g| {
                    filter.monitor_id.is_none_or(|mid| g.monitor_id == Some(mid))
                        && filter.query.as_ref().is_none_or(|q| {
                            g.name.to_lowercase().contains(&q.to_lowercase())
                        })
                })
                .cloned()
                .collect(),
            |g: &Group| g.id,
        ))
    }

    async fn find_group_by_external_id(
        &self,
        monitor_id: Id,
        external_id: &str,
    ) -> StoreResult<Group> {
        let inner = self.inner.read().await;
        inner
            .groups
            .values()
            .find(|g| {
                g.monitor_id == Some(monitor_id) && g.external_id.as_deref() == Some(external_id)
            })
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", external_id))
    }

    async fn add_group(&self, mut group: Group) -> StoreResult<Id> {
        let mut inner = self.inner.write().await;
        if group.id == 0 {
            group.id = inner.alloc_id();
        }
        let id = group.id;
        inner.groups.insert(id, group);
        Ok(id)
    }

    async fn update_group(&self, group: Group) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.groups.contains_key(&group.id) {
            return Err(StoreError::not_found("group", group.id));
        }
        inner.groups.insert(group.id, group);
        Ok(())
    }

    async fn delete_group(&self, id: Id) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.groups.remove(&id).is_none() {
            return Err(StoreError::not_found("group", id));
        }
        for host in inner.hosts.values_mut() {
            if host.group_id == Some(id) {
                host.group_id = None;
            }
        }
        Ok(())
    }

    async fn update_group_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let group = inner
            .groups
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("group", id))?;
        group.status = status;
        group.status_reason = reason;
        Ok(())
    }

    async fn update_group_health(&self, id: Id, score: u8) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let group = inner
            .groups
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("group", id))?;
        group.health_score = score;
        Ok(())
    }

    async fn get_site(&self, id: Id) -> StoreResult<Site> {
        self.inner
            .read()
            .await
            .sites
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("site", id))
    }

    async fn search_sites(&self, filter: &GroupFilter) -> StoreResult<Vec<Site>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner
                .sites
                .values()
                .filter(|s| {
                    filter.monitor_id.is_none_or(|mid| s.monitor_id == Some(mid))
                        && filter.query.as_ref().is_none_or(|q| {
                            s.name.to_lowercase().contains(&q.to_lowercase())
                        })
                })
                .cloned()
                .collect(),
            |s: &Site| s.id,
        ))
    }

    async fn find_site_by_external_id(
        &self,
        monitor_id: Id,
        external_id: &str,
    ) -> StoreResult<Site> {
        let inner = self.inner.read().await;
        inner
            .sites
            .values()
            .find(|s| {
                s.monitor_id == Some(monitor_id) && s.external_id.as_deref() == Some(external_id)
            })
            .cloned()
            .ok_or_else(|| StoreError::not_found("site", external_id))
    }

    async fn add_site(&self, mut site: Site) -> StoreResult<Id> {
        let mut inner = self.inner.write().await;
        if site.id == 0 {
            site.id = inner.alloc_id();
        }
        let id = site.id;
        inner.sites.insert(id, site);
        Ok(id)
    }

    async fn update_site(&self, site: Site) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.sites.contains_key(&site.id) {
            return Err(StoreError::not_found("site", site.id));
        }
        inner.sites.insert(site.id, site);
        Ok(())
    }

    async fn delete_site(&self, id: Id) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.sites.remove(&id).is_none() {
            return Err(StoreError::not_found("site", id));
        }
        for host in inner.hosts.values_mut() {
            if host.site_id == Some(id) {
                host.site_id = None;
            }
        }
        Ok(())
    }

    async fn update_site_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let site = inner
            .sites
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("site", id))?;
        site.status = status;
        site.status_reason = reason;
        Ok(())
    }

    async fn get_media(&self, id: Id) -> StoreResult<Media> {
        self.inner
            .read()
            .await
            .media
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("media", id))
    }

    async fn list_media(&self) -> StoreResult<Vec<Media>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner.media.values().cloned().collect(),
            |m: &Media| m.id,
        ))
    }

    async fn update_media_status(&self, id: Id, status: EntityStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let media = inner
            .media
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("media", id))?;
        media.status = status;
        Ok(())
    }

    async fn get_media_type(&self, id: Id) -> StoreResult<MediaType> {
        self.inner
            .read()
            .await
            .media_types
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("media type", id))
    }

    async fn list_media_types(&self) -> StoreResult<Vec<MediaType>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner.media_types.values().cloned().collect(),
            |m: &MediaType| m.id,
        ))
    }

    async fn update_media_type_status(&self, id: Id, status: EntityStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let media_type = inner
            .media_types
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("media type", id))?;
        media_type.status = status;
        Ok(())
    }

    async fn get_action(&self, id: Id) -> StoreResult<Action> {
        self.inner
            .read()
            .await
            .actions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("action", id))
    }

    async fn list_actions(&self) -> StoreResult<Vec<Action>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner.actions.values().cloned().collect(),
            |a: &Action| a.id,
        ))
    }

    async fn update_action_status(&self, id: Id, status: EntityStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let action = inner
            .actions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("action", id))?;
        action.status = status;
        Ok(())
    }

    async fn get_trigger(&self, id: Id) -> StoreResult<Trigger> {
        self.inner
            .read()
            .await
            .triggers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("trigger", id))
    }

    async fn list_triggers(&self) -> StoreResult<Vec<Trigger>> {
        let inner = self.inner.read().await;
        Ok(sorted_by_id(
            inner.triggers.values().cloned().collect(),
            |t: &Trigger| t.id,
        ))
    }

    async fn update_trigger_status(&self, id: Id, status: EntityStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let trigger = inner
            .triggers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("trigger", id))?;
        trigger.status = status;
        Ok(())
    }

    async fn record_host_history(&self, entry: HostHistory) -> StoreResult<()> {
        self.inner.write().await.host_history.push(entry);
        Ok(())
    }

    async fn record_status_snapshot(&self, snapshot: StatusSnapshot) -> StoreResult<()> {
        self.inner.write().await.snapshots.push(snapshot);
        Ok(())
    }
}

/// Insert helpers used by the media/action/trigger recompute paths and tests.
///
/// These entities are owned by out-of-scope CRUD surfaces; the store only
/// needs a way to materialize them.
impl MemoryStore {
    pub async fn insert_media(&self, mut media: Media) -> Id {
        let mut inner = self.inner.write().await;
        if media.id == 0 {
            media.id = inner.alloc_id();
        }
        let id = media.id;
        inner.media.insert(id, media);
        id
    }

    pub async fn insert_media_type(&self, mut media_type: MediaType) -> Id {
        let mut inner = self.inner.write().await;
        if media_type.id == 0 {
            media_type.id = inner.alloc_id();
        }
        let id = media_type.id;
        inner.media_types.insert(id, media_type);
        id
    }

    pub async fn insert_action(&self, mut action: Action) -> Id {
        let mut inner = self.inner.write().await;
        if action.id == 0 {
            action.id = inner.alloc_id();
        }
        let id = action.id;
        inner.actions.insert(id, action);
        id
    }

    pub async fn insert_trigger(&self, mut trigger: Trigger) -> Id {
        let mut inner = self.inner.write().await;
        if trigger.id == 0 {
            trigger.id = inner.alloc_id();
        }
        let id = trigger.id;
        inner.triggers.insert(id, trigger);
        id
    }
}
