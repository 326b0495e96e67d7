//! Inventory store trait definition
//!
//! This is the persistence port consumed by the status engine and the
//! reconcilers. Implementations must be `Send + Sync`; every lookup returns
//! [`StoreError::NotFound`] for missing records so callers can branch on the
//! error kind instead of sentinel values.
//!
//! Status updates come in two flavors, mirroring how reasons are managed:
//! `update_*_status` touches the status only (used for the transient Syncing
//! marker), while `update_*_status_reason` writes status and reason together
//! (used by recomputes, which clear the reason by passing `None`).

use async_trait::async_trait;

use super::error::StoreResult;
use crate::model::{
    Action, EntityStatus, Group, GroupFilter, Host, HostFilter, HostHistory, Id, Item, Media,
    MediaType, Monitor, Site, StatusReason, StatusSnapshot, Trigger,
};

#[async_trait]
pub trait InventoryStore: Send + Sync {
    // ------------------------------------------------------------------
    // Monitors
    // ------------------------------------------------------------------

    async fn get_monitor(&self, id: Id) -> StoreResult<Monitor>;
    async fn list_monitors(&self) -> StoreResult<Vec<Monitor>>;
    async fn add_monitor(&self, monitor: Monitor) -> StoreResult<Id>;
    async fn update_monitor(&self, monitor: Monitor) -> StoreResult<()>;

    /// Delete a monitor, cascading through its groups, hosts and items
    async fn delete_monitor(&self, id: Id) -> StoreResult<()>;

    async fn update_monitor_status(&self, id: Id, status: EntityStatus) -> StoreResult<()>;
    async fn update_monitor_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()>;
    async fn update_monitor_auth_token(&self, id: Id, token: Option<String>) -> StoreResult<()>;
    async fn update_monitor_health(&self, id: Id, score: u8) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Hosts
    // ------------------------------------------------------------------

    async fn get_host(&self, id: Id) -> StoreResult<Host>;
    async fn search_hosts(&self, filter: &HostFilter) -> StoreResult<Vec<Host>>;
    async fn count_hosts(&self, filter: &HostFilter) -> StoreResult<usize>;

    /// Look up a host by its remote id under a specific monitor
    async fn find_host_by_external_id(&self, monitor_id: Id, external_id: &str)
    -> StoreResult<Host>;

    async fn add_host(&self, host: Host) -> StoreResult<Id>;
    async fn update_host(&self, host: Host) -> StoreResult<()>;
    async fn delete_host(&self, id: Id) -> StoreResult<()>;

    async fn update_host_status(&self, id: Id, status: EntityStatus) -> StoreResult<()>;
    async fn update_host_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()>;
    async fn update_host_health(&self, id: Id, score: u8) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    async fn get_item(&self, id: Id) -> StoreResult<Item>;
    async fn items_for_host(&self, host_id: Id) -> StoreResult<Vec<Item>>;

    /// Look up an item by its remote id under a specific host
    async fn find_item_by_external_id(&self, host_id: Id, external_id: &str) -> StoreResult<Item>;

    async fn add_item(&self, item: Item) -> StoreResult<Id>;
    async fn update_item(&self, item: Item) -> StoreResult<()>;
    async fn delete_item(&self, id: Id) -> StoreResult<()>;

    async fn update_item_status(&self, id: Id, status: EntityStatus) -> StoreResult<()>;
    async fn update_item_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    async fn get_group(&self, id: Id) -> StoreResult<Group>;
    async fn search_groups(&self, filter: &GroupFilter) -> StoreResult<Vec<Group>>;
    async fn find_group_by_external_id(
        &self,
        monitor_id: Id,
        external_id: &str,
    ) -> StoreResult<Group>;
    async fn add_group(&self, group: Group) -> StoreResult<Id>;
    async fn update_group(&self, group: Group) -> StoreResult<()>;
    async fn delete_group(&self, id: Id) -> StoreResult<()>;

    async fn update_group_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()>;
    async fn update_group_health(&self, id: Id, score: u8) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    async fn get_site(&self, id: Id) -> StoreResult<Site>;
    async fn search_sites(&self, filter: &GroupFilter) -> StoreResult<Vec<Site>>;
    async fn find_site_by_external_id(&self, monitor_id: Id, external_id: &str)
    -> StoreResult<Site>;
    async fn add_site(&self, site: Site) -> StoreResult<Id>;
    async fn update_site(&self, site: Site) -> StoreResult<()>;
    async fn delete_site(&self, id: Id) -> StoreResult<()>;

    async fn update_site_status_reason(
        &self,
        id: Id,
        status: EntityStatus,
        reason: Option<StatusReason>,
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Notification entities (status recompute only; CRUD lives elsewhere)
    // ------------------------------------------------------------------

    async fn get_media(&self, id: Id) -> StoreResult<Media>;
    async fn list_media(&self) -> StoreResult<Vec<Media>>;
    async fn update_media_status(&self, id: Id, status: EntityStatus) -> StoreResult<()>;

    async fn get_media_type(&self, id: Id) -> StoreResult<MediaType>;
    async fn list_media_types(&self) -> StoreResult<Vec<MediaType>>;
    async fn update_media_type_status(&self, id: Id, status: EntityStatus) -> StoreResult<()>;

    async fn get_action(&self, id: Id) -> StoreResult<Action>;
    async fn list_actions(&self) -> StoreResult<Vec<Action>>;
    async fn update_action_status(&self, id: Id, status: EntityStatus) -> StoreResult<()>;

    async fn get_trigger(&self, id: Id) -> StoreResult<Trigger>;
    async fn list_triggers(&self) -> StoreResult<Vec<Trigger>>;
    async fn update_trigger_status(&self, id: Id, status: EntityStatus) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    async fn record_host_history(&self, entry: HostHistory) -> StoreResult<()>;
    async fn record_status_snapshot(&self, snapshot: StatusSnapshot) -> StoreResult<()>;
}
