//! Pure status determination
//!
//! One total function per entity kind, each taking the entity and its
//! parent's live state. No I/O, no side effects; the propagation engine
//! reloads current state, calls these, and persists the result.

use crate::model::{
    Action, EntityStatus, Group, Host, Item, Media, MediaType, Monitor, Site, Trigger,
};

/// A monitor is active when it is enabled and either holds a cached session
/// token or has credentials to obtain one.
pub fn monitor_status(monitor: &Monitor) -> EntityStatus {
    if !monitor.enabled {
        return EntityStatus::Disabled;
    }
    if monitor.auth_token.is_some() {
        return EntityStatus::Active;
    }
    if monitor.username.is_empty() && monitor.password.is_empty() {
        return EntityStatus::Disabled;
    }
    EntityStatus::Active
}

/// A host inherits failure from its monitor and needs a materialized external
/// id before it can be considered active.
pub fn host_status(host: &Host, monitor: &Monitor) -> EntityStatus {
    if !host.enabled {
        return EntityStatus::Disabled;
    }
    if !monitor.enabled || monitor.status == EntityStatus::Error {
        return EntityStatus::Error;
    }
    if host.status == EntityStatus::Error {
        return EntityStatus::Error;
    }
    if host.external_id.is_none() {
        return EntityStatus::Error;
    }
    match monitor.status {
        EntityStatus::Active | EntityStatus::Syncing => EntityStatus::Active,
        _ => EntityStatus::Disabled,
    }
}

pub fn item_status(item: &Item, host: &Host) -> EntityStatus {
    if !item.enabled || !host.enabled {
        return EntityStatus::Disabled;
    }
    match host.status {
        EntityStatus::Error => return EntityStatus::Error,
        EntityStatus::Disabled => return EntityStatus::Disabled,
        _ => {}
    }
    if item.status == EntityStatus::Error {
        return EntityStatus::Error;
    }
    if item.external_id.is_none() {
        return EntityStatus::Error;
    }
    if !item.has_value() {
        return EntityStatus::Disabled;
    }
    EntityStatus::Active
}

pub fn media_status(media: &Media) -> EntityStatus {
    if !media.enabled {
        return EntityStatus::Disabled;
    }
    if media.kind.is_empty() || media.target.is_empty() {
        return EntityStatus::Error;
    }
    EntityStatus::Active
}

pub fn media_type_status(media_type: &MediaType) -> EntityStatus {
    if !media_type.enabled {
        return EntityStatus::Disabled;
    }
    if media_type.key.is_empty() {
        return EntityStatus::Error;
    }
    EntityStatus::Active
}

pub fn action_status(action: &Action, media: Option<&Media>) -> EntityStatus {
    if !action.enabled {
        return EntityStatus::Disabled;
    }
    match media {
        None => EntityStatus::Error,
        Some(m) if m.status == EntityStatus::Error => EntityStatus::Error,
        Some(_) => EntityStatus::Active,
    }
}

pub fn trigger_status(trigger: &Trigger) -> EntityStatus {
    if !trigger.enabled {
        return EntityStatus::Disabled;
    }
    EntityStatus::Active
}

/// Aggregate member host statuses: any Error wins, then Syncing, then Active.
fn aggregate_member_status(hosts: &[Host]) -> EntityStatus {
    let mut seen_syncing = false;
    let mut seen_active = false;
    for host in hosts {
        match host.status {
            EntityStatus::Error => return EntityStatus::Error,
            EntityStatus::Syncing => seen_syncing = true,
            EntityStatus::Active => seen_active = true,
            EntityStatus::Disabled => {}
        }
    }
    if seen_syncing {
        EntityStatus::Syncing
    } else if seen_active {
        EntityStatus::Active
    } else {
        EntityStatus::Disabled
    }
}

pub fn group_status(group: &Group, hosts: &[Host]) -> EntityStatus {
    if !group.enabled {
        return EntityStatus::Disabled;
    }
    aggregate_member_status(hosts)
}

pub fn site_status(site: &Site, hosts: &[Host]) -> EntityStatus {
    if !site.enabled {
        return EntityStatus::Disabled;
    }
    aggregate_member_status(hosts)
}

/// Health score derived from a recomputed status
pub fn health_score_for(enabled: bool, status: EntityStatus) -> u8 {
    if !enabled {
        return 0;
    }
    match status {
        EntityStatus::Active => 100,
        EntityStatus::Syncing => 50,
        EntityStatus::Error | EntityStatus::Disabled => 0,
    }
}
