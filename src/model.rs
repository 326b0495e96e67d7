//! Domain records for the local inventory
//!
//! Every entity that correlates to a remote record carries an `external_id`;
//! reconciliation matches on it and never deletes a local record that has
//! gone missing remotely (it is flagged instead).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal identifier for inventory records
pub type Id = u64;

/// Health/lifecycle status shared by all inventory entities
///
/// `Syncing` is a transient progress marker written at the start of a sync
/// operation and always overwritten by the final recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Disabled,
    Active,
    Error,
    Syncing,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityStatus::Disabled => "disabled",
            EntityStatus::Active => "active",
            EntityStatus::Error => "error",
            EntityStatus::Syncing => "syncing",
        };
        write!(f, "{s}")
    }
}

/// Machine-readable classification of a persisted failure reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MonitorInactive,
    MonitorError,
    NotFoundOnMonitor,
    AuthenticationFailed,
    ConnectionFailed,
    OwnershipMismatch,
    PullFailed,
    PushFailed,
    HostInactive,
}

/// Structured failure reason persisted alongside an `Error` status
///
/// The text is the operator-readable detail; the code is what tests and
/// alert routing match on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReason {
    pub code: ReasonCode,
    pub text: String,
}

impl StatusReason {
    pub fn new(code: ReasonCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn monitor_inactive(status: EntityStatus) -> Self {
        Self::new(
            ReasonCode::MonitorInactive,
            format!("monitor is not active (status: {status})"),
        )
    }

    pub fn monitor_error() -> Self {
        Self::new(ReasonCode::MonitorError, "monitor is in error state")
    }

    pub fn not_found_on_monitor(entity: &str) -> Self {
        Self::new(
            ReasonCode::NotFoundOnMonitor,
            format!("{entity} not found on monitor"),
        )
    }

    pub fn ownership_mismatch(child: &str, parent: &str) -> Self {
        Self::new(
            ReasonCode::OwnershipMismatch,
            format!("{child} does not belong to the specified {parent}"),
        )
    }

    pub fn host_inactive(status: EntityStatus) -> Self {
        Self::new(
            ReasonCode::HostInactive,
            format!("host is not active (status: {status})"),
        )
    }
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Protocol spoken by an external monitoring backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Zabbix,
    Prometheus,
    Other,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolKind::Zabbix => "zabbix",
            ProtocolKind::Prometheus => "prometheus",
            ProtocolKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Registration of an external monitoring backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Id,
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
    /// Cached session token obtained from the backend
    pub auth_token: Option<String>,
    /// Token identifying inbound webhook events from this backend
    pub event_token: String,
    pub description: String,
    pub protocol: ProtocolKind,
    pub enabled: bool,
    pub status: EntityStatus,
    pub status_reason: Option<StatusReason>,
    pub health_score: u8,
}

/// Logical collection of hosts mapped 1:1 to a remote host group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub monitor_id: Option<Id>,
    pub external_id: Option<String>,
    pub enabled: bool,
    pub status: EntityStatus,
    pub status_reason: Option<StatusReason>,
    pub health_score: u8,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Name of the backend the record was last synced from
    pub external_source: String,
}

/// Structurally identical to [`Group`], used by the site hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub monitor_id: Option<Id>,
    pub external_id: Option<String>,
    pub enabled: bool,
    pub status: EntityStatus,
    pub status_reason: Option<StatusReason>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// A monitored node, correlated to a remote host record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: Id,
    pub name: String,
    /// Remote host id; `None` until the host is pushed or pulled
    pub external_id: Option<String>,
    pub monitor_id: Id,
    pub group_id: Option<Id>,
    pub site_id: Option<Id>,
    pub description: String,
    pub enabled: bool,
    pub status: EntityStatus,
    pub status_reason: Option<StatusReason>,
    pub ip_addr: String,
    pub health_score: u8,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub external_source: String,
}

/// A metric source attached to exactly one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Id,
    pub name: String,
    pub host_id: Id,
    /// Remote item id
    pub external_id: Option<String>,
    /// Remote id of the owning host, as reported by the backend
    pub external_host_id: Option<String>,
    pub value_type: String,
    pub last_value: Option<String>,
    pub units: String,
    pub enabled: bool,
    pub status: EntityStatus,
    pub status_reason: Option<StatusReason>,
}

impl Item {
    /// Whether the item has ever reported a usable value
    pub fn has_value(&self) -> bool {
        match self.last_value.as_deref() {
            None | Some("") | Some("N/A") => false,
            Some(_) => true,
        }
    }
}

/// Outbound notification target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: Id,
    pub name: String,
    /// Delivery kind ("email", "webhook", ...), cached from the media type
    pub kind: String,
    pub media_type_id: Id,
    /// Address/endpoint/number the notification is sent to
    pub target: String,
    pub params: HashMap<String, String>,
    pub enabled: bool,
    pub status: EntityStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaType {
    pub id: Id,
    pub name: String,
    pub key: String,
    pub enabled: bool,
    pub status: EntityStatus,
}

/// Notification action binding an event source to a media target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Id,
    pub name: String,
    pub media_id: Option<Id>,
    pub enabled: bool,
    pub status: EntityStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEntity {
    Alert,
    Log,
    Item,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Id,
    pub name: String,
    pub entity: TriggerEntity,
    pub enabled: bool,
    pub status: EntityStatus,
}

/// Outcome counters of a single reconciliation call
///
/// Never persisted; aggregated, logged and broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: u32,
    pub updated: u32,
    pub failed: u32,
    pub total: u32,
}

impl SyncResult {
    /// Fold another result into this one (used by per-monitor batch variants)
    pub fn merge(&mut self, other: SyncResult) {
        self.added += other.added;
        self.updated += other.updated;
        self.failed += other.failed;
        self.total += other.total;
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} added={} updated={} failed={}",
            self.total, self.added, self.updated, self.failed
        )
    }
}

/// Point-in-time record of a host's status, written on pull
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostHistory {
    pub host_id: Id,
    pub status: EntityStatus,
    pub health_score: u8,
    pub sampled_at: DateTime<Utc>,
}

/// Aggregated host-status counts, recorded after each reconciliation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub sampled_at: Option<DateTime<Utc>>,
    pub active_hosts: u32,
    pub error_hosts: u32,
    pub syncing_hosts: u32,
    pub disabled_hosts: u32,
    pub total_items: u32,
}

/// Search filter for hosts
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub monitor_id: Option<Id>,
    pub group_id: Option<Id>,
    pub site_id: Option<Id>,
    pub query: Option<String>,
}

impl HostFilter {
    pub fn for_monitor(monitor_id: Id) -> Self {
        Self {
            monitor_id: Some(monitor_id),
            ..Self::default()
        }
    }

    pub fn for_group(group_id: Id) -> Self {
        Self {
            group_id: Some(group_id),
            ..Self::default()
        }
    }

    pub fn for_site(site_id: Id) -> Self {
        Self {
            site_id: Some(site_id),
            ..Self::default()
        }
    }
}

/// Search filter for groups and sites
#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub monitor_id: Option<Id>,
    pub query: Option<String>,
}

impl GroupFilter {
    pub fn for_monitor(monitor_id: Id) -> Self {
        Self {
            monitor_id: Some(monitor_id),
            query: None,
        }
    }
}
