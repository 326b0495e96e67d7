//! Operations middleware keeping a local inventory (monitors, groups,
//! sites, hosts, items) consistent with external monitoring backends, and
//! turning inventory events into outbound notifications.
//!
//! The crate is organized around a handful of service objects wired
//! together at startup:
//!
//! - [`storage::InventoryStore`] — persistence port (in-memory reference
//!   implementation included)
//! - [`status`] — the status state machine: pure determination plus the
//!   propagation engine walking Monitor → Host → Item
//! - [`monitor`] — adapter contract against remote backends, with a
//!   Zabbix-style JSON-RPC client
//! - [`sync::Reconciler`] — bidirectional pull/push reconciliation
//! - [`queue::TaskQueue`] + [`actors::WorkerPool`] — durable async work
//!   with bounded retries and dead-lettering
//! - [`actors`] — the periodic loops (scheduler, auto-sync, status checks)

pub mod actors;
pub mod concurrency;
pub mod config;
pub mod events;
pub mod model;
pub mod monitor;
pub mod queue;
pub mod ratelimit;
pub mod status;
pub mod storage;
pub mod sync;

pub use model::{EntityStatus, SyncResult};
