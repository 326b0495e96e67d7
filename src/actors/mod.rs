//! Background actors of the sync engine
//!
//! Each actor runs as an independent async task. Control flows over mpsc
//! command channels (with oneshot responses where a caller waits), progress
//! flows over the broadcast [`EventHub`](crate::events::EventHub).
//!
//! ```text
//!  SchedulerActor ──enqueue──▶ TaskQueue ◀──dequeue── WorkerPool (N)
//!                                                        │ dispatch
//!  AutoSyncActor ──────────direct pulls──────────▶ Reconciler
//!  StatusCheckActor ───────status probes─────────▶ StatusEngine
//! ```
//!
//! There is no process-wide state: every actor is constructed from explicit
//! service objects, so tests instantiate isolated copies.

pub mod auto_sync;
pub mod scheduler;
pub mod status_check;
pub mod worker;

pub use auto_sync::AutoSyncHandle;
pub use scheduler::SchedulerHandle;
pub use status_check::{StatusCheckHandle, StatusChecker};
pub use worker::WorkerPool;
