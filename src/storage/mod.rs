//! Persistence port for the local inventory
//!
//! ## Design
//!
//! - **Trait-based**: [`InventoryStore`] lets the engine and reconcilers run
//!   against any backend; the engine choice itself is out of scope here.
//! - **Async**: all operations are async for compatibility with the actors.
//! - **Typed errors**: lookups return [`StoreError::NotFound`] so callers can
//!   match on the kind instead of inspecting strings.
//!
//! The in-memory implementation ships as the reference backend for tests and
//! the default hub runtime.

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::InventoryStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
