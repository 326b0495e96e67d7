//! Status state machine
//!
//! Split into the pure determination functions ([`determine`]) and the
//! propagation engine ([`StatusEngine`]) that persists recomputed statuses
//! and walks the Monitor → Host → Item cascade.

pub mod determine;
pub mod propagate;

pub use propagate::StatusEngine;
