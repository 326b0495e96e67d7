//! Error types for inventory store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur against the persistence port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested record does not exist
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint was violated (duplicate external id, name, ...)
    Conflict(String),

    /// Cross-entity ownership or validation failure
    InvalidInput(String),

    /// Backend-specific failure
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => write!(f, "{entity} {id} not found"),
            StoreError::Conflict(msg) => write!(f, "conflict: {msg}"),
            StoreError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
