//! Error types for berth-store

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the slot store
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The distinguished create-if-absent conflict: the key is taken
    #[error("record '{name}' already exists")]
    AlreadyExists { name: String },

    /// Record not found
    #[error("record '{name}' not found")]
    RecordNotFound { name: String },

    /// Every candidate slot is taken
    ///
    /// `max` carries the searched maximum; 0 means the unbounded search
    /// cap was exhausted.
    #[error("no free slot (searched up to {max})")]
    NoFreeSlot { max: u32 },

    /// Backing tool exited non-zero
    #[error("external tool failed: {argv}: {stderr}")]
    Tool { argv: String, stderr: String },

    /// Backing tool exceeded its deadline
    #[error("external tool timed out: {argv}")]
    Timeout { argv: String },

    /// Anything else the backend reports
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Namespace resolution for a candidate slot failed
    #[error(transparent)]
    Engine(#[from] berth_engine::EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Is this the create-if-absent conflict?
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Is this a missing-record condition?
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::RecordNotFound { .. })
    }
}
