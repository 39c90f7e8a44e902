//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Range read on a store that has not been sealed yet.
    #[error("store is not sealed")]
    NotSealed,

    /// Insert into a store that has already been sealed.
    #[error("store is sealed")]
    Sealed,

    /// Insert into a base store that is shared by filtered views.
    #[error("store is shared and can no longer be modified")]
    Shared,

    /// Range outside the store.
    #[error("range {begin}..{end} out of bounds for store of size {size}")]
    OutOfBounds {
        begin: usize,
        end: usize,
        size: usize,
    },

    /// Item rejected on insert.
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding in-memory state was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Background blocking task failed.
    #[error("background task failed: {0}")]
    Task(String),

    /// Malformed identifier.
    #[error(transparent)]
    Core(#[from] hypersync_core::CoreError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
