//! Error types for the permissions module.

use thiserror::Error;

/// Errors that can occur during authorization lookups.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Capability not found.
    #[error("capability not found: {0}")]
    CapabilityNotFound(u64),

    /// A lock guarding the capability index was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Store error while building a filtered view.
    #[error("store error: {0}")]
    Store(#[from] hypersync_store::StoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
