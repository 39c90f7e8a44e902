//! Error types for hypersync core.

use thiserror::Error;

/// Errors from parsing and validating core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Resource identifier is malformed.
    #[error("invalid resource identifier: {0}")]
    InvalidIri(String),

    /// Hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
