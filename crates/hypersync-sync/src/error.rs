//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during reconciliation and transport.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Message failed to decode or validate.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Message failed to encode.
    #[error("encode error: {0}")]
    Encode(String),

    /// Session opened on a store that is still accepting inserts.
    #[error("reconciliation requires a sealed store")]
    StoreNotSealed,

    /// Session settings are unusable.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] hypersync_store::StoreError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer is not reachable.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// Peer answered with an error.
    #[error("peer error: {0}")]
    PeerError(String),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
