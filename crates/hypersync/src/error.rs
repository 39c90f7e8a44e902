//! Error types for the sync service.

use hypersync_core::CoreError;
use hypersync_perms::PermsError;
use hypersync_store::StoreError;
use hypersync_sync::SyncError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during discovery and syncing.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Core type error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Reconciliation or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Authorization error.
    #[error("permission error: {0}")]
    Perms(#[from] PermsError),

    /// Another one-shot sync holds the sync lock.
    #[error("sync is already running")]
    SyncAlreadyRunning,

    /// The scheduler loop was started twice.
    #[error("scheduler is already running")]
    SchedulerRunning,

    /// A sync was started without a deadline.
    #[error("BUG: sync must have a deadline")]
    MissingDeadline,

    /// The reconciliation did not converge within the round cap.
    #[error("too many rounds of interactive syncing: {0}")]
    TooManyRounds(usize),

    /// Nothing was asked for.
    #[error("must specify entities to sync")]
    NoEntities,

    /// The target peer is this node.
    #[error("can't sync with self")]
    SelfSync,

    /// Discovery was turned off in the config.
    #[error("remote content discovery is disabled")]
    DiscoveryDisabled,

    /// Providers answered but none had the resource.
    #[error("found some providers but could not get {0}")]
    NotFound(String),

    /// No peer could be found for the subscribed content.
    #[error("could not find any provider for the subscribed content")]
    NoProviders,

    /// Deadline passed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, Error>;
