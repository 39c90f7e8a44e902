//! # Hypersync
//!
//! Discovery scheduling and peer-to-peer content synchronization.
//!
//! ## Overview
//!
//! Hypersync keeps a local content index in step with other peers:
//!
//! - **Subscriptions**: resources refreshed on a fixed cadence
//! - **Discovery**: one-off lookups, kept "hot" while someone is waiting
//! - **Reconciliation**: range-based set reconciliation finds what each
//!   side is missing in a logarithmic number of round trips
//! - **Authorization**: peers only ever learn about content they may read
//!
//! ## Key Concepts
//!
//! - **DiscoveryScheduler**: bounded worker pool over a time-ordered queue
//! - **SyncService**: fans reconciliation out to many peers in parallel
//! - **SyncServer**: answers reconcile calls from a per-caller filtered store
//! - **SyncCtx**: cancellation plus deadline, carried through every call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hypersync::{NoopMetrics, ServiceDeps, StaticDirectory, SyncConfig, SyncService};
//! use hypersync::core::{AccountId, Iri, PeerId};
//! use hypersync::perms::CapabilityIndex;
//! use hypersync::store::MemoryIndex;
//! use hypersync::sync::MemoryNetwork;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> hypersync::Result<()> {
//! let network = MemoryNetwork::new();
//! let index = Arc::new(MemoryIndex::new());
//! let client = Arc::new(network.client(PeerId::new("me")));
//!
//! let service = SyncService::new(
//!     SyncConfig::default(),
//!     ServiceDeps {
//!         index: index.clone(),
//!         items: index.clone(),
//!         subscriptions: index.clone(),
//!         client: client.clone(),
//!         blocks: client,
//!         peers: Arc::new(StaticDirectory::new()),
//!         authority: Arc::new(CapabilityIndex::new()),
//!         metrics: Arc::new(NoopMetrics),
//!         local_peer: PeerId::new("me"),
//!         local_accounts: vec![AccountId::new("alice")],
//!     },
//! )?;
//!
//! service.subscribe(&Iri::parse("hm://alice/notes")?, true).await?;
//! service.run(CancellationToken::new()).await
//! # }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `hypersync::core` - identifiers, items, fingerprints, heap
//! - `hypersync::store` - range set stores and the content index
//! - `hypersync::sync` - reconciliation protocol and transport
//! - `hypersync::perms` - visibility filtering and space authorization

pub mod config;
pub mod ctx;
pub mod error;
pub mod metrics;
pub mod peers;
pub mod progress;
pub mod scheduler;
pub mod server;
pub mod service;

// Re-export component crates
pub use hypersync_core as core;
pub use hypersync_perms as perms;
pub use hypersync_store as store;
pub use hypersync_sync as sync;

// Re-export main types for convenience
pub use config::{ConfigError, SyncConfig};
pub use ctx::SyncCtx;
pub use error::{Error, Result};
pub use metrics::{CounterMetrics, MetricsSnapshot, NoopMetrics, SyncMetrics};
pub use peers::{PeerDirectory, StaticDirectory};
pub use progress::{Progress, ProgressSnapshot};
pub use scheduler::{
    Discoverer, DiscoveryScheduler, ScheduleOpts, SchedulerConfig, TaskInfo, TaskState,
};
pub use server::{PushAllowlist, SyncServer};
pub use service::{Entities, ServiceDeps, SyncResult, SyncService};
