//! # Hypersync Store
//!
//! Storage abstractions for hypersync. Provides the in-memory
//! [`RangeSetStore`] that reconciliation runs over, and the trait-based
//! interface to the persistent content index with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`RangeSetStore`] - sealable, ordered item collection
//! - [`SliceStore`] - the vector-backed range set store
//! - [`BlobIndex`], [`ItemSource`], [`SubscriptionStore`] - content index traits
//! - [`SqliteIndex`] - SQLite-based persistent index
//! - [`MemoryIndex`] - in-memory index for tests
//!
//! ## Usage
//!
//! ```rust
//! use hypersync_core::BlobId;
//! use hypersync_store::{RangeSetStore, SliceStore};
//!
//! let mut store = SliceStore::new();
//! store.insert(2, BlobId::from_static(b"b")).unwrap();
//! store.insert(1, BlobId::from_static(b"a")).unwrap();
//! store.seal().unwrap();
//!
//! assert_eq!(store.size().unwrap(), 2);
//! assert_eq!(store.get_item(0).unwrap().timestamp, 1);
//! ```
//!
//! ## Design Notes
//!
//! - **Seal once**: stores accept inserts until sealed and reads after
//! - **Duplicates collapse**: inserting the same item twice yields one position
//! - **Idempotent puts**: storing a known blob is a no-op
//! - **Scope selection**: recursive keys include every child resource

pub mod error;
pub mod memory;
pub mod migration;
pub mod slice;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryIndex;
pub use slice::SliceStore;
pub use sqlite::SqliteIndex;
pub use traits::{
    Blob, BlobIndex, ItemSource, RangeSetStore, ScopedItem, Subscription, SubscriptionStore,
};
