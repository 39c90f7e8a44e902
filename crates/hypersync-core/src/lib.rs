//! # Hypersync Core
//!
//! Pure primitives for hypersync: identifiers, reconcilable items,
//! range bounds, fingerprints, and the index-tracking heap used by the
//! discovery scheduler.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Item`] - `(timestamp, id)` pair, the unit of reconciliation
//! - [`Bound`] - exclusive upper limit of a range of items
//! - [`Fingerprint`] / [`Accumulator`] - order-independent range digests
//! - [`Iri`], [`DiscoveryKey`] - resource addressing
//! - [`IndexedHeap`] - binary heap that reports element positions

pub mod error;
pub mod fingerprint;
pub mod heap;
pub mod item;
pub mod types;

pub use error::{CoreError, Result};
pub use fingerprint::{Accumulator, Fingerprint, FINGERPRINT_LEN};
pub use heap::{FnContext, HeapContext, IndexedHeap};
pub use item::{Bound, Item, MAX_TIMESTAMP};
pub use types::{AccountId, BlobId, DiscoveryKey, Iri, PeerId, SpaceId, Version, IRI_SCHEME};
