//! # Hypersync Sync
//!
//! Range-based set reconciliation between two peers.
//!
//! ## Overview
//!
//! Two peers each hold a sealed set of `(timestamp, id)` items. They
//! exchange range messages that describe slices of the item order either by
//! fingerprint or by explicit id list. Matching fingerprints close a range;
//! differing ones are split at the midpoint and sent again. After a
//! logarithmic number of round trips the initiator knows exactly which ids
//! it has that the responder lacks, and the reverse.
//!
//! ## Key Properties
//!
//! - **Sub-linear**: identical sets settle in one round trip
//! - **Filter-oblivious**: the session only sees the store's `for_each`,
//!   so an authorization wrapper decides what each peer can learn
//! - **Fail-closed decoding**: malformed messages are errors, never panics
//! - **Bounded frames**: outgoing messages respect a size limit
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hypersync_core::Item;
//! use hypersync_store::SliceStore;
//! use hypersync_sync::{ReconciliationSession, SessionConfig};
//!
//! # fn main() -> hypersync_sync::Result<()> {
//! let ours = SliceStore::from_items([Item::new(1, &b"a"[..])])?;
//! let theirs = SliceStore::from_items([Item::new(2, &b"b"[..])])?;
//!
//! let local = ReconciliationSession::new(&ours, SessionConfig::default())?;
//! let remote = ReconciliationSession::new(&theirs, SessionConfig::default())?;
//!
//! let (mut haves, mut wants) = (Vec::new(), Vec::new());
//! let mut msg = local.initiate()?;
//! while let Some(reply) = remote.reconcile(&msg)? {
//!     match local.reconcile_with_ids(&reply, &mut haves, &mut wants)? {
//!         Some(next) => msg = next,
//!         None => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Initiator                            Responder
//!   |-------- [fp(-inf, inf)] ---------->|
//!   |<------- [fp(lo), fp(hi)] ----------|   fingerprints differ, split
//!   |-------- [skip, ids(hi)] ---------->|   lower half matches
//!   |<------- [skip, ids(hi)] -----------|   responder's ids for the range
//!   |   diff -> haves / wants            |
//! ```

pub mod error;
pub mod messages;
pub mod protocol;
pub mod transport;

pub use error::{Result, SyncError};
pub use messages::{limits, Mode, Range, RangeMessage, PROTOCOL_VERSION};
pub use protocol::{ReconciliationSession, SessionConfig};
pub use transport::{
    memory::MemoryClient, memory::MemoryNetwork, AnnounceProgress, BlockExchange, Filter,
    ReconcileRequest, ReconcileResponse, SyncClient, SyncHandler, MAX_BLOBS_PER_ANNOUNCE,
};
