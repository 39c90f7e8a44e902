//! # Hypersync Permissions
//!
//! Per-item visibility and space authorization for reconciliation.
//!
//! ## Overview
//!
//! Content can be private to one or more spaces. When a peer asks to
//! reconcile, the responder computes the spaces that peer may read and
//! reconciles against a filtered view of its items. Filtering happens
//! inside the store, so the reconciliation algorithm stays unaware of it.
//!
//! ## Key Concepts
//!
//! - **AuthorizedStore**: range set store wrapper that hides private items
//! - **VisibilityKey**: `(item index, space)` record marking an item private
//! - **SpaceAuthority**: answers "which spaces may this peer read"
//! - **CapabilityIndex**: in-memory authority built from delegations
//!
//! ## Usage
//!
//! ```rust
//! use hypersync_core::{BlobId, SpaceId};
//! use hypersync_perms::AuthorizedStore;
//! use hypersync_store::{RangeSetStore, SliceStore};
//!
//! let mut store = AuthorizedStore::new(SliceStore::new());
//! store.insert(1, BlobId::from_static(b"public")).unwrap();
//! let secret = store.insert(2, BlobId::from_static(b"secret")).unwrap();
//! store.set_item_private_visibility(secret, SpaceId::new("alice"));
//! store.seal().unwrap();
//!
//! let anonymous = store.with_filter(std::iter::empty());
//! assert_eq!(anonymous.collect_range(0, 2).unwrap().len(), 1);
//!
//! let alice = store.with_filter([SpaceId::new("alice")]);
//! assert_eq!(alice.collect_range(0, 2).unwrap().len(), 2);
//! ```

pub mod error;
pub mod spaces;
pub mod visibility;

pub use error::{PermsError, Result};
pub use spaces::{Capability, CapabilityIndex, Role, SpaceAuthority};
pub use visibility::{AuthorizedStore, VisibilityKey};
