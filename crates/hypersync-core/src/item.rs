//! Items and range bounds.
//!
//! An [`Item`] is the unit of reconciliation: a timestamp plus an opaque
//! id. Items sort by timestamp first and id second. A [`Bound`] is an
//! exclusive upper limit over that order, carrying only as many id bytes
//! as needed to separate two neighbouring items.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::BlobId;

/// Largest timestamp an item may carry. `u64::MAX` is reserved.
pub const MAX_TIMESTAMP: u64 = u64::MAX - 1;

/// A reconcilable element: `(timestamp, id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Item {
    /// Logical timestamp; the primary sort key.
    pub timestamp: u64,
    /// Content id; the tie breaker.
    pub id: BlobId,
}

impl Item {
    /// Create a new item.
    pub fn new(timestamp: u64, id: impl Into<BlobId>) -> Self {
        Self {
            timestamp,
            id: id.into(),
        }
    }
}

/// Exclusive upper bound of a range of items.
///
/// `Bound::Item { timestamp, id_prefix }` admits every item strictly below
/// `(timestamp, id_prefix)` in item order, comparing ids bytewise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bound {
    /// A finite bound.
    Item {
        /// Timestamp component.
        timestamp: u64,
        /// Shortest id prefix needed to separate neighbours.
        id_prefix: Bytes,
    },
    /// Above every item.
    Infinity,
}

impl Bound {
    /// The lowest possible bound; no item lies below it.
    pub const MIN: Bound = Bound::Item {
        timestamp: 0,
        id_prefix: Bytes::new(),
    };

    /// A bound at exactly the given item, with the full id.
    pub fn at(item: &Item) -> Self {
        Bound::Item {
            timestamp: item.timestamp,
            id_prefix: item.id.bytes().clone(),
        }
    }

    /// The shortest bound `b` with `prev < b <= next`.
    ///
    /// `prev` must sort strictly before `next`.
    pub fn between(prev: &Item, next: &Item) -> Self {
        debug_assert!(prev < next, "bound between unordered items");
        if prev.timestamp != next.timestamp {
            return Bound::Item {
                timestamp: next.timestamp,
                id_prefix: Bytes::new(),
            };
        }
        let a = prev.id.as_bytes();
        let b = next.id.as_bytes();
        let shared = a.iter().zip(b).take_while(|(x, y)| x == y).count();
        Bound::Item {
            timestamp: next.timestamp,
            id_prefix: next.id.bytes().slice(..(shared + 1).min(b.len())),
        }
    }

    /// Whether this bound is [`Bound::Infinity`].
    pub fn is_infinity(&self) -> bool {
        matches!(self, Bound::Infinity)
    }

    /// Order an item against this bound.
    ///
    /// Returns `Less` when the item lies below the bound (inside the range
    /// it closes).
    pub fn cmp_item(&self, item: &Item) -> Ordering {
        match self {
            Bound::Infinity => Ordering::Less,
            Bound::Item {
                timestamp,
                id_prefix,
            } => item
                .timestamp
                .cmp(timestamp)
                .then_with(|| item.id.as_bytes().cmp(id_prefix.as_ref())),
        }
    }

    /// Whether `item` lies strictly below this bound.
    pub fn is_above(&self, item: &Item) -> bool {
        self.cmp_item(item) == Ordering::Less
    }
}
