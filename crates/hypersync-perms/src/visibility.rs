//! Visibility-filtered range set stores.
//!
//! An [`AuthorizedStore`] wraps a base [`RangeSetStore`] and hides items
//! that are private to spaces the current reader is not authorized for.
//! Reconciliation code only sees the filtered `for_each`, so it needs no
//! knowledge of authorization.
//!
//! Views produced by [`AuthorizedStore::with_filter`] share the sealed base
//! store through an `Arc` and own an independent copy of the visibility
//! records, so views for different peers never affect each other.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use hypersync_core::{BlobId, Bound, Item, SpaceId};
use hypersync_store::{RangeSetStore, Result, ScopedItem, SliceStore, StoreError};

/// Records that the item at `index` is visible to holders of `space`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VisibilityKey {
    /// Item position. Insertion index before seal, sorted position after.
    pub index: usize,
    /// Space granting visibility.
    pub space: SpaceId,
}

/// A range set store with per-item private visibility.
///
/// An item with no visibility records is public. An item with records is
/// visible only when at least one of its spaces is in the authorized set.
/// An empty authorized set sees public items only.
#[derive(Debug)]
pub struct AuthorizedStore<S = SliceStore> {
    base: Arc<S>,
    visibility: BTreeSet<VisibilityKey>,
    authorized: HashSet<SpaceId>,
}

impl<S: RangeSetStore> AuthorizedStore<S> {
    /// Wrap a store. Every item starts out public.
    pub fn new(base: S) -> Self {
        Self {
            base: Arc::new(base),
            visibility: BTreeSet::new(),
            authorized: HashSet::new(),
        }
    }

    /// Mark the item at `index` as visible to `space`.
    ///
    /// Additive: calling it again with another space widens visibility.
    /// Before seal `index` is the value returned by `insert`.
    ///
    /// # Panics
    ///
    /// Panics if `space` is empty. Such a record would hide the item from
    /// everyone, which is indistinguishable from a missing record.
    pub fn set_item_private_visibility(&mut self, index: usize, space: SpaceId) {
        assert!(
            !space.as_str().is_empty(),
            "BUG: private visibility requires a space"
        );
        self.visibility.insert(VisibilityKey { index, space });
    }

    /// Insert an item restricted to `spaces` (public when empty).
    pub fn insert_scoped(&mut self, scoped: ScopedItem) -> Result<usize> {
        let index = self.insert(scoped.item.timestamp, scoped.item.id)?;
        for space in scoped.private_to {
            self.set_item_private_visibility(index, space);
        }
        Ok(index)
    }

    /// A view of the same items for a different set of authorized spaces.
    ///
    /// The base store is shared; the visibility records are copied.
    pub fn with_filter<I>(&self, spaces: I) -> Self
    where
        I: IntoIterator<Item = SpaceId>,
    {
        Self {
            base: Arc::clone(&self.base),
            visibility: self.visibility.clone(),
            authorized: spaces.into_iter().collect(),
        }
    }

    /// Whether the item at sorted position `index` passes the filter.
    pub fn is_visible(&self, index: usize) -> bool {
        let mut records = self.records(index).peekable();
        if records.peek().is_none() {
            return true;
        }
        records.any(|key| self.authorized.contains(&key.space))
    }

    /// Spaces the item at `index` is restricted to.
    pub fn private_spaces(&self, index: usize) -> Vec<SpaceId> {
        self.records(index).map(|key| key.space.clone()).collect()
    }

    /// The authorized space set of this view.
    pub fn authorized_spaces(&self) -> &HashSet<SpaceId> {
        &self.authorized
    }

    /// The shared base store.
    pub fn base(&self) -> &S {
        &self.base
    }

    /// Number of visibility records.
    pub fn visibility_len(&self) -> usize {
        self.visibility.len()
    }

    fn records(&self, index: usize) -> impl Iterator<Item = &VisibilityKey> {
        let start = VisibilityKey {
            index,
            space: SpaceId::new(""),
        };
        self.visibility
            .range(start..)
            .take_while(move |key| key.index == index)
    }

    fn base_mut(&mut self) -> Result<&mut S> {
        Arc::get_mut(&mut self.base).ok_or(StoreError::Shared)
    }
}

impl AuthorizedStore<SliceStore> {
    /// Build and seal a store from scoped items.
    pub fn from_scoped(items: impl IntoIterator<Item = ScopedItem>) -> Result<Self> {
        let mut store = Self::new(SliceStore::new());
        for scoped in items {
            store.insert_scoped(scoped)?;
        }
        store.seal()?;
        Ok(store)
    }
}

impl<S: RangeSetStore> RangeSetStore for AuthorizedStore<S> {
    fn insert(&mut self, timestamp: u64, id: BlobId) -> Result<usize> {
        self.base_mut()?.insert(timestamp, id)
    }

    fn seal(&mut self) -> Result<()> {
        self.base_mut()?.seal()?;
        // Visibility was recorded against insertion indexes.
        let base = Arc::clone(&self.base);
        self.visibility = std::mem::take(&mut self.visibility)
            .into_iter()
            .filter_map(|key| {
                base.sealed_position(key.index).map(|index| VisibilityKey {
                    index,
                    space: key.space,
                })
            })
            .collect();
        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.base.is_sealed()
    }

    fn sealed_position(&self, insertion_index: usize) -> Option<usize> {
        self.base.sealed_position(insertion_index)
    }

    fn size(&self) -> Result<usize> {
        self.base.size()
    }

    fn get_item(&self, index: usize) -> Result<&Item> {
        self.base.get_item(index)
    }

    fn find_lower_bound(&self, begin: usize, end: usize, bound: &Bound) -> Result<usize> {
        self.base.find_lower_bound(begin, end, bound)
    }

    fn for_each(
        &self,
        begin: usize,
        end: usize,
        f: &mut dyn FnMut(usize, &Item) -> bool,
    ) -> Result<()> {
        self.base.for_each(begin, end, &mut |i, item| {
            if self.is_visible(i) {
                f(i, item)
            } else {
                true
            }
        })
    }
}
