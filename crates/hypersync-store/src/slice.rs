//! Vector-backed [`RangeSetStore`].

use hypersync_core::{BlobId, Bound, Item, MAX_TIMESTAMP};

use crate::error::{Result, StoreError};
use crate::traits::RangeSetStore;

/// The default range set store: a vector sorted on seal.
///
/// Inserting the same item twice is allowed; seal collapses duplicates
/// into one position and both insertion indexes map to it.
#[derive(Debug, Clone, Default)]
pub struct SliceStore {
    items: Vec<Item>,
    /// insertion index -> sorted position, filled on seal.
    positions: Vec<usize>,
    sealed: bool,
}

impl SliceStore {
    /// Create an empty, unsealed store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with room for `n` items.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            items: Vec::with_capacity(n),
            positions: Vec::new(),
            sealed: false,
        }
    }

    /// Build and seal a store from items in any order.
    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Result<Self> {
        let mut store = Self::new();
        for item in items {
            store.insert(item.timestamp, item.id)?;
        }
        store.seal()?;
        Ok(store)
    }

    /// All items in sorted order. Empty until sealed.
    pub fn items(&self) -> &[Item] {
        if self.sealed {
            &self.items
        } else {
            &[]
        }
    }

    fn check_range(&self, begin: usize, end: usize) -> Result<()> {
        if !self.sealed {
            return Err(StoreError::NotSealed);
        }
        if begin > end || end > self.items.len() {
            return Err(StoreError::OutOfBounds {
                begin,
                end,
                size: self.items.len(),
            });
        }
        Ok(())
    }
}

impl RangeSetStore for SliceStore {
    fn insert(&mut self, timestamp: u64, id: BlobId) -> Result<usize> {
        if self.sealed {
            return Err(StoreError::Sealed);
        }
        if timestamp > MAX_TIMESTAMP {
            return Err(StoreError::InvalidItem(format!(
                "timestamp {} is reserved",
                timestamp
            )));
        }
        if !id.is_valid() {
            return Err(StoreError::InvalidItem(format!(
                "id of {} bytes, must be 1 to {}",
                id.len(),
                BlobId::MAX_LEN
            )));
        }
        self.items.push(Item { timestamp, id });
        Ok(self.items.len() - 1)
    }

    fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Err(StoreError::Sealed);
        }

        let mut order: Vec<usize> = (0..self.items.len()).collect();
        order.sort_by(|&a, &b| self.items[a].cmp(&self.items[b]));

        let mut positions = vec![0usize; self.items.len()];
        let mut sorted: Vec<Item> = Vec::with_capacity(self.items.len());
        for idx in order {
            let item = &self.items[idx];
            if sorted.last() != Some(item) {
                sorted.push(item.clone());
            }
            positions[idx] = sorted.len() - 1;
        }

        self.items = sorted;
        self.positions = positions;
        self.sealed = true;
        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn sealed_position(&self, insertion_index: usize) -> Option<usize> {
        if !self.sealed {
            return None;
        }
        self.positions.get(insertion_index).copied()
    }

    fn size(&self) -> Result<usize> {
        if !self.sealed {
            return Err(StoreError::NotSealed);
        }
        Ok(self.items.len())
    }

    fn get_item(&self, index: usize) -> Result<&Item> {
        self.check_range(index, index)?;
        self.items.get(index).ok_or(StoreError::OutOfBounds {
            begin: index,
            end: index + 1,
            size: self.items.len(),
        })
    }

    fn find_lower_bound(&self, begin: usize, end: usize, bound: &Bound) -> Result<usize> {
        self.check_range(begin, end)?;
        let offset = self.items[begin..end].partition_point(|item| bound.is_above(item));
        Ok(begin + offset)
    }

    fn for_each(
        &self,
        begin: usize,
        end: usize,
        f: &mut dyn FnMut(usize, &Item) -> bool,
    ) -> Result<()> {
        self.check_range(begin, end)?;
        for (i, item) in self.items[begin..end].iter().enumerate() {
            if !f(begin + i, item) {
                break;
            }
        }
        Ok(())
    }
}
