//! Store traits: range set stores and the content index interfaces.
//!
//! [`RangeSetStore`] is the synchronous, in-memory view reconciliation
//! runs over. The async traits describe the persistent content index the
//! sync service reads items from and writes fetched blobs to.

use async_trait::async_trait;
use bytes::Bytes;

use hypersync_core::{
    Accumulator, BlobId, Bound, DiscoveryKey, Fingerprint, Item, Iri, SpaceId, Version,
};

use crate::error::{Result, StoreError};

/// Ordered collection of items that can be frozen for reconciliation.
///
/// Before [`seal`](Self::seal) only [`insert`](Self::insert) is allowed.
/// After it, the store is immutable and ranges are addressed by position
/// in ascending item order. A sealed store is safe to share between
/// concurrent sessions.
pub trait RangeSetStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Building
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an item. Returns its insertion index.
    fn insert(&mut self, timestamp: u64, id: BlobId) -> Result<usize>;

    /// Sort the items and freeze the store.
    fn seal(&mut self) -> Result<()>;

    /// Whether [`seal`](Self::seal) has completed.
    fn is_sealed(&self) -> bool;

    /// Sorted position of the item that was inserted at `insertion_index`.
    ///
    /// Only meaningful once sealed. Duplicate inserts map to the same
    /// position.
    fn sealed_position(&self, insertion_index: usize) -> Option<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reading (sealed only)
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of items.
    fn size(&self) -> Result<usize>;

    /// Item at a sorted position.
    fn get_item(&self, index: usize) -> Result<&Item>;

    /// First position in `begin..end` whose item is not below `bound`,
    /// or `end` if there is none.
    fn find_lower_bound(&self, begin: usize, end: usize, bound: &Bound) -> Result<usize>;

    /// Visit items at positions `begin..end` in ascending order until the
    /// callback returns `false`.
    fn for_each(
        &self,
        begin: usize,
        end: usize,
        f: &mut dyn FnMut(usize, &Item) -> bool,
    ) -> Result<()>;

    /// Fingerprint of the items visible in `begin..end`.
    fn fingerprint(&self, begin: usize, end: usize) -> Result<Fingerprint> {
        let mut acc = Accumulator::new();
        self.for_each(begin, end, &mut |_, item| {
            acc.add(item);
            true
        })?;
        Ok(acc.fingerprint())
    }

    /// Collect the items visible in `begin..end`.
    fn collect_range(&self, begin: usize, end: usize) -> Result<Vec<Item>> {
        let mut out = Vec::new();
        self.for_each(begin, end, &mut |_, item| {
            out.push(item.clone());
            true
        })?;
        Ok(out)
    }
}

/// A content blob together with the structural metadata the sync engine
/// needs. Decoding documents into this shape happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Content id.
    pub id: BlobId,
    /// Resource the blob belongs to.
    pub resource: Iri,
    /// Logical timestamp used as the reconciliation sort key.
    pub timestamp: u64,
    /// Spaces the blob is restricted to. Empty means public.
    pub private_to: Vec<SpaceId>,
    /// Raw bytes.
    pub data: Bytes,
}

impl Blob {
    /// A public blob whose id is the digest of its data.
    pub fn new(resource: Iri, timestamp: u64, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            id: BlobId::digest(&data),
            resource,
            timestamp,
            private_to: Vec::new(),
            data,
        }
    }

    /// Restrict the blob to a space. May be called several times.
    pub fn private_to(mut self, space: impl Into<SpaceId>) -> Self {
        self.private_to.push(space.into());
        self
    }

    /// Reject blobs whose id could not travel in a reconciliation message.
    pub fn validate(&self) -> Result<()> {
        if !self.id.is_valid() {
            return Err(StoreError::InvalidItem(format!(
                "blob id of {} bytes, must be 1 to {}",
                self.id.len(),
                BlobId::MAX_LEN
            )));
        }
        Ok(())
    }

    /// The reconciliation item for this blob.
    pub fn item(&self) -> Item {
        Item {
            timestamp: self.timestamp,
            id: self.id.clone(),
        }
    }
}

/// An item selected for a reconciliation scope, with its visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedItem {
    /// The item.
    pub item: Item,
    /// Spaces the item is restricted to. Empty means public.
    pub private_to: Vec<SpaceId>,
}

impl From<&Blob> for ScopedItem {
    fn from(blob: &Blob) -> Self {
        Self {
            item: blob.item(),
            private_to: blob.private_to.clone(),
        }
    }
}

/// A durable subscription record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Subscribed resource.
    pub iri: Iri,
    /// Whether child resources are included.
    pub recursive: bool,
    /// When the subscription was created (Unix ms).
    pub since: i64,
}

impl Subscription {
    /// The discovery key this subscription drives.
    pub fn key(&self) -> DiscoveryKey {
        DiscoveryKey::latest(self.iri.clone(), self.recursive)
    }
}

/// Persistent content index.
#[async_trait]
pub trait BlobIndex: Send + Sync {
    /// Store one blob. Storing an existing blob is a no-op.
    async fn put(&self, blob: Blob) -> Result<()>;

    /// Store many blobs. Returns how many were new.
    async fn put_many(&self, blobs: Vec<Blob>) -> Result<usize>;

    /// Check whether a blob is present.
    async fn has_blob(&self, id: &BlobId) -> Result<bool>;

    /// Fetch a blob.
    async fn get_blob(&self, id: &BlobId) -> Result<Option<Blob>>;

    /// Current version of a resource: the id of its newest blob.
    async fn resource_version(&self, iri: &Iri) -> Result<Option<Version>>;

    /// Whether the given version of a resource is present locally.
    async fn has_version(&self, iri: &Iri, version: &Version) -> Result<bool> {
        let Ok(id) = BlobId::from_hex(version.as_str()) else {
            return Ok(false);
        };
        Ok(self
            .get_blob(&id)
            .await?
            .is_some_and(|blob| &blob.resource == iri))
    }
}

/// Selects the items that belong to a set of discovery scopes.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Items of every blob whose resource falls inside one of `scope`.
    async fn load_items_for_scope(&self, scope: &[DiscoveryKey]) -> Result<Vec<ScopedItem>>;
}

/// Durable subscription records.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Create or update a subscription.
    async fn subscribe(&self, iri: &Iri, recursive: bool) -> Result<()>;

    /// Delete a subscription. Deleting a missing one is a no-op.
    async fn unsubscribe(&self, iri: &Iri) -> Result<()>;

    /// All subscriptions ordered by resource.
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;
}

/// Unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
