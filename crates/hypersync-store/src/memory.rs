//! In-memory implementation of the content index traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use hypersync_core::{BlobId, DiscoveryKey, Iri, Version};

use crate::error::{Result, StoreError};
use crate::traits::{
    now_millis, Blob, BlobIndex, ItemSource, ScopedItem, Subscription, SubscriptionStore,
};

/// In-memory content index.
///
/// All data is lost when the index is dropped. Thread-safe via RwLock.
pub struct MemoryIndex {
    inner: RwLock<MemoryIndexInner>,
}

#[derive(Default)]
struct MemoryIndexInner {
    /// Blobs indexed by id.
    blobs: BTreeMap<BlobId, Blob>,

    /// Subscriptions indexed by resource.
    subscriptions: BTreeMap<Iri, Subscription>,
}

impl MemoryIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryIndexInner::default()),
        }
    }

    /// Create an index pre-populated with blobs.
    pub fn with_blobs(blobs: impl IntoIterator<Item = Blob>) -> Self {
        let index = Self::new();
        if let Ok(mut inner) = index.inner.write() {
            for blob in blobs {
                inner.blobs.insert(blob.id.clone(), blob);
            }
        }
        index
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.read().map(|inner| inner.blobs.len()).unwrap_or_default()
    }

    /// Ids of every stored blob, in id order.
    pub fn blob_ids(&self) -> Vec<BlobId> {
        self.read()
            .map(|inner| inner.blobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryIndexInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryIndexInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobIndex for MemoryIndex {
    async fn put(&self, blob: Blob) -> Result<()> {
        blob.validate()?;
        self.write()?.blobs.entry(blob.id.clone()).or_insert(blob);
        Ok(())
    }

    async fn put_many(&self, blobs: Vec<Blob>) -> Result<usize> {
        blobs.iter().try_for_each(Blob::validate)?;
        let mut inner = self.write()?;
        let mut inserted = 0;
        for blob in blobs {
            if !inner.blobs.contains_key(&blob.id) {
                inner.blobs.insert(blob.id.clone(), blob);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn has_blob(&self, id: &BlobId) -> Result<bool> {
        Ok(self.read()?.blobs.contains_key(id))
    }

    async fn get_blob(&self, id: &BlobId) -> Result<Option<Blob>> {
        Ok(self.read()?.blobs.get(id).cloned())
    }

    async fn resource_version(&self, iri: &Iri) -> Result<Option<Version>> {
        let inner = self.read()?;
        let newest = inner
            .blobs
            .values()
            .filter(|b| &b.resource == iri)
            .max_by(|a, b| a.item().cmp(&b.item()));
        Ok(newest.map(|b| Version::new(b.id.to_hex())))
    }
}

#[async_trait]
impl ItemSource for MemoryIndex {
    async fn load_items_for_scope(&self, scope: &[DiscoveryKey]) -> Result<Vec<ScopedItem>> {
        let inner = self.read()?;
        Ok(inner
            .blobs
            .values()
            .filter(|b| scope.iter().any(|key| key.covers(&b.resource)))
            .map(ScopedItem::from)
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryIndex {
    async fn subscribe(&self, iri: &Iri, recursive: bool) -> Result<()> {
        let mut inner = self.write()?;
        let since = inner
            .subscriptions
            .get(iri)
            .map(|s| s.since)
            .unwrap_or_else(now_millis);
        inner.subscriptions.insert(
            iri.clone(),
            Subscription {
                iri: iri.clone(),
                recursive,
                since,
            },
        );
        Ok(())
    }

    async fn unsubscribe(&self, iri: &Iri) -> Result<()> {
        self.write()?.subscriptions.remove(iri);
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.read()?.subscriptions.values().cloned().collect())
    }
}
