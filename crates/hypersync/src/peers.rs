//! Peer directory.
//!
//! Where the sync service learns which peers exist, which are connected
//! right now, and who provides a resource. The real implementation sits on
//! top of the network host and the provider records of the DHT.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use hypersync_core::{Iri, PeerId};

use crate::error::Result;

/// Source of peers to sync with.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Every peer this node knows about.
    async fn known_peers(&self) -> Result<Vec<PeerId>>;

    /// Peers with a live connection.
    async fn connected_peers(&self) -> Result<Vec<PeerId>>;

    /// Peers announcing `iri`. A `limit` of zero means no limit.
    async fn find_providers(&self, iri: &Iri, limit: usize) -> Result<Vec<PeerId>>;
}

/// In-memory [`PeerDirectory`] with explicitly registered peers.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    inner: RwLock<StaticDirectoryInner>,
}

#[derive(Debug, Default)]
struct StaticDirectoryInner {
    known: BTreeSet<PeerId>,
    connected: BTreeSet<PeerId>,
    providers: HashMap<Iri, Vec<PeerId>>,
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer, optionally as connected.
    pub fn add_peer(&self, peer: PeerId, connected: bool) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if connected {
            inner.connected.insert(peer.clone());
        } else {
            inner.connected.remove(&peer);
        }
        inner.known.insert(peer);
    }

    /// Mark a known peer as connected or not.
    pub fn set_connected(&self, peer: &PeerId, connected: bool) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.known.contains(peer) {
            return;
        }
        if connected {
            inner.connected.insert(peer.clone());
        } else {
            inner.connected.remove(peer);
        }
    }

    /// Record that `peer` provides `iri`.
    pub fn add_provider(&self, iri: Iri, peer: PeerId) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let providers = inner.providers.entry(iri).or_default();
        if !providers.contains(&peer) {
            providers.push(peer);
        }
    }
}

#[async_trait]
impl PeerDirectory for StaticDirectory {
    async fn known_peers(&self) -> Result<Vec<PeerId>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.known.iter().cloned().collect())
    }

    async fn connected_peers(&self) -> Result<Vec<PeerId>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.connected.iter().cloned().collect())
    }

    async fn find_providers(&self, iri: &Iri, limit: usize) -> Result<Vec<PeerId>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut found = inner.providers.get(iri).cloned().unwrap_or_default();
        if limit > 0 {
            found.truncate(limit);
        }
        Ok(found)
    }
}
