//! Transport abstraction for reconciliation and blob fetching.
//!
//! The real network stack lives outside this crate. The traits here are
//! what the sync engine needs from it: a unary reconcile call per round
//! trip, best-effort authentication, blob announcements, and a streaming
//! block fetch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use hypersync_core::{AccountId, BlobId, PeerId};
use hypersync_store::Blob;

use crate::error::Result;

/// Resource filter attached to a reconcile request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Resource IRI, as sent by the caller. The server normalises it.
    pub resource: String,
    /// Whether children of the resource are included.
    pub recursive: bool,
}

/// One round trip of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    /// Encoded [`RangeMessage`](crate::RangeMessage).
    pub ranges: Vec<u8>,
    /// Resources the caller is interested in.
    pub filters: Vec<Filter>,
}

/// Most ids one announcement may carry.
pub const MAX_BLOBS_PER_ANNOUNCE: usize = 200_000;

/// How an announcement went on the receiving side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceProgress {
    /// Ids in the announcement.
    pub blobs_announced: usize,
    /// Announced blobs the receiver already had.
    pub blobs_known: usize,
    /// Announced blobs the receiver went on to fetch.
    pub blobs_wanted: usize,
    /// Wanted blobs that arrived.
    pub blobs_processed: usize,
    /// Wanted blobs that never arrived.
    pub blobs_failed: usize,
}

/// Server reply to a [`ReconcileRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResponse {
    /// Next encoded message, or `None` once the server considers the
    /// ranges reconciled.
    pub ranges: Option<Vec<u8>>,
}

/// Client side of the sync RPC.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Prove control of `accounts` to `peer`.
    async fn authenticate(&self, peer: &PeerId, accounts: &[AccountId]) -> Result<()>;

    /// Send one reconciliation round to `peer`.
    async fn reconcile_blobs(
        &self,
        peer: &PeerId,
        request: ReconcileRequest,
    ) -> Result<ReconcileResponse>;

    /// Offer `ids` to `peer`, which downloads the ones it lacks from us.
    async fn announce_blobs(&self, peer: &PeerId, ids: Vec<BlobId>) -> Result<AnnounceProgress>;
}

/// Streaming blob fetch.
#[async_trait]
pub trait BlockExchange: Send + Sync {
    /// Ask `peer` for `ids`. Blobs arrive on the returned channel in any
    /// order; the channel closes when the peer is done. Ids the peer does
    /// not have are simply never delivered.
    async fn get_blocks(&self, peer: &PeerId, ids: Vec<BlobId>) -> Result<mpsc::Receiver<Blob>>;
}

/// Server side of the sync RPC.
///
/// `caller` is the authenticated transport identity of the remote peer.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Handle an authentication request.
    async fn handle_authenticate(&self, caller: &PeerId, accounts: &[AccountId]) -> Result<()>;

    /// Handle one reconciliation round.
    async fn handle_reconcile(
        &self,
        caller: &PeerId,
        request: ReconcileRequest,
    ) -> Result<ReconcileResponse>;

    /// Fetch the announced blobs we lack from `caller`.
    async fn handle_announce_blobs(
        &self,
        caller: &PeerId,
        ids: Vec<BlobId>,
    ) -> Result<AnnounceProgress>;

    /// Blobs to serve for a block request. Ids we do not hold, and blobs
    /// `caller` may not read, are left out.
    async fn handle_get_blocks(&self, caller: &PeerId, ids: Vec<BlobId>) -> Result<Vec<Blob>>;
}

/// An in-process network for testing.
///
/// Every registered peer exposes a [`SyncHandler`], which also serves its
/// blocks. Calls are routed directly, tagging each with the caller's id.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::{Mutex, RwLock};

    use crate::error::SyncError;

    /// Buffer of a block stream.
    const BLOCK_CHANNEL_CAPACITY: usize = 16;

    /// Shared routing table of the in-memory network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        nodes: RwLock<HashMap<PeerId, Arc<dyn SyncHandler>>>,
        stalled: RwLock<HashSet<PeerId>>,
        /// Senders of stalled streams, kept so the streams never close.
        parked: Mutex<Vec<mpsc::Sender<Blob>>>,
    }

    impl MemoryNetwork {
        /// Create an empty network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a peer.
        pub async fn register(&self, peer: PeerId, handler: Arc<dyn SyncHandler>) {
            self.nodes.write().await.insert(peer, handler);
        }

        /// Detach a peer. Later calls to it fail with `PeerNotConnected`.
        pub async fn disconnect(&self, peer: &PeerId) {
            self.nodes.write().await.remove(peer);
        }

        /// Make block streams from `peer` hang without delivering anything.
        pub async fn set_stalled(&self, peer: &PeerId, stalled: bool) {
            let mut set = self.stalled.write().await;
            if stalled {
                set.insert(peer.clone());
            } else {
                set.remove(peer);
            }
        }

        /// Registered peers.
        pub async fn peers(&self) -> Vec<PeerId> {
            let mut peers: Vec<PeerId> = self.nodes.read().await.keys().cloned().collect();
            peers.sort();
            peers
        }

        /// A client that calls other peers as `local`.
        pub fn client(self: &Arc<Self>, local: PeerId) -> MemoryClient {
            MemoryClient {
                local,
                network: Arc::clone(self),
            }
        }

        async fn handler(&self, peer: &PeerId) -> Result<Arc<dyn SyncHandler>> {
            self.nodes
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or_else(|| SyncError::PeerNotConnected(peer.to_string()))
        }
    }

    /// Client handle bound to one local peer id.
    #[derive(Clone)]
    pub struct MemoryClient {
        local: PeerId,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryClient {
        /// The id this client calls as.
        pub fn local_peer(&self) -> &PeerId {
            &self.local
        }
    }

    #[async_trait]
    impl SyncClient for MemoryClient {
        async fn authenticate(&self, peer: &PeerId, accounts: &[AccountId]) -> Result<()> {
            let handler = self.network.handler(peer).await?;
            handler.handle_authenticate(&self.local, accounts).await
        }

        async fn reconcile_blobs(
            &self,
            peer: &PeerId,
            request: ReconcileRequest,
        ) -> Result<ReconcileResponse> {
            let handler = self.network.handler(peer).await?;
            handler.handle_reconcile(&self.local, request).await
        }

        async fn announce_blobs(
            &self,
            peer: &PeerId,
            ids: Vec<BlobId>,
        ) -> Result<AnnounceProgress> {
            let handler = self.network.handler(peer).await?;
            handler.handle_announce_blobs(&self.local, ids).await
        }
    }

    #[async_trait]
    impl BlockExchange for MemoryClient {
        async fn get_blocks(
            &self,
            peer: &PeerId,
            ids: Vec<BlobId>,
        ) -> Result<mpsc::Receiver<Blob>> {
            let handler = self.network.handler(peer).await?;
            let (tx, rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);

            if self.network.stalled.read().await.contains(peer) {
                self.network.parked.lock().await.push(tx);
                return Ok(rx);
            }

            let local = self.local.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                let blobs = match handler.handle_get_blocks(&local, ids).await {
                    Ok(blobs) => blobs,
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "block request failed");
                        return;
                    }
                };
                for blob in blobs {
                    if tx.send(blob).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }
}
