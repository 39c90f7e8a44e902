//! Responder side of the sync RPC.
//!
//! Every reconcile request is answered from a fresh store built for the
//! caller: the items in the requested scope, filtered down to what the
//! caller's authorized spaces allow. Block requests go through the same
//! check, so a peer that learns a private id still cannot download it.
//! Announcements are pulled from the announcing peer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use hypersync_core::{AccountId, BlobId, DiscoveryKey, Iri, PeerId, SpaceId};
use hypersync_perms::{AuthorizedStore, SpaceAuthority};
use hypersync_store::{Blob, BlobIndex, ItemSource};
use hypersync_sync::{
    AnnounceProgress, BlockExchange, Filter, ReconcileRequest, ReconcileResponse,
    ReconciliationSession, SyncError, SyncHandler, MAX_BLOBS_PER_ANNOUNCE,
};

use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// Blobs a peer may fetch regardless of visibility while we push them to it.
///
/// Entries are counted, so overlapping pushes of the same blob to the same
/// peer each keep it readable until they finish.
#[derive(Debug, Default)]
pub struct PushAllowlist {
    inner: Mutex<HashMap<PeerId, HashMap<BlobId, usize>>>,
}

impl PushAllowlist {
    /// Create an empty allowlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `peer` fetch `ids`.
    pub async fn allow(&self, peer: &PeerId, ids: &[BlobId]) {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry(peer.clone()).or_default();
        for id in ids {
            *entry.entry(id.clone()).or_default() += 1;
        }
    }

    /// Undo one [`allow`](Self::allow) of the same ids.
    pub async fn release(&self, peer: &PeerId, ids: &[BlobId]) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.get_mut(peer) else {
            return;
        };
        for id in ids {
            if let Some(count) = entry.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    entry.remove(id);
                }
            }
        }
        if entry.is_empty() {
            inner.remove(peer);
        }
    }

    /// Whether `peer` may currently fetch `id`.
    pub async fn contains(&self, peer: &PeerId, id: &BlobId) -> bool {
        self.inner
            .lock()
            .await
            .get(peer)
            .is_some_and(|ids| ids.contains_key(id))
    }
}

/// Answers remote peers: authentication, reconciliation, announcements,
/// and block requests.
pub struct SyncServer {
    index: Arc<dyn BlobIndex>,
    items: Arc<dyn ItemSource>,
    authority: Arc<dyn SpaceAuthority>,
    blocks: Arc<dyn BlockExchange>,
    allowlist: Arc<PushAllowlist>,
    cfg: SyncConfig,
}

impl SyncServer {
    /// Create a server over a content index and an authorization source.
    ///
    /// `blocks` is used to pull announced blobs from the announcing peer.
    pub fn new(
        index: Arc<dyn BlobIndex>,
        items: Arc<dyn ItemSource>,
        authority: Arc<dyn SpaceAuthority>,
        blocks: Arc<dyn BlockExchange>,
        cfg: SyncConfig,
    ) -> Self {
        Self {
            index,
            items,
            authority,
            blocks,
            allowlist: Arc::new(PushAllowlist::new()),
            cfg,
        }
    }

    /// Share the allowlist of the node's outgoing pushes.
    pub fn with_allowlist(mut self, allowlist: Arc<PushAllowlist>) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Build the filtered store `caller` reconciles against.
    pub async fn load_store(&self, caller: &PeerId, filters: &[Filter]) -> Result<AuthorizedStore> {
        let mut keys = Vec::with_capacity(filters.len());
        let mut requested = Vec::with_capacity(filters.len());
        for filter in filters {
            let iri = Iri::parse(filter.resource.trim_end_matches('/'))?;
            keys.push(DiscoveryKey::latest(iri.clone(), filter.recursive));
            requested.push(iri);
        }
        keys.sort();
        keys.dedup();

        let spaces = self
            .authority
            .authorized_spaces_for_peer(caller, &requested)
            .await?;
        let items = self.items.load_items_for_scope(&keys).await?;
        let store = AuthorizedStore::from_scoped(items)?;

        tracing::debug!(
            peer = %caller,
            scopes = keys.len(),
            spaces = spaces.len(),
            "loaded reconciliation store"
        );
        Ok(store.with_filter(spaces))
    }

    /// The blobs among `ids` that we hold and `caller` may read.
    pub async fn readable_blobs(&self, caller: &PeerId, ids: &[BlobId]) -> Result<Vec<Blob>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(blob) = self.index.get_blob(id).await? {
                found.push(blob);
            }
        }
        if found.iter().all(|blob| blob.private_to.is_empty()) {
            return Ok(found);
        }

        let mut requested: Vec<Iri> = found
            .iter()
            .filter(|blob| !blob.private_to.is_empty())
            .map(|blob| blob.resource.clone())
            .collect();
        requested.sort();
        requested.dedup();
        let spaces: HashSet<SpaceId> = self
            .authority
            .authorized_spaces_for_peer(caller, &requested)
            .await?
            .into_iter()
            .collect();

        let mut readable = Vec::with_capacity(found.len());
        let mut withheld = 0;
        for blob in found {
            let visible = blob.private_to.is_empty()
                || blob.private_to.iter().any(|space| spaces.contains(space))
                || self.allowlist.contains(caller, &blob.id).await;
            if visible {
                readable.push(blob);
            } else {
                withheld += 1;
            }
        }
        if withheld > 0 {
            tracing::debug!(peer = %caller, withheld, "withheld private blobs");
        }
        Ok(readable)
    }

    /// Download the announced blobs we lack from `caller` and store them.
    ///
    /// A stream that goes quiet for `fetch_idle_timeout` ends the download;
    /// whatever did not arrive is counted as failed.
    pub async fn fetch_announced(&self, caller: &PeerId, ids: Vec<BlobId>) -> Result<AnnounceProgress> {
        if ids.len() > MAX_BLOBS_PER_ANNOUNCE {
            return Err(SyncError::InvalidMessage(format!(
                "too many blobs announced: must be <= {}",
                MAX_BLOBS_PER_ANNOUNCE
            ))
            .into());
        }

        let mut progress = AnnounceProgress {
            blobs_announced: ids.len(),
            ..Default::default()
        };
        let mut pending = HashSet::new();
        let mut wants = Vec::new();
        for id in ids {
            if !id.is_valid() || pending.contains(&id) || self.index.has_blob(&id).await? {
                continue;
            }
            pending.insert(id.clone());
            wants.push(id);
        }
        progress.blobs_wanted = wants.len();
        progress.blobs_known = progress.blobs_announced - wants.len();
        if wants.is_empty() {
            return Ok(progress);
        }

        let mut rx = self.blocks.get_blocks(caller, wants).await?;
        let mut downloaded = Vec::new();
        while !pending.is_empty() {
            match tokio::time::timeout(self.cfg.fetch_idle_timeout, rx.recv()).await {
                Ok(Some(blob)) => {
                    if pending.remove(&blob.id) {
                        downloaded.push(blob);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(
                        peer = %caller,
                        missing = pending.len(),
                        "announced blob fetch went idle"
                    );
                    break;
                }
            }
        }

        progress.blobs_processed = downloaded.len();
        progress.blobs_failed = pending.len();
        if !downloaded.is_empty() {
            let stored = self.index.put_many(downloaded).await?;
            tracing::debug!(peer = %caller, stored, "stored announced blobs");
        }
        Ok(progress)
    }
}

fn peer_error(e: Error) -> SyncError {
    match e {
        Error::Sync(e) => e,
        e => SyncError::PeerError(e.to_string()),
    }
}

#[async_trait]
impl SyncHandler for SyncServer {
    async fn handle_authenticate(
        &self,
        caller: &PeerId,
        accounts: &[AccountId],
    ) -> hypersync_sync::Result<()> {
        self.authority
            .record_peer_auth(caller, accounts)
            .await
            .map_err(|e| SyncError::PeerError(e.to_string()))
    }

    async fn handle_reconcile(
        &self,
        caller: &PeerId,
        request: ReconcileRequest,
    ) -> hypersync_sync::Result<ReconcileResponse> {
        let store = self
            .load_store(caller, &request.filters)
            .await
            .map_err(|e| SyncError::PeerError(e.to_string()))?;
        let session = ReconciliationSession::new(&store, self.cfg.session)?;
        let ranges = session.reconcile(&request.ranges)?;
        Ok(ReconcileResponse { ranges })
    }

    async fn handle_announce_blobs(
        &self,
        caller: &PeerId,
        ids: Vec<BlobId>,
    ) -> hypersync_sync::Result<AnnounceProgress> {
        let progress = self.fetch_announced(caller, ids).await.map_err(peer_error)?;
        tracing::debug!(
            peer = %caller,
            announced = progress.blobs_announced,
            wanted = progress.blobs_wanted,
            failed = progress.blobs_failed,
            "handled blob announcement"
        );
        Ok(progress)
    }

    async fn handle_get_blocks(
        &self,
        caller: &PeerId,
        ids: Vec<BlobId>,
    ) -> hypersync_sync::Result<Vec<Blob>> {
        self.readable_blobs(caller, &ids).await.map_err(peer_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypersync_perms::{CapabilityIndex, Role};
    use hypersync_store::{MemoryIndex, RangeSetStore};
    use hypersync_sync::MemoryNetwork;

    fn iri(s: &str) -> Iri {
        Iri::parse(s).unwrap()
    }

    fn filter(resource: &str, recursive: bool) -> Filter {
        Filter {
            resource: resource.to_owned(),
            recursive,
        }
    }

    async fn node(
        network: &Arc<MemoryNetwork>,
        name: &str,
        blobs: Vec<Blob>,
    ) -> (Arc<SyncServer>, Arc<CapabilityIndex>, Arc<MemoryIndex>) {
        let peer = PeerId::new(name);
        let index = Arc::new(MemoryIndex::with_blobs(blobs));
        let authority = Arc::new(CapabilityIndex::new());
        let cfg = SyncConfig {
            fetch_idle_timeout: std::time::Duration::from_millis(200),
            ..SyncConfig::default()
        };
        let server = Arc::new(SyncServer::new(
            index.clone(),
            index.clone(),
            authority.clone(),
            Arc::new(network.client(peer.clone())),
            cfg,
        ));
        network.register(peer, server.clone()).await;
        (server, authority, index)
    }

    async fn setup() -> (Arc<SyncServer>, Arc<CapabilityIndex>) {
        let network = MemoryNetwork::new();
        let (server, authority, _) = node(
            &network,
            "server",
            vec![
                Blob::new(iri("hm://alice/doc"), 1, &b"public"[..]),
                Blob::new(iri("hm://alice/doc/child"), 2, &b"child"[..]),
                Blob::new(iri("hm://alice/doc"), 3, &b"secret"[..]).private_to("alice"),
                Blob::new(iri("hm://bob/other"), 4, &b"elsewhere"[..]),
            ],
        )
        .await;
        (server, authority)
    }

    #[tokio::test]
    async fn test_store_follows_scope() {
        let (server, _) = setup().await;
        let caller = PeerId::new("caller");

        let flat = server
            .load_store(&caller, &[filter("hm://alice/doc/", false)])
            .await
            .unwrap();
        assert_eq!(flat.collect_range(0, flat.size().unwrap()).unwrap().len(), 1);

        let deep = server
            .load_store(&caller, &[filter("hm://alice/doc", true)])
            .await
            .unwrap();
        assert_eq!(deep.collect_range(0, deep.size().unwrap()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_private_items_need_authentication() {
        let (server, _) = setup().await;
        let caller = PeerId::new("caller");

        let anon = server
            .load_store(&caller, &[filter("hm://alice/doc", false)])
            .await
            .unwrap();
        assert_eq!(anon.collect_range(0, anon.size().unwrap()).unwrap().len(), 1);

        server
            .handle_authenticate(&caller, &[AccountId::new("alice")])
            .await
            .unwrap();
        let authed = server
            .load_store(&caller, &[filter("hm://alice/doc", false)])
            .await
            .unwrap();
        assert_eq!(authed.collect_range(0, authed.size().unwrap()).unwrap().len(), 2);
        assert!(authed.authorized_spaces().contains(&SpaceId::new("alice")));
    }

    #[tokio::test]
    async fn test_no_filters_means_empty_store() {
        let (server, _) = setup().await;
        let store = server.load_store(&PeerId::new("caller"), &[]).await.unwrap();
        assert_eq!(store.size().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_resource_is_rejected() {
        let (server, _) = setup().await;
        let err = server
            .handle_reconcile(
                &PeerId::new("caller"),
                ReconcileRequest {
                    ranges: Vec::new(),
                    filters: vec![filter("not-an-iri", false)],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PeerError(_)));
    }

    #[tokio::test]
    async fn test_garbage_ranges_fail_closed() {
        let (server, _) = setup().await;
        let err = server
            .handle_reconcile(
                &PeerId::new("caller"),
                ReconcileRequest {
                    ranges: b"garbage".to_vec(),
                    filters: vec![filter("hm://alice/doc", false)],
                },
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_private_blocks_need_read_access() {
        let (server, authority) = setup().await;
        let public = Blob::new(iri("hm://alice/doc"), 1, &b"public"[..]);
        let secret = Blob::new(iri("hm://alice/doc"), 3, &b"secret"[..]).private_to("alice");
        let caller = PeerId::new("stranger");
        let ids = vec![
            public.id.clone(),
            secret.id.clone(),
            BlobId::from_static(b"missing"),
        ];

        let served = server.handle_get_blocks(&caller, ids.clone()).await.unwrap();
        assert_eq!(served, vec![public.clone()]);

        authority
            .grant(SpaceId::new("alice"), AccountId::new("bob"), Role::Writer)
            .unwrap();
        server
            .handle_authenticate(&caller, &[AccountId::new("bob")])
            .await
            .unwrap();
        let served = server.handle_get_blocks(&caller, ids).await.unwrap();
        assert_eq!(served, vec![public, secret]);
    }

    #[tokio::test]
    async fn test_block_stream_withholds_private_blobs() {
        let network = MemoryNetwork::new();
        let secret = Blob::new(iri("hm://alice/notes"), 1, &b"secret"[..]).private_to("alice");
        node(&network, "server", vec![secret.clone()]).await;

        let mut rx = network
            .client(PeerId::new("stranger"))
            .get_blocks(&PeerId::new("server"), vec![secret.id])
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_allowlisted_blob_is_served_while_pushing() {
        let (server, _) = setup().await;
        let allowlist = Arc::new(PushAllowlist::new());
        let server = SyncServer::new(
            server.index.clone(),
            server.items.clone(),
            server.authority.clone(),
            server.blocks.clone(),
            server.cfg.clone(),
        )
        .with_allowlist(allowlist.clone());
        let secret = Blob::new(iri("hm://alice/doc"), 3, &b"secret"[..]).private_to("alice");
        let caller = PeerId::new("receiver");
        let ids = vec![secret.id.clone()];

        allowlist.allow(&caller, &ids).await;
        allowlist.allow(&caller, &ids).await;
        allowlist.release(&caller, &ids).await;
        assert_eq!(server.readable_blobs(&caller, &ids).await.unwrap(), vec![secret]);

        allowlist.release(&caller, &ids).await;
        assert!(!allowlist.contains(&caller, &ids[0]).await);
        assert!(server.readable_blobs(&caller, &ids).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_announce_pulls_missing_blobs() {
        let network = MemoryNetwork::new();
        let known = Blob::new(iri("hm://alice/doc"), 1, &b"known"[..]);
        let fresh = Blob::new(iri("hm://alice/doc"), 2, &b"fresh"[..]);
        node(&network, "pusher", vec![known.clone(), fresh.clone()]).await;
        let (receiver, _, index) = node(&network, "receiver", vec![known.clone()]).await;

        let progress = receiver
            .handle_announce_blobs(&PeerId::new("pusher"), vec![known.id, fresh.id.clone()])
            .await
            .unwrap();
        assert_eq!(
            progress,
            AnnounceProgress {
                blobs_announced: 2,
                blobs_known: 1,
                blobs_wanted: 1,
                blobs_processed: 1,
                blobs_failed: 0,
            }
        );
        assert_eq!(index.get_blob(&fresh.id).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_announce_counts_blobs_that_never_arrive() {
        let network = MemoryNetwork::new();
        node(&network, "pusher", vec![]).await;
        let (receiver, _, index) = node(&network, "receiver", vec![]).await;

        let progress = receiver
            .handle_announce_blobs(&PeerId::new("pusher"), vec![BlobId::from_static(b"ghost")])
            .await
            .unwrap();
        assert_eq!(progress.blobs_wanted, 1);
        assert_eq!(progress.blobs_processed, 0);
        assert_eq!(progress.blobs_failed, 1);
        assert_eq!(index.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_announce_rejects_oversized_batches() {
        let (server, _) = setup().await;
        let ids = vec![BlobId::from_static(b"x"); MAX_BLOBS_PER_ANNOUNCE + 1];
        let err = server
            .handle_announce_blobs(&PeerId::new("caller"), ids)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }
}
