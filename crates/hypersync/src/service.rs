//! Sync service: subscriptions, discovery, and peer fan-out.
//!
//! ## Overview
//!
//! The service owns a [`DiscoveryScheduler`] and acts as its
//! [`Discoverer`]. Each discovery builds one local store for the requested
//! scope, reconciles it with a set of peers in parallel, and downloads the
//! blobs it learns it is missing.
//!
//! ## Discovery Order
//!
//! 1. A pinned version that is already stored locally returns immediately
//! 2. Connected peers, plus the site server of the resource's space
//! 3. Providers announcing the resource, when nobody nearby had it
//!
//! ## Failure Handling
//!
//! A failing peer never aborts its siblings. Blobs that arrive before a
//! fetch stalls are kept; the rest are picked up by the next run.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use hypersync_core::{AccountId, BlobId, DiscoveryKey, Iri, PeerId, Version};
use hypersync_perms::SpaceAuthority;
use hypersync_store::{
    Blob, BlobIndex, ItemSource, RangeSetStore, SliceStore, Subscription, SubscriptionStore,
};
use hypersync_sync::{
    AnnounceProgress, BlockExchange, Filter, ReconcileRequest, ReconciliationSession, SyncClient,
};

use crate::config::SyncConfig;
use crate::ctx::SyncCtx;
use crate::error::{Error, Result};
use crate::metrics::SyncMetrics;
use crate::peers::PeerDirectory;
use crate::progress::{bump, Progress};
use crate::scheduler::{
    Discoverer, DiscoveryScheduler, ScheduleOpts, SchedulerConfig, TaskInfo,
};
use crate::server::{PushAllowlist, SyncServer};

/// Hard cap on round trips of one reconciliation.
pub const MAX_ROUNDS: usize = 1000;

/// Budget for syncing with connected peers during discovery.
pub const LOCAL_PEERS_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for finding and syncing with providers during discovery.
pub const PROVIDERS_TIMEOUT: Duration = Duration::from_secs(20);

/// Providers asked during discovery of the latest version.
pub const MAX_PROVIDERS: usize = 15;

/// Providers asked per subscription when no peer is known.
pub const SUBSCRIPTION_PROVIDERS: usize = 3;

/// Resources to sync, mapped to whether children are included.
pub type Entities = BTreeMap<Iri, bool>;

/// Collaborators of the service.
pub struct ServiceDeps {
    /// Blob storage. Fetched blobs land here.
    pub index: Arc<dyn BlobIndex>,
    /// Scope selection for reconciliation stores.
    pub items: Arc<dyn ItemSource>,
    /// Durable subscriptions.
    pub subscriptions: Arc<dyn SubscriptionStore>,
    /// Reconcile and authenticate RPCs.
    pub client: Arc<dyn SyncClient>,
    /// Blob downloads.
    pub blocks: Arc<dyn BlockExchange>,
    /// Peer and provider lookup.
    pub peers: Arc<dyn PeerDirectory>,
    /// Authorization and site resolution.
    pub authority: Arc<dyn SpaceAuthority>,
    /// Metrics sink.
    pub metrics: Arc<dyn SyncMetrics>,
    /// This node.
    pub local_peer: PeerId,
    /// Accounts this node proves control of when it connects to peers.
    pub local_accounts: Vec<AccountId>,
}

/// Outcome of syncing with a set of peers.
#[derive(Debug, Default)]
pub struct SyncResult {
    /// Peers synced without error.
    pub num_sync_ok: usize,
    /// Peers that failed.
    pub num_sync_failed: usize,
    /// Peers, in the same order as `errs`.
    pub peers: Vec<PeerId>,
    /// Error per peer, `None` on success.
    pub errs: Vec<Option<Error>>,
}

/// The sync service.
pub struct SyncService {
    inner: Arc<ServiceInner>,
    scheduler: DiscoveryScheduler<ServiceInner>,
}

struct ServiceInner {
    cfg: SyncConfig,
    deps: ServiceDeps,
    /// Held by the one-shot subscription sync.
    sync_lock: tokio::sync::Mutex<()>,
    /// Blobs being pushed, readable by their receivers until the push ends.
    allowlist: Arc<PushAllowlist>,
}

impl SyncService {
    /// Create a service. Fails if the config is invalid.
    pub fn new(cfg: SyncConfig, deps: ServiceDeps) -> Result<Self> {
        cfg.validate()?;
        let sched_cfg = SchedulerConfig::from(&cfg);
        let inner = Arc::new(ServiceInner {
            cfg,
            deps,
            sync_lock: tokio::sync::Mutex::new(()),
            allowlist: Arc::new(PushAllowlist::new()),
        });
        let scheduler = DiscoveryScheduler::new(Arc::clone(&inner), sched_cfg);
        Ok(Self { inner, scheduler })
    }

    /// The active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.cfg
    }

    /// A handler answering remote peers from the same content index.
    pub fn handler(&self) -> SyncServer {
        let deps = &self.inner.deps;
        SyncServer::new(
            Arc::clone(&deps.index),
            Arc::clone(&deps.items),
            Arc::clone(&deps.authority),
            Arc::clone(&deps.blocks),
            self.inner.cfg.clone(),
        )
        .with_allowlist(Arc::clone(&self.inner.allowlist))
    }

    /// Load persisted subscriptions and run the scheduler until `cancel`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let subs = self.inner.deps.subscriptions.list_subscriptions().await?;
        tracing::info!(subscriptions = subs.len(), "sync service started");
        self.scheduler
            .load_subscriptions(subs.iter().map(Subscription::key));
        let res = self.scheduler.run(cancel).await;
        tracing::info!("sync service stopped");
        res
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a subscription and start refreshing it.
    pub async fn subscribe(&self, iri: &Iri, recursive: bool) -> Result<()> {
        self.inner
            .deps
            .subscriptions
            .subscribe(iri, recursive)
            .await?;

        // Recursiveness is part of the key; drop the other variant.
        let other = DiscoveryKey::latest(iri.clone(), !recursive);
        self.scheduler.remove_subscriptions([&other]);
        self.scheduler.schedule_task(
            DiscoveryKey::latest(iri.clone(), recursive),
            Instant::now(),
            ScheduleOpts {
                force_subscription: true,
                is_hot: false,
            },
        );
        Ok(())
    }

    /// Delete a subscription and stop refreshing it.
    pub async fn unsubscribe(&self, iri: &Iri) -> Result<()> {
        self.inner.deps.subscriptions.unsubscribe(iri).await?;
        let keys = [
            DiscoveryKey::latest(iri.clone(), false),
            DiscoveryKey::latest(iri.clone(), true),
        ];
        self.scheduler.remove_subscriptions(&keys);
        Ok(())
    }

    /// All persisted subscriptions.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.inner.deps.subscriptions.list_subscriptions().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask for a resource to be found in the background.
    ///
    /// Returns at once with the task's current state. Callers poll
    /// [`task_info`](Self::task_info) for progress; calling this again
    /// keeps the task hot.
    pub fn discover_entity(&self, iri: Iri, version: Version, recursive: bool) -> TaskInfo {
        let key = DiscoveryKey {
            iri,
            version,
            recursive,
        };
        self.scheduler.schedule_task(
            key,
            Instant::now(),
            ScheduleOpts {
                force_subscription: false,
                is_hot: true,
            },
        )
    }

    /// State of a discovery task.
    pub fn task_info(&self, key: &DiscoveryKey) -> Option<TaskInfo> {
        self.scheduler.task_info(key)
    }

    /// Find a resource now, blocking until it is found or every source
    /// failed.
    pub async fn discover_object(
        &self,
        ctx: &SyncCtx,
        iri: &Iri,
        version: &Version,
        recursive: bool,
    ) -> Result<Option<Version>> {
        let progress = Progress::default();
        self.inner
            .discover_object_with_progress(iri, version, recursive, &progress, ctx)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Syncing
    // ─────────────────────────────────────────────────────────────────────────

    /// Sync every subscription with every known peer, once.
    ///
    /// Fails with [`Error::SyncAlreadyRunning`] if another call is still
    /// in progress.
    pub async fn sync_subscriptions_once(&self, ctx: &SyncCtx) -> Result<SyncResult> {
        self.inner.sync_subscriptions_once(ctx).await
    }

    /// Like [`sync_subscriptions_once`](Self::sync_subscriptions_once), but
    /// logs the outcome. A concurrent run is not an error.
    pub async fn sync_all_and_log(&self, ctx: &SyncCtx) -> Result<()> {
        tracing::info!("sync loop started");
        let res = match self.inner.sync_subscriptions_once(ctx).await {
            Ok(res) => res,
            Err(Error::SyncAlreadyRunning) => {
                tracing::debug!("sync loop is already running");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for (peer, err) in res.peers.iter().zip(&res.errs) {
            if let Some(err) = err {
                tracing::debug!(peer = %peer, error = %err, "sync loop error");
            }
        }
        tracing::info!(
            successes = res.num_sync_ok,
            failures = res.num_sync_failed,
            "sync loop finished"
        );
        Ok(())
    }

    /// Reconcile `entities` with every peer in parallel.
    pub async fn sync_with_many_peers(
        &self,
        ctx: &SyncCtx,
        peers: &[PeerId],
        entities: &Entities,
        store: &dyn RangeSetStore,
        progress: &Progress,
    ) -> SyncResult {
        self.inner
            .sync_with_many_peers(ctx, peers, entities, store, progress)
            .await
    }

    /// Reconcile `entities` with one peer, under the per-peer timeout.
    pub async fn sync_with_peer(
        &self,
        ctx: &SyncCtx,
        peer: &PeerId,
        entities: &Entities,
        store: &dyn RangeSetStore,
        progress: &Progress,
    ) -> Result<()> {
        self.inner
            .sync_with_peer(ctx, peer, entities, store, progress)
            .await
    }

    /// Run the reconciliation loop with `peer` and fetch what it finds.
    ///
    /// `ctx` must carry a deadline.
    pub async fn sync_entities(
        &self,
        ctx: &SyncCtx,
        peer: &PeerId,
        entities: &Entities,
        store: &dyn RangeSetStore,
        progress: &Progress,
    ) -> Result<()> {
        self.inner
            .sync_entities(ctx, peer, entities, store, progress)
            .await
    }

    /// Tell `peer` about blobs it should pull from us.
    ///
    /// While the announcement is in flight `peer` may fetch these blobs even
    /// if it could not read them otherwise.
    pub async fn announce_blobs(
        &self,
        ctx: &SyncCtx,
        peer: &PeerId,
        ids: Vec<BlobId>,
    ) -> Result<AnnounceProgress> {
        let allowlist = &self.inner.allowlist;
        allowlist.allow(peer, &ids).await;
        let res = ctx
            .run(async {
                Ok(self
                    .inner
                    .deps
                    .client
                    .announce_blobs(peer, ids.clone())
                    .await?)
            })
            .await;
        allowlist.release(peer, &ids).await;

        let progress = res?;
        tracing::debug!(
            peer = %peer,
            announced = progress.blobs_announced,
            wanted = progress.blobs_wanted,
            processed = progress.blobs_processed,
            "announced blobs"
        );
        Ok(progress)
    }

    /// Build the sealed local store for a set of scopes.
    pub async fn load_store(&self, keys: &[DiscoveryKey]) -> Result<SliceStore> {
        self.inner.load_store(keys).await
    }
}

impl ServiceInner {
    async fn load_store(&self, keys: &[DiscoveryKey]) -> Result<SliceStore> {
        let items = self.deps.items.load_items_for_scope(keys).await?;
        Ok(SliceStore::from_items(
            items.into_iter().map(|scoped| scoped.item),
        )?)
    }

    async fn sync_subscriptions_once(&self, ctx: &SyncCtx) -> Result<SyncResult> {
        let _running = self
            .sync_lock
            .try_lock()
            .map_err(|_| Error::SyncAlreadyRunning)?;

        let subs = self.deps.subscriptions.list_subscriptions().await?;
        tracing::debug!(subscriptions = subs.len(), "syncing subscribed content");
        if subs.is_empty() {
            return Ok(SyncResult::default());
        }

        let entities: Entities = subs.iter().map(|s| (s.iri.clone(), s.recursive)).collect();

        let mut peers = self.deps.peers.known_peers().await?;
        if peers.is_empty() {
            tracing::debug!("no known peers, asking providers");
            for iri in entities.keys() {
                let found = self
                    .deps
                    .peers
                    .find_providers(iri, SUBSCRIPTION_PROVIDERS)
                    .await?;
                peers.extend(found);
            }
        }
        let peers = self.without_self(peers);
        if peers.is_empty() {
            return Err(Error::NoProviders);
        }

        let keys: Vec<DiscoveryKey> = subs.iter().map(Subscription::key).collect();
        let store = self.load_store(&keys).await?;

        tracing::debug!(
            entities = entities.len(),
            peers = peers.len(),
            "syncing subscriptions"
        );
        Ok(self
            .sync_with_many_peers(ctx, &peers, &entities, &store, &Progress::default())
            .await)
    }

    async fn sync_with_many_peers(
        &self,
        ctx: &SyncCtx,
        peers: &[PeerId],
        entities: &Entities,
        store: &dyn RangeSetStore,
        progress: &Progress,
    ) -> SyncResult {
        bump(&progress.peers_found, peers.len());

        let runs = peers.iter().map(|peer| async move {
            tracing::debug!(peer = %peer, "syncing with peer");
            let res = self
                .sync_with_peer(ctx, peer, entities, store, progress)
                .await;
            match &res {
                Ok(()) => bump(&progress.peers_synced_ok, 1),
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "could not sync with peer");
                    bump(&progress.peers_failed, 1);
                }
            }
            (peer.clone(), res.err())
        });

        let mut out = SyncResult::default();
        for (peer, err) in join_all(runs).await {
            if err.is_none() {
                out.num_sync_ok += 1;
            } else {
                out.num_sync_failed += 1;
            }
            out.peers.push(peer);
            out.errs.push(err);
        }
        out
    }

    async fn sync_with_peer(
        &self,
        ctx: &SyncCtx,
        peer: &PeerId,
        entities: &Entities,
        store: &dyn RangeSetStore,
        progress: &Progress,
    ) -> Result<()> {
        if *peer == self.deps.local_peer {
            tracing::debug!("sync with self attempted");
            return Err(Error::SelfSync);
        }

        let ctx = ctx.with_timeout(self.cfg.timeout_per_peer);

        // Unauthenticated peers still get public content.
        if !self.deps.local_accounts.is_empty() {
            let auth = ctx
                .run(async {
                    self.deps
                        .client
                        .authenticate(peer, &self.deps.local_accounts)
                        .await
                        .map_err(Error::from)
                })
                .await;
            if let Err(e) = auth {
                tracing::debug!(peer = %peer, error = %e, "authentication failed");
            }
        }

        self.sync_entities(&ctx, peer, entities, store, progress)
            .await
    }

    async fn sync_entities(
        &self,
        ctx: &SyncCtx,
        peer: &PeerId,
        entities: &Entities,
        store: &dyn RangeSetStore,
        progress: &Progress,
    ) -> Result<()> {
        if entities.is_empty() {
            return Err(Error::NoEntities);
        }

        self.deps.metrics.sync_started();
        let res = self
            .reconcile_and_fetch(ctx, peer, entities, store, progress)
            .await;
        self.deps.metrics.sync_finished(res.is_ok());
        res
    }

    async fn reconcile_and_fetch(
        &self,
        ctx: &SyncCtx,
        peer: &PeerId,
        entities: &Entities,
        store: &dyn RangeSetStore,
        progress: &Progress,
    ) -> Result<()> {
        if ctx.deadline().is_none() {
            return Err(Error::MissingDeadline);
        }

        let session = ReconciliationSession::new(store, self.cfg.session)?;

        let mut local_haves = HashSet::with_capacity(session.size());
        store.for_each(0, session.size(), &mut |_, item| {
            local_haves.insert(item.id.clone());
            true
        })?;

        let filters: Vec<Filter> = entities
            .iter()
            .map(|(iri, recursive)| Filter {
                resource: iri.to_string(),
                recursive: *recursive,
            })
            .collect();

        let mut msg = Some(session.initiate()?);
        let mut all_wants = Vec::new();
        let mut seen = HashSet::new();
        let mut rounds = 0;
        let (mut haves, mut wants) = (Vec::new(), Vec::new());

        while let Some(ranges) = msg.take() {
            rounds += 1;
            if rounds > MAX_ROUNDS {
                return Err(Error::TooManyRounds(MAX_ROUNDS));
            }

            let request = ReconcileRequest {
                ranges,
                filters: filters.clone(),
            };
            let resp = ctx
                .run(async {
                    self.deps
                        .client
                        .reconcile_blobs(peer, request)
                        .await
                        .map_err(Error::from)
                })
                .await?;
            let Some(reply) = resp.ranges else {
                break;
            };

            haves.clear();
            wants.clear();
            msg = session.reconcile_with_ids(&reply, &mut haves, &mut wants)?;

            for want in wants.drain(..) {
                if !local_haves.contains(&want) && seen.insert(want.clone()) {
                    all_wants.push(want);
                }
            }
            tracing::debug!(peer = %peer, round = rounds, wants = all_wants.len(), "blobs reconciled");
        }

        if all_wants.is_empty() {
            tracing::debug!(peer = %peer, "peer does not have new content");
            return Ok(());
        }
        bump(&progress.blobs_discovered, all_wants.len());

        let n = all_wants.len();
        let delta = i64::try_from(n).unwrap_or(i64::MAX);
        self.deps.metrics.wanted_blobs_changed(delta);
        self.deps
            .metrics
            .wanted_blobs_total(u64::try_from(n).unwrap_or(u64::MAX));
        let res = self.fetch_blobs(ctx, peer, all_wants, progress).await;
        self.deps.metrics.wanted_blobs_changed(-delta);
        res
    }

    /// Download `wants` from `peer` and store whatever arrives.
    ///
    /// A stream that goes quiet for `fetch_idle_timeout` ends the fetch
    /// without an error. Cancellation still stores the partial result.
    async fn fetch_blobs(
        &self,
        ctx: &SyncCtx,
        peer: &PeerId,
        wants: Vec<BlobId>,
        progress: &Progress,
    ) -> Result<()> {
        let total = wants.len();
        let mut pending: HashSet<BlobId> = wants.iter().cloned().collect();
        let mut rx = ctx
            .run(async {
                self.deps
                    .blocks
                    .get_blocks(peer, wants)
                    .await
                    .map_err(Error::from)
            })
            .await?;

        let idle = self.cfg.fetch_idle_timeout;
        let mut downloaded: Vec<Blob> = Vec::new();
        let mut cancelled = false;

        while !pending.is_empty() {
            let mut wake = Instant::now() + idle;
            if let Some(deadline) = ctx.deadline() {
                wake = wake.min(deadline);
            }

            tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => {
                    cancelled = true;
                    break;
                }
                next = tokio::time::timeout_at(wake, rx.recv()) => match next {
                    Ok(Some(blob)) => {
                        // Ignore anything we did not ask for.
                        if pending.remove(&blob.id) {
                            bump(&progress.blobs_downloaded, 1);
                            downloaded.push(blob);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        tracing::debug!(
                            peer = %peer,
                            missing = pending.len(),
                            "blob fetch went idle"
                        );
                        break;
                    }
                },
            }
        }

        if !pending.is_empty() {
            for id in &pending {
                tracing::debug!(peer = %peer, blob = %id, "failed to get wanted blob");
            }
            bump(&progress.blobs_failed, pending.len());
        }

        if !downloaded.is_empty() {
            let stored = self.deps.index.put_many(downloaded).await?;
            tracing::debug!(peer = %peer, wanted = total, stored, "stored reconciled blobs");
        }

        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Local version of `iri` that satisfies a request for `version`.
    async fn local_version(&self, iri: &Iri, version: &Version) -> Result<Option<Version>> {
        if version.is_latest() {
            return Ok(self.deps.index.resource_version(iri).await?);
        }
        if self.deps.index.has_version(iri, version).await? {
            return Ok(Some(version.clone()));
        }
        Ok(None)
    }

    /// The peer serving the site of `iri`'s space, if any.
    async fn site_peer(&self, iri: &Iri) -> Option<PeerId> {
        let lookup = async {
            let Some(url) = self.deps.authority.site_url(&iri.space()).await? else {
                return Ok(None);
            };
            self.deps.authority.resolve_site_url(&url).await
        };
        match lookup.await {
            Ok(peer) => peer,
            Err(e) => {
                tracing::debug!(resource = %iri, error = %e, "site lookup failed");
                None
            }
        }
    }

    fn without_self(&self, mut peers: Vec<PeerId>) -> Vec<PeerId> {
        peers.sort();
        peers.dedup();
        peers.retain(|p| *p != self.deps.local_peer);
        peers
    }
}

#[async_trait]
impl Discoverer for ServiceInner {
    async fn discover_object_with_progress(
        &self,
        iri: &Iri,
        version: &Version,
        recursive: bool,
        progress: &Progress,
        ctx: &SyncCtx,
    ) -> Result<Option<Version>> {
        if self.cfg.no_discovery {
            return Err(Error::DiscoveryDisabled);
        }

        if !version.is_latest() && self.deps.index.has_version(iri, version).await? {
            tracing::debug!(resource = %iri, version = %version, "version already stored locally");
            return Ok(Some(version.clone()));
        }

        let key = DiscoveryKey {
            iri: iri.clone(),
            version: version.clone(),
            recursive,
        };
        let store = self.load_store(std::slice::from_ref(&key)).await?;
        let entities = Entities::from([(iri.clone(), recursive)]);

        let mut nearby = self.deps.peers.connected_peers().await?;
        if let Some(site) = self.site_peer(iri).await {
            nearby.push(site);
        }
        let nearby = self.without_self(nearby);

        if !nearby.is_empty() {
            tracing::debug!(resource = %iri, peers = nearby.len(), "discovering via connected peers");
            let local_ctx = ctx.with_timeout(LOCAL_PEERS_TIMEOUT);
            let res = self
                .sync_with_many_peers(&local_ctx, &nearby, &entities, &store, progress)
                .await;
            if res.num_sync_ok > 0 {
                if let Some(found) = self.local_version(iri, version).await? {
                    tracing::debug!(resource = %iri, "discovered via connected peers");
                    return Ok(Some(found));
                }
            }
        }

        tracing::debug!(resource = %iri, "connected peers did not have it, asking providers");
        // A pinned version stops at the first match, so there is no need
        // to limit how many providers are asked.
        let limit = if version.is_latest() { MAX_PROVIDERS } else { 0 };
        let providers_ctx = ctx.with_timeout(PROVIDERS_TIMEOUT);
        let providers = providers_ctx
            .run(self.deps.peers.find_providers(iri, limit))
            .await?;
        let providers = self.without_self(providers);
        if providers.is_empty() {
            return Ok(None);
        }

        let res = self
            .sync_with_many_peers(&providers_ctx, &providers, &entities, &store, progress)
            .await;
        if res.num_sync_ok > 0 {
            if let Some(found) = self.local_version(iri, version).await? {
                tracing::debug!(resource = %iri, "discovered via providers");
                return Ok(Some(found));
            }
        }
        Err(Error::NotFound(key.to_string()))
    }
}
