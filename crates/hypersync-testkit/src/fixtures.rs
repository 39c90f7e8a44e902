//! Test fixtures for common scenarios.
//!
//! A [`TestNetwork`] wires complete nodes (index, authority, peer
//! directory, metrics, and a [`SyncService`]) onto one in-process
//! [`MemoryNetwork`], so multi-peer scenarios read like the deployment
//! they model.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hypersync::{
    CounterMetrics, Error, ServiceDeps, StaticDirectory, SyncConfig, SyncCtx, SyncResult,
    SyncService,
};
use hypersync_core::{AccountId, BlobId, Iri, PeerId};
use hypersync_perms::CapabilityIndex;
use hypersync_store::{Blob, MemoryIndex, RangeSetStore};
use hypersync_sync::{MemoryNetwork, ReconciliationSession, SessionConfig};

/// Round trips after which [`reconcile_stores`] gives up.
pub const MAX_ROUNDS: usize = 1000;

/// Result of reconciling two stores in-process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Ids the initiator has and the responder lacks.
    pub haves: BTreeSet<BlobId>,
    /// Ids the responder has and the initiator lacks.
    pub wants: BTreeSet<BlobId>,
    /// Round trips taken.
    pub rounds: usize,
}

/// Run a full reconciliation between two stores without any transport.
pub fn reconcile_stores<A, B>(
    initiator: &A,
    responder: &B,
    config: SessionConfig,
) -> anyhow::Result<ReconcileOutcome>
where
    A: RangeSetStore + ?Sized,
    B: RangeSetStore + ?Sized,
{
    let local = ReconciliationSession::new(initiator, config)?;
    let remote = ReconciliationSession::new(responder, config)?;

    let (mut haves, mut wants) = (Vec::new(), Vec::new());
    let mut msg = local.initiate()?;
    let mut rounds = 0;
    loop {
        rounds += 1;
        if rounds > MAX_ROUNDS {
            bail!("reconciliation did not finish in {} rounds", MAX_ROUNDS);
        }
        let Some(reply) = remote.reconcile(&msg)? else {
            break;
        };
        match local.reconcile_with_ids(&reply, &mut haves, &mut wants)? {
            Some(next) => msg = next,
            None => break,
        }
    }

    Ok(ReconcileOutcome {
        haves: haves.into_iter().collect(),
        wants: wants.into_iter().collect(),
        rounds,
    })
}

/// Config with short timers, suited to tests.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        warmup_duration: Duration::ZERO,
        interval: Duration::from_millis(200),
        timeout_per_peer: Duration::from_secs(5),
        min_workers: 2,
        max_workers: 4,
        fetch_idle_timeout: Duration::from_millis(500),
        ..SyncConfig::default()
    }
}

/// `n` blobs of a resource with deterministic pseudo-random content.
///
/// Timestamps start at 1 and increase, so the last blob is the newest.
pub fn doc_blobs(iri: &Iri, n: usize, seed: u64) -> Vec<Blob> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let mut data = vec![0u8; 64];
            rng.fill_bytes(&mut data);
            Blob::new(iri.clone(), i as u64 + 1, Bytes::from(data))
        })
        .collect()
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to debug output from this workspace.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hypersync=debug,hypersync_sync=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// One node of a [`TestNetwork`].
pub struct TestPeer {
    /// Transport identity.
    pub peer: PeerId,
    /// Content index, also used as item source and subscription store.
    pub index: Arc<MemoryIndex>,
    /// Capabilities and site records this node trusts.
    pub authority: Arc<CapabilityIndex>,
    /// Peers this node knows about.
    pub directory: Arc<StaticDirectory>,
    /// Metrics reported by the service.
    pub metrics: Arc<CounterMetrics>,
    /// The sync service.
    pub service: Arc<SyncService>,
}

impl TestPeer {
    /// Start the discovery scheduler in the background.
    pub fn start(&self) -> RunningPeer {
        let cancel = CancellationToken::new();
        let service = Arc::clone(&self.service);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { service.run(token).await });
        RunningPeer { cancel, handle }
    }

    /// Sync every subscription with every known peer, once.
    pub async fn sync_once(&self) -> anyhow::Result<SyncResult> {
        self.service
            .sync_subscriptions_once(&SyncCtx::background())
            .await
            .with_context(|| format!("subscription sync on {}", self.peer))
    }

    /// Number of blobs stored locally.
    pub fn blob_count(&self) -> usize {
        self.index.blob_count()
    }
}

/// Handle to a scheduler started with [`TestPeer::start`].
pub struct RunningPeer {
    cancel: CancellationToken,
    handle: JoinHandle<hypersync::Result<()>>,
}

impl RunningPeer {
    /// Cancel the scheduler and wait for its workers to finish.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.cancel.cancel();
        match self.handle.await? {
            Ok(()) | Err(Error::Cancelled) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A set of nodes on one in-process network.
pub struct TestNetwork {
    /// Routing table shared by every node.
    pub network: Arc<MemoryNetwork>,
    cfg: SyncConfig,
    peers: Vec<Arc<TestPeer>>,
}

impl TestNetwork {
    /// Create an empty network using [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create an empty network whose nodes use `cfg`.
    pub fn with_config(cfg: SyncConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            cfg,
            peers: Vec::new(),
        }
    }

    /// Add a node that holds `blobs` and authenticates as `accounts`.
    pub async fn add_peer(
        &mut self,
        name: &str,
        accounts: &[&str],
        blobs: Vec<Blob>,
    ) -> anyhow::Result<Arc<TestPeer>> {
        let peer = PeerId::new(name);
        if self.peers.iter().any(|p| p.peer == peer) {
            bail!("peer {} already exists", name);
        }

        let index = Arc::new(MemoryIndex::with_blobs(blobs));
        let authority = Arc::new(CapabilityIndex::new());
        let directory = Arc::new(StaticDirectory::new());
        let metrics = Arc::new(CounterMetrics::new());
        let client = Arc::new(self.network.client(peer.clone()));

        let service = SyncService::new(
            self.cfg.clone(),
            ServiceDeps {
                index: index.clone(),
                items: index.clone(),
                subscriptions: index.clone(),
                client: client.clone(),
                blocks: client,
                peers: directory.clone(),
                authority: authority.clone(),
                metrics: metrics.clone(),
                local_peer: peer.clone(),
                local_accounts: accounts.iter().map(|a| AccountId::new(*a)).collect(),
            },
        )?;

        self.network
            .register(peer.clone(), Arc::new(service.handler()))
            .await;

        let node = Arc::new(TestPeer {
            peer,
            index,
            authority,
            directory,
            metrics,
            service: Arc::new(service),
        });
        self.peers.push(Arc::clone(&node));
        Ok(node)
    }

    /// Make `a` and `b` connected to each other.
    pub fn connect(&self, a: &TestPeer, b: &TestPeer) {
        a.directory.add_peer(b.peer.clone(), true);
        b.directory.add_peer(a.peer.clone(), true);
    }

    /// Connect every pair of nodes.
    pub fn connect_all(&self) {
        for (i, a) in self.peers.iter().enumerate() {
            for b in &self.peers[i + 1..] {
                self.connect(a, b);
            }
        }
    }

    /// All nodes, in insertion order.
    pub fn peers(&self) -> &[Arc<TestPeer>] {
        &self.peers
    }

    /// Run one subscription sync on every node, in insertion order.
    pub async fn sync_round(&self) -> anyhow::Result<()> {
        for peer in &self.peers {
            let res = peer.sync_once().await?;
            tracing::debug!(
                peer = %peer.peer,
                ok = res.num_sync_ok,
                failed = res.num_sync_failed,
                "sync round"
            );
        }
        Ok(())
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
