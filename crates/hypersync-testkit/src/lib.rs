//! # Hypersync Testkit
//!
//! Testing utilities for Hypersync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Generators**: Proptest strategies for items, blobs, and diverged sets
//! - **Fixtures**: Multi-peer networks of real sync services, wired in-process
//! - **Harness**: In-process reconciliation of two stores, without transport
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use hypersync_store::SliceStore;
//! use hypersync_sync::SessionConfig;
//! use hypersync_testkit::{diverged_sets, reconcile_stores};
//!
//! proptest! {
//!     #[test]
//!     fn finds_difference(sets in diverged_sets(100, 10)) {
//!         let a = SliceStore::from_items(sets.a()).unwrap();
//!         let b = SliceStore::from_items(sets.b()).unwrap();
//!         let outcome = reconcile_stores(&a, &b, SessionConfig::default()).unwrap();
//!         prop_assert_eq!(outcome.wants, sets.b_minus_a());
//!     }
//! }
//! ```
//!
//! ## Test Networks
//!
//! Quickly set up multi-peer scenarios:
//!
//! ```rust,no_run
//! use hypersync_core::Iri;
//! use hypersync_testkit::{doc_blobs, TestNetwork};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let doc = Iri::parse("hm://alice/doc")?;
//! let mut net = TestNetwork::new();
//! let alice = net.add_peer("alice", &["alice"], doc_blobs(&doc, 3, 1)).await?;
//! let bob = net.add_peer("bob", &["bob"], vec![]).await?;
//! net.connect(&alice, &bob);
//!
//! bob.service.subscribe(&doc, false).await?;
//! bob.sync_once().await?;
//! assert_eq!(bob.blob_count(), 3);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    doc_blobs, init_tracing, reconcile_stores, test_config, ReconcileOutcome, RunningPeer,
    TestNetwork, TestPeer,
};
pub use generators::{diverged_sets, DivergedSets};
