//! Range-based set reconciliation.
//!
//! Both sides hold a sealed [`RangeSetStore`]. The initiator opens with a
//! single fingerprint covering everything. Each side answers a range by
//! comparing fingerprints and, when they differ, splitting the range at
//! the midpoint of its own items. Small ranges travel as explicit id lists,
//! which the initiator diffs into haves and wants.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use hypersync_core::{Accumulator, BlobId, Bound, Item};
use hypersync_store::RangeSetStore;

use crate::error::{Result, SyncError};
use crate::messages::{
    bound_len_hint, limits, Mode, Range, RangeMessage, ENVELOPE_LEN_HINT, FINGERPRINT_LEN_HINT,
    SKIP_LEN_HINT,
};

/// Per-session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Max encoded size of an outgoing message. 0 means unlimited.
    pub frame_size_limit: usize,
    /// Ranges with fewer visible items than this are sent as id lists.
    pub id_list_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_size_limit: 50_000,
            id_list_threshold: 16,
        }
    }
}

impl SessionConfig {
    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.id_list_threshold < 2 {
            return Err(SyncError::InvalidConfig(
                "id_list_threshold must be at least 2".into(),
            ));
        }
        if self.id_list_threshold > limits::MAX_IDS_PER_RANGE {
            return Err(SyncError::InvalidConfig(format!(
                "id_list_threshold must be at most {}",
                limits::MAX_IDS_PER_RANGE
            )));
        }
        let min_frame = limits::MIN_FRAME_SIZE_LIMIT.max(2 * self.range_reserve());
        if self.frame_size_limit != 0 && self.frame_size_limit < min_frame {
            return Err(SyncError::InvalidConfig(format!(
                "frame_size_limit must be 0 or at least {}",
                min_frame
            )));
        }
        Ok(())
    }

    /// Upper estimate of what answering one incoming range can add to a frame.
    fn range_reserve(&self) -> usize {
        let bound = 52 + limits::MAX_ID_LEN;
        let list = 12 + self.id_list_threshold * (limits::MAX_ID_LEN + 4);
        // Two halves, the trailing fingerprint of the remainder, the envelope.
        2 * (bound + list) + 72 + ENVELOPE_LEN_HINT
    }
}

/// One side of a reconciliation.
///
/// Borrows the store, so several sessions may run over the same sealed
/// store at once.
pub struct ReconciliationSession<'a, S: RangeSetStore + ?Sized> {
    store: &'a S,
    config: SessionConfig,
    size: usize,
}

/// Where the initiator collects the diff.
struct Diff<'o> {
    haves: &'o mut Vec<BlobId>,
    wants: &'o mut Vec<BlobId>,
}

impl<'a, S: RangeSetStore + ?Sized> ReconciliationSession<'a, S> {
    /// Open a session. The store must be sealed.
    pub fn new(store: &'a S, config: SessionConfig) -> Result<Self> {
        if !store.is_sealed() {
            return Err(SyncError::StoreNotSealed);
        }
        config.validate()?;
        let size = store.size()?;
        Ok(Self {
            store,
            config,
            size,
        })
    }

    /// Number of items in the underlying store, visible or not.
    pub fn size(&self) -> usize {
        self.size
    }

    /// First message: one fingerprint over the whole store.
    pub fn initiate(&self) -> Result<Vec<u8>> {
        let fingerprint = self.store.fingerprint(0, self.size)?;
        RangeMessage::new(vec![Range {
            upper: Bound::Infinity,
            mode: Mode::Fingerprint(fingerprint),
        }])
        .encode()
    }

    /// Answer an initiator's message. `None` when nothing is left to do.
    pub fn reconcile(&self, msg: &[u8]) -> Result<Option<Vec<u8>>> {
        let msg = RangeMessage::decode(msg)?;
        self.respond(&msg, None)
    }

    /// Process a responder's message, appending ids we hold that the peer
    /// lacks to `haves` and ids the peer holds that we lack to `wants`.
    ///
    /// Returns the next message to send, or `None` once reconciled.
    pub fn reconcile_with_ids(
        &self,
        msg: &[u8],
        haves: &mut Vec<BlobId>,
        wants: &mut Vec<BlobId>,
    ) -> Result<Option<Vec<u8>>> {
        let msg = RangeMessage::decode(msg)?;
        self.respond(&msg, Some(Diff { haves, wants }))
    }

    fn respond(&self, msg: &RangeMessage, mut diff: Option<Diff<'_>>) -> Result<Option<Vec<u8>>> {
        let mut out = Output::default();
        let mut prev_bound = Bound::MIN;
        let mut prev_index = 0;
        let fold_costs = fold_costs(&msg.ranges);

        for (processed, range) in msg.ranges.iter().enumerate() {
            if processed > 0 && self.frame_full(&out, fold_costs[processed]) {
                tracing::trace!(
                    remaining = msg.ranges.len() - processed,
                    "frame limit reached"
                );
                self.fold(&mut out, &msg.ranges[processed..], prev_index)?;
                break;
            }

            let upper_index = self.store.find_lower_bound(prev_index, self.size, &range.upper)?;

            match &range.mode {
                Mode::Skip => out.skip(&range.upper),
                Mode::Fingerprint(theirs) => {
                    let ours = self.store.fingerprint(prev_index, upper_index)?;
                    if ours == *theirs {
                        out.skip(&range.upper);
                    } else {
                        self.split(&mut out, &prev_bound, &range.upper, prev_index, upper_index)?;
                    }
                }
                Mode::IdList(theirs) => {
                    let ours = self.store.collect_range(prev_index, upper_index)?;
                    match diff.as_mut() {
                        Some(diff) => {
                            diff_ids(&ours, theirs, diff);
                            out.skip(&range.upper);
                        }
                        None if same_ids(&ours, theirs) => out.skip(&range.upper),
                        None => self.split_items(&mut out, &prev_bound, &range.upper, &ours),
                    }
                }
            }

            prev_bound = range.upper.clone();
            prev_index = upper_index;
        }

        out.finish()
    }

    /// Whether answering one more range could push the frame, plus the
    /// `pending` cost of folding what follows it, over the limit.
    fn frame_full(&self, out: &Output, pending: usize) -> bool {
        self.config.frame_size_limit != 0
            && out.size + self.config.range_reserve() + pending > self.config.frame_size_limit
    }

    /// Answer `tail` without splitting, leaving the work for a later round.
    ///
    /// Skips pass through so ranges already settled stay settled. Every run
    /// of open ranges between two skips becomes one fingerprint of ours.
    fn fold(&self, out: &mut Output, tail: &[Range], begin: usize) -> Result<()> {
        let mut folded = Vec::new();
        let mut run_start = begin;
        let mut prev_index = begin;
        for (i, range) in tail.iter().enumerate() {
            let upper_index = self.store.find_lower_bound(prev_index, self.size, &range.upper)?;
            if range.mode == Mode::Skip {
                folded.push(Range {
                    upper: range.upper.clone(),
                    mode: Mode::Skip,
                });
                run_start = upper_index;
            } else if ends_run(tail, i) {
                folded.push(Range {
                    upper: range.upper.clone(),
                    mode: Mode::Fingerprint(self.store.fingerprint(run_start, upper_index)?),
                });
                run_start = upper_index;
            }
            prev_index = upper_index;
        }

        let size: usize = folded.iter().map(Range::encoded_len_hint).sum();
        if out.size + size + ENVELOPE_LEN_HINT > self.config.frame_size_limit {
            // Only reachable with a peer that ignores the frame limit.
            let fingerprint = self.store.fingerprint(begin, self.size)?;
            out.push(Range {
                upper: Bound::Infinity,
                mode: Mode::Fingerprint(fingerprint),
            });
            return Ok(());
        }

        for range in folded {
            match range.mode {
                Mode::Skip => out.skip(&range.upper),
                _ => out.push(range),
            }
        }
        Ok(())
    }

    fn split(
        &self,
        out: &mut Output,
        lower: &Bound,
        upper: &Bound,
        begin: usize,
        end: usize,
    ) -> Result<()> {
        let items = self.store.collect_range(begin, end)?;
        self.split_items(out, lower, upper, &items);
        Ok(())
    }

    /// Describe `items` (every visible item in `lower..upper`) for the peer.
    ///
    /// Splits are chosen among visible items only, so the bounds never
    /// reveal anything the filter hides.
    fn split_items(&self, out: &mut Output, lower: &Bound, upper: &Bound, items: &[Item]) {
        let threshold = self.config.id_list_threshold;
        if items.len() < threshold {
            out.push(Range {
                upper: upper.clone(),
                mode: id_list(items),
            });
            return;
        }

        let mid = items.len() / 2;
        let split = Bound::between(&items[mid - 1], &items[mid]);
        debug_assert!(*lower < split && split < *upper);

        for (half, bound) in [(&items[..mid], split), (&items[mid..], upper.clone())] {
            let mode = if half.len() < threshold {
                id_list(half)
            } else {
                let mut acc = Accumulator::new();
                half.iter().for_each(|item| acc.add(item));
                Mode::Fingerprint(acc.fingerprint())
            };
            out.push(Range { upper: bound, mode });
        }
    }
}

/// Whether `ranges[i]` is the last open range before a skip or the end.
fn ends_run(ranges: &[Range], i: usize) -> bool {
    ranges.get(i + 1).map_or(true, |next| next.mode == Mode::Skip)
}

/// Upper estimate of what folding emits for
/// `ranges[i..]`, for every `i`.
fn fold_costs(ranges: &[Range]) -> Vec<usize> {
    let mut costs = vec![0; ranges.len() + 1];
    for i in (0..ranges.len()).rev() {
        let range = &ranges[i];
        let cost = if range.mode == Mode::Skip {
            bound_len_hint(&range.upper) + SKIP_LEN_HINT
        } else if ends_run(ranges, i) {
            bound_len_hint(&range.upper) + FINGERPRINT_LEN_HINT
        } else {
            0
        };
        costs[i] = costs[i + 1] + cost;
    }
    costs
}

fn id_list(items: &[Item]) -> Mode {
    Mode::IdList(items.iter().map(|item| item.id.clone()).collect())
}

fn same_ids(ours: &[Item], theirs: &[BlobId]) -> bool {
    ours.len() == theirs.len() && ours.iter().zip(theirs).all(|(item, id)| item.id == *id)
}

fn diff_ids(ours: &[Item], theirs: &[BlobId], diff: &mut Diff<'_>) {
    let their_set: BTreeSet<&BlobId> = theirs.iter().collect();
    let our_set: BTreeSet<&BlobId> = ours.iter().map(|item| &item.id).collect();

    diff.haves.extend(
        ours.iter()
            .map(|item| &item.id)
            .filter(|id| !their_set.contains(id))
            .cloned(),
    );
    diff.wants
        .extend(theirs.iter().filter(|id| !our_set.contains(id)).cloned());
}

/// Outgoing ranges under construction.
#[derive(Default)]
struct Output {
    ranges: Vec<Range>,
    size: usize,
}

impl Output {
    fn push(&mut self, range: Range) {
        self.size += range.encoded_len_hint();
        self.ranges.push(range);
    }

    /// Extend a trailing skip instead of stacking another one.
    fn skip(&mut self, upper: &Bound) {
        if let Some(last) = self.ranges.last_mut() {
            if last.mode == Mode::Skip {
                self.size -= last.encoded_len_hint();
                last.upper = upper.clone();
                self.size += last.encoded_len_hint();
                return;
            }
        }
        self.push(Range {
            upper: upper.clone(),
            mode: Mode::Skip,
        });
    }

    fn finish(mut self) -> Result<Option<Vec<u8>>> {
        while self.ranges.last().is_some_and(|r| r.mode == Mode::Skip) {
            self.ranges.pop();
        }
        if self.ranges.is_empty() {
            return Ok(None);
        }
        RangeMessage::new(self.ranges).encode().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypersync_core::SpaceId;
    use hypersync_perms::AuthorizedStore;
    use hypersync_store::{ScopedItem, SliceStore};
    use proptest::prelude::*;

    const MAX_ROUNDS: usize = 1000;

    fn store(items: &[(u64, &'static [u8])]) -> SliceStore {
        SliceStore::from_items(items.iter().map(|(ts, id)| Item::new(*ts, *id))).unwrap()
    }

    struct Outcome {
        haves: BTreeSet<BlobId>,
        wants: BTreeSet<BlobId>,
        rounds: usize,
    }

    fn run<A, B>(initiator: &A, responder: &B, config: SessionConfig) -> Outcome
    where
        A: RangeSetStore + ?Sized,
        B: RangeSetStore + ?Sized,
    {
        let local = ReconciliationSession::new(initiator, config).unwrap();
        let remote = ReconciliationSession::new(responder, config).unwrap();

        let mut haves = Vec::new();
        let mut wants = Vec::new();
        let mut msg = local.initiate().unwrap();
        let mut rounds = 0;
        loop {
            rounds += 1;
            assert!(rounds <= MAX_ROUNDS, "too many rounds");
            let Some(reply) = remote.reconcile(&msg).unwrap() else {
                break;
            };
            match local.reconcile_with_ids(&reply, &mut haves, &mut wants).unwrap() {
                Some(next) => msg = next,
                None => break,
            }
        }
        let outcome = Outcome {
            haves: haves.iter().cloned().collect(),
            wants: wants.iter().cloned().collect(),
            rounds,
        };
        assert_eq!(haves.len(), outcome.haves.len(), "haves reported twice");
        assert_eq!(wants.len(), outcome.wants.len(), "wants reported twice");
        outcome
    }

    fn ids(raw: &[&'static [u8]]) -> BTreeSet<BlobId> {
        raw.iter().map(|r| BlobId::from_static(r)).collect()
    }

    #[test]
    fn test_unsealed_store_is_rejected() {
        let mut store = SliceStore::new();
        store.insert(1, BlobId::from_static(b"a")).unwrap();
        assert!(matches!(
            ReconciliationSession::new(&store, SessionConfig::default()),
            Err(SyncError::StoreNotSealed)
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = store(&[]);
        let tiny_threshold = SessionConfig {
            id_list_threshold: 1,
            ..Default::default()
        };
        assert!(ReconciliationSession::new(&store, tiny_threshold).is_err());

        let tiny_frame = SessionConfig {
            frame_size_limit: 100,
            ..Default::default()
        };
        assert!(ReconciliationSession::new(&store, tiny_frame).is_err());

        let unlimited = SessionConfig {
            frame_size_limit: 0,
            ..Default::default()
        };
        assert!(ReconciliationSession::new(&store, unlimited).is_ok());
    }

    #[test]
    fn test_concrete_scenario() {
        let a = store(&[(1, b"a"), (2, b"b"), (3, b"c")]);
        let b = store(&[(2, b"b"), (3, b"c"), (4, b"d")]);

        let ab = run(&a, &b, SessionConfig::default());
        assert_eq!(ab.wants, ids(&[b"d"]));
        assert_eq!(ab.haves, ids(&[b"a"]));

        let ba = run(&b, &a, SessionConfig::default());
        assert_eq!(ba.wants, ids(&[b"a"]));
        assert_eq!(ba.haves, ids(&[b"d"]));
    }

    #[test]
    fn test_identical_stores_finish_in_one_round() {
        let items: Vec<Item> = (0..500u64)
            .map(|i| Item::new(i, i.to_be_bytes().to_vec()))
            .collect();
        let a = SliceStore::from_items(items.clone()).unwrap();
        let b = SliceStore::from_items(items).unwrap();

        let session = ReconciliationSession::new(&b, SessionConfig::default()).unwrap();
        let opening = ReconciliationSession::new(&a, SessionConfig::default())
            .unwrap()
            .initiate()
            .unwrap();
        assert_eq!(session.reconcile(&opening).unwrap(), None);

        let outcome = run(&a, &b, SessionConfig::default());
        assert!(outcome.haves.is_empty());
        assert!(outcome.wants.is_empty());
        assert_eq!(outcome.rounds, 1);
    }

    #[test]
    fn test_empty_stores() {
        let empty = store(&[]);
        let full_items: Vec<Item> = (0..100u64)
            .map(|i| Item::new(i * 3, format!("id-{i}").into_bytes()))
            .collect();
        let full = SliceStore::from_items(full_items.clone()).unwrap();
        let all: BTreeSet<BlobId> = full_items.into_iter().map(|i| i.id).collect();

        let pulled = run(&empty, &full, SessionConfig::default());
        assert_eq!(pulled.wants, all);
        assert!(pulled.haves.is_empty());

        let pushed = run(&full, &empty, SessionConfig::default());
        assert_eq!(pushed.haves, all);
        assert!(pushed.wants.is_empty());

        let nothing = run(&empty, &store(&[]), SessionConfig::default());
        assert!(nothing.haves.is_empty() && nothing.wants.is_empty());
    }

    #[test]
    fn test_single_item() {
        let one = store(&[(7, b"x")]);
        let config = SessionConfig {
            id_list_threshold: 2,
            ..Default::default()
        };
        let outcome = run(&store(&[]), &one, config);
        assert_eq!(outcome.wants, ids(&[b"x"]));
        assert!(outcome.rounds <= 2);
    }

    #[test]
    fn test_split_bounds_are_ascending() {
        let items: Vec<Item> = (0..64u64).map(|i| Item::new(5, vec![i as u8, 1])).collect();
        let b = SliceStore::from_items(items).unwrap();
        let session = ReconciliationSession::new(&b, SessionConfig::default()).unwrap();

        let opening = RangeMessage::new(vec![Range {
            upper: Bound::Infinity,
            mode: Mode::Fingerprint(Accumulator::new().fingerprint()),
        }])
        .encode()
        .unwrap();
        let reply = session.reconcile(&opening).unwrap().unwrap();
        let reply = RangeMessage::decode(&reply).unwrap();
        assert_eq!(reply.ranges.len(), 2);
        assert!(reply
            .ranges
            .iter()
            .all(|r| matches!(r.mode, Mode::Fingerprint(_))));
    }

    #[test]
    fn test_frame_limit_still_converges() {
        let config = SessionConfig {
            frame_size_limit: 4096,
            id_list_threshold: 4,
        };
        let a_items: Vec<Item> = (0..600u64)
            .filter(|i| i % 7 != 0)
            .map(|i| Item::new(i, BlobId::digest(&i.to_le_bytes())))
            .collect();
        let b_items: Vec<Item> = (0..600u64)
            .filter(|i| i % 5 != 0)
            .map(|i| Item::new(i, BlobId::digest(&i.to_le_bytes())))
            .collect();
        let a = SliceStore::from_items(a_items.clone()).unwrap();
        let b = SliceStore::from_items(b_items.clone()).unwrap();

        let outcome = run(&a, &b, config);
        let a_ids: BTreeSet<BlobId> = a_items.into_iter().map(|i| i.id).collect();
        let b_ids: BTreeSet<BlobId> = b_items.into_iter().map(|i| i.id).collect();
        assert_eq!(outcome.haves, &a_ids - &b_ids);
        assert_eq!(outcome.wants, &b_ids - &a_ids);
    }

    #[test]
    fn test_frames_respect_limit() {
        let config = SessionConfig {
            frame_size_limit: 4096,
            id_list_threshold: 4,
        };
        let items: Vec<Item> = (0..2000u64)
            .map(|i| Item::new(i, BlobId::digest(&i.to_be_bytes())))
            .collect();
        let full = SliceStore::from_items(items).unwrap();
        let empty = store(&[]);

        let local = ReconciliationSession::new(&empty, config).unwrap();
        let remote = ReconciliationSession::new(&full, config).unwrap();
        let mut haves = Vec::new();
        let mut wants = Vec::new();
        let mut msg = local.initiate().unwrap();
        for _ in 0..MAX_ROUNDS {
            let Some(reply) = remote.reconcile(&msg).unwrap() else {
                break;
            };
            assert!(reply.len() <= config.frame_size_limit);
            match local.reconcile_with_ids(&reply, &mut haves, &mut wants).unwrap() {
                Some(next) => {
                    assert!(next.len() <= config.frame_size_limit);
                    msg = next;
                }
                None => break,
            }
        }
        assert_eq!(wants.len(), 2000);
        assert_eq!(wants.iter().collect::<BTreeSet<_>>().len(), 2000);
    }

    #[test]
    fn test_frame_limit_keeps_settled_ranges_closed() {
        let config = SessionConfig {
            frame_size_limit: 4096,
            id_list_threshold: 4,
        };
        let items: Vec<Item> = (0..400u64)
            .map(|i| Item::new(i, BlobId::digest(&i.to_be_bytes())))
            .collect();
        let full = SliceStore::from_items(items).unwrap();
        let session = ReconciliationSession::new(&full, config).unwrap();

        // Open and settled ranges of ten items each, alternating.
        let ranges: Vec<Range> = (1..40u64)
            .map(|i| Range {
                upper: Bound::Item {
                    timestamp: i * 10,
                    id_prefix: bytes::Bytes::new(),
                },
                mode: if i % 2 == 0 {
                    Mode::Skip
                } else {
                    Mode::Fingerprint(Accumulator::new().fingerprint())
                },
            })
            .collect();
        let msg = RangeMessage::new(ranges.clone()).encode().unwrap();

        let reply = session.reconcile(&msg).unwrap().unwrap();
        assert!(reply.len() <= config.frame_size_limit);
        let reply = RangeMessage::decode(&reply).unwrap();
        assert!(reply.ranges.iter().all(|r| !r.upper.is_infinity()));
        for settled in ranges.iter().filter(|r| r.mode == Mode::Skip) {
            assert!(reply.ranges.contains(settled), "reopened {:?}", settled.upper);
        }
    }

    #[test]
    fn test_malformed_message_fails_closed() {
        let b = store(&[(1, b"a")]);
        let session = ReconciliationSession::new(&b, SessionConfig::default()).unwrap();
        assert!(session.reconcile(b"\x00\x01garbage").is_err());

        let unordered = RangeMessage::new(vec![
            Range {
                upper: Bound::at(&Item::new(9, &b"z"[..])),
                mode: Mode::Skip,
            },
            Range {
                upper: Bound::at(&Item::new(3, &b"a"[..])),
                mode: Mode::IdList(vec![]),
            },
        ])
        .encode()
        .unwrap();
        assert!(matches!(
            session.reconcile(&unordered),
            Err(SyncError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_filtered_responder_hides_private_ids() {
        let mut scoped: Vec<ScopedItem> = (0..40u64)
            .map(|i| ScopedItem {
                item: Item::new(i, format!("pub-{i}").into_bytes()),
                private_to: vec![],
            })
            .collect();
        scoped.extend((0..40u64).map(|i| ScopedItem {
            item: Item::new(i, format!("secret-{i}").into_bytes()),
            private_to: vec![SpaceId::new("vault")],
        }));
        let responder = AuthorizedStore::from_scoped(scoped).unwrap();
        let stranger = responder.with_filter(std::iter::empty());
        let insider = responder.with_filter([SpaceId::new("vault")]);

        let empty = store(&[]);
        let seen = run(&empty, &stranger, SessionConfig::default());
        assert_eq!(seen.wants.len(), 40);
        assert!(seen
            .wants
            .iter()
            .all(|id| id.as_bytes().starts_with(b"pub-")));

        let seen = run(&empty, &insider, SessionConfig::default());
        assert_eq!(seen.wants.len(), 80);
    }

    proptest! {
        #[test]
        fn reconciliation_finds_symmetric_difference(
            shared in prop::collection::btree_set((0u64..10_000, any::<[u8; 8]>()), 0..300),
            only_a in prop::collection::btree_set((0u64..10_000, any::<[u8; 8]>()), 0..60),
            only_b in prop::collection::btree_set((0u64..10_000, any::<[u8; 8]>()), 0..60),
            threshold in 2usize..20,
        ) {
            let to_item = |(ts, id): &(u64, [u8; 8])| Item::new(*ts, id.to_vec());
            let a_items: BTreeSet<Item> = shared.iter().chain(&only_a).map(to_item).collect();
            let b_items: BTreeSet<Item> = shared.iter().chain(&only_b).map(to_item).collect();

            let a = SliceStore::from_items(a_items.iter().cloned()).unwrap();
            let b = SliceStore::from_items(b_items.iter().cloned()).unwrap();
            let config = SessionConfig { frame_size_limit: 0, id_list_threshold: threshold };
            let outcome = run(&a, &b, config);

            let a_ids: BTreeSet<BlobId> = a_items.iter().map(|i| i.id.clone()).collect();
            let b_ids: BTreeSet<BlobId> = b_items.iter().map(|i| i.id.clone()).collect();
            prop_assert_eq!(&outcome.haves, &(&a_ids - &b_ids));
            prop_assert_eq!(&outcome.wants, &(&b_ids - &a_ids));

            let n = a_items.len().max(b_items.len()).max(2) as f64;
            prop_assert!(outcome.rounds <= 2 * n.log2().ceil() as usize + 4);
        }
    }
}
