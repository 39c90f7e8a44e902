//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use bytes::Bytes;
use proptest::prelude::*;

use hypersync_core::{BlobId, Iri, Item, SpaceId};
use hypersync_store::{Blob, ScopedItem};

/// Generate a random 32-byte BlobId.
pub fn blob_id() -> impl Strategy<Value = BlobId> {
    any::<[u8; 32]>().prop_map(|b| BlobId::from_bytes(b.to_vec()))
}

/// Generate a usable timestamp. `u64::MAX` is reserved for the open bound.
pub fn timestamp() -> impl Strategy<Value = u64> {
    0u64..=1_700_000_000_000u64
}

/// Generate a reconciliation item.
pub fn item() -> impl Strategy<Value = Item> {
    (timestamp(), blob_id()).prop_map(|(ts, id)| Item { timestamp: ts, id })
}

/// Generate a set of up to `max` distinct items.
pub fn item_set(max: usize) -> impl Strategy<Value = BTreeSet<Item>> {
    prop::collection::btree_set(item(), 0..=max)
}

/// Generate a space name.
pub fn space() -> impl Strategy<Value = SpaceId> {
    prop_oneof![
        Just(SpaceId::new("alice")),
        Just(SpaceId::new("bob")),
        Just(SpaceId::new("carol")),
    ]
}

/// Generate a resource IRI below `space`, at most three segments deep.
pub fn iri_in(space: &'static str) -> impl Strategy<Value = Iri> {
    prop::collection::vec(any::<[u8; 2]>(), 0..=3).prop_map(move |segments| {
        let mut s = format!("hm://{}", space);
        for seg in segments {
            s.push('/');
            s.push_str(&hex::encode(seg));
        }
        Iri::parse(&s).expect("hex segments form a valid IRI")
    })
}

/// Generate a blob below `space` with up to `max_len` bytes of data.
pub fn blob_in(space: &'static str, max_len: usize) -> impl Strategy<Value = Blob> {
    (iri_in(space), timestamp(), payload(max_len)).prop_map(|(iri, ts, data)| {
        Blob::new(iri, ts, Bytes::from(data))
    })
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_len.max(1))
}

/// Generate an item that is public or restricted to one or two spaces.
pub fn scoped_item() -> impl Strategy<Value = ScopedItem> {
    (item(), prop::collection::btree_set(space(), 0..=2)).prop_map(|(item, spaces)| ScopedItem {
        item,
        private_to: spaces.into_iter().collect(),
    })
}

/// Two item sets sharing a common core.
#[derive(Debug, Clone)]
pub struct DivergedSets {
    /// Items held by both sides.
    pub shared: BTreeSet<Item>,
    /// Items only the first side holds.
    pub only_a: BTreeSet<Item>,
    /// Items only the second side holds.
    pub only_b: BTreeSet<Item>,
}

impl DivergedSets {
    /// Everything the first side holds.
    pub fn a(&self) -> Vec<Item> {
        self.shared.iter().chain(&self.only_a).cloned().collect()
    }

    /// Everything the second side holds.
    pub fn b(&self) -> Vec<Item> {
        self.shared.iter().chain(&self.only_b).cloned().collect()
    }

    /// Ids the first side has and the second lacks.
    pub fn a_minus_b(&self) -> BTreeSet<BlobId> {
        ids(&self.only_a).difference(&ids(&self.shared)).cloned().collect()
    }

    /// Ids the second side has and the first lacks.
    pub fn b_minus_a(&self) -> BTreeSet<BlobId> {
        ids(&self.only_b).difference(&ids(&self.shared)).cloned().collect()
    }
}

fn ids(items: &BTreeSet<Item>) -> BTreeSet<BlobId> {
    items.iter().map(|i| i.id.clone()).collect()
}

/// Generate two sets with up to `shared` common items and up to `diff`
/// items unique to each side.
pub fn diverged_sets(shared: usize, diff: usize) -> impl Strategy<Value = DivergedSets> {
    (item_set(shared), item_set(diff), item_set(diff)).prop_map(|(shared, only_a, only_b)| {
        // Keep the one-sided sets disjoint.
        let only_b: BTreeSet<Item> = only_b.difference(&only_a).cloned().collect();
        DivergedSets {
            shared,
            only_a,
            only_b,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::reconcile_stores;
    use hypersync_perms::AuthorizedStore;
    use hypersync_store::SliceStore;
    use hypersync_sync::SessionConfig;

    proptest! {
        #[test]
        fn test_reconciliation_finds_difference(sets in diverged_sets(200, 40)) {
            let a = SliceStore::from_items(sets.a()).unwrap();
            let b = SliceStore::from_items(sets.b()).unwrap();

            let outcome = reconcile_stores(&a, &b, SessionConfig::default()).unwrap();
            prop_assert_eq!(outcome.haves, sets.a_minus_b());
            prop_assert_eq!(outcome.wants, sets.b_minus_a());
        }

        #[test]
        fn test_small_frames_still_converge(sets in diverged_sets(300, 20)) {
            let a = SliceStore::from_items(sets.a()).unwrap();
            let b = SliceStore::from_items(sets.b()).unwrap();
            let config = SessionConfig {
                frame_size_limit: 4096,
                id_list_threshold: 4,
            };

            let outcome = reconcile_stores(&a, &b, config).unwrap();
            prop_assert_eq!(outcome.wants, sets.b_minus_a());
        }

        #[test]
        fn test_responder_never_leaks_unauthorized_items(
            items in prop::collection::vec(scoped_item(), 0..150),
            reader in space(),
        ) {
            let full = AuthorizedStore::from_scoped(items.clone()).unwrap();
            let view = full.with_filter([reader.clone()]);
            let empty = SliceStore::from_items(Vec::<Item>::new()).unwrap();

            let outcome = reconcile_stores(&empty, &view, SessionConfig::default()).unwrap();
            let allowed: BTreeSet<BlobId> = items
                .iter()
                .filter(|s| s.private_to.is_empty() || s.private_to.contains(&reader))
                .map(|s| s.item.id.clone())
                .collect();
            prop_assert_eq!(outcome.wants, allowed);
        }

        #[test]
        fn test_generated_blobs_stay_in_space(blob in blob_in("alice", 64)) {
            prop_assert_eq!(blob.resource.space(), SpaceId::new("alice"));
            prop_assert_eq!(blob.id, BlobId::digest(&blob.data));
        }
    }
}
