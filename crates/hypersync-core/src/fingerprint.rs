//! Range fingerprints.
//!
//! A fingerprint summarizes a set of items so that two peers can tell
//! whether their ranges match without exchanging them. The accumulator
//! adds the Blake3 hash of every id modulo 2^256, so the result does not
//! depend on iteration order, and then binds the element count.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::item::Item;
use crate::types::BlobId;

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 16;

/// Domain separator for fingerprint hashing.
const FINGERPRINT_DOMAIN: &[u8] = b"hypersync-fp-v1:";

/// Digest of a range of items.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Fingerprint of the empty range.
    pub fn empty() -> Self {
        Accumulator::new().fingerprint()
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Incremental, order-independent fingerprint builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    sum: [u8; 32],
    count: u64,
}

impl Accumulator {
    /// Start an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one id.
    pub fn add_id(&mut self, id: &BlobId) {
        let hash = blake3::hash(id.as_bytes());
        add_mod_256(&mut self.sum, hash.as_bytes());
        self.count += 1;
    }

    /// Add one item.
    pub fn add(&mut self, item: &Item) {
        self.add_id(&item.id);
    }

    /// Merge another accumulator into this one.
    pub fn merge(&mut self, other: &Accumulator) {
        add_mod_256(&mut self.sum, &other.sum);
        self.count += other.count;
    }

    /// Number of ids added so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Finish into a fingerprint. The accumulator stays usable.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(&self.sum);
        hasher.update(&self.count.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&digest.as_bytes()[..FINGERPRINT_LEN]);
        Fingerprint(out)
    }
}

/// Little-endian 256-bit addition, discarding the final carry.
fn add_mod_256(acc: &mut [u8; 32], value: &[u8; 32]) {
    let mut carry = 0u16;
    for (a, v) in acc.iter_mut().zip(value) {
        let sum = *a as u16 + *v as u16 + carry;
        *a = sum as u8;
        carry = sum >> 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_fingerprint_is_stable() {
        assert_eq!(Fingerprint::empty(), Accumulator::new().fingerprint());
    }

    #[test]
    fn test_count_changes_fingerprint() {
        let mut one = Accumulator::new();
        one.add_id(&BlobId::from_static(b"a"));
        assert_ne!(one.fingerprint(), Fingerprint::empty());
    }

    #[test]
    fn test_carry_wraps_around() {
        let mut acc = [0xff; 32];
        add_mod_256(&mut acc, &{
            let mut one = [0u8; 32];
            one[0] = 1;
            one
        });
        assert_eq!(acc, [0u8; 32]);
    }

    #[test]
    fn test_merge_equals_sequential_add() {
        let ids: Vec<BlobId> = (0u8..10).map(|i| BlobId::from_bytes(vec![i])).collect();
        let mut all = Accumulator::new();
        let mut left = Accumulator::new();
        let mut right = Accumulator::new();
        for (i, id) in ids.iter().enumerate() {
            all.add_id(id);
            if i < 4 {
                left.add_id(id);
            } else {
                right.add_id(id);
            }
        }
        left.merge(&right);
        assert_eq!(left, all);
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_order(mut ids in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..40), 0..50)) {
            let mut forward = Accumulator::new();
            for id in &ids {
                forward.add_id(&BlobId::from_bytes(id.clone()));
            }
            ids.reverse();
            let mut backward = Accumulator::new();
            for id in &ids {
                backward.add_id(&BlobId::from_bytes(id.clone()));
            }
            prop_assert_eq!(forward.fingerprint(), backward.fingerprint());
        }
    }
}
