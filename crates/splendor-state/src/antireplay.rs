//! The durable anti-replay registry for x402 payments.
//!
//! Consumed `(from, nonce)` pairs are stored on-chain as storage keys of a
//! reserved system address, so a pair can be settled at most once over the
//! whole chain lifetime. A process-level precheck set fronts the state lookup
//! for the mempool's benefit; it never authorises a settlement on its own.

use dashmap::DashSet;
use splendor_types::{Address, H256};

/// Reserved system address holding the anti-replay mapping. Stable: moving
/// it would reopen every consumed nonce.
pub const ANTI_REPLAY_ADDRESS: Address = Address([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x04, 0x02,
]);

/// Storage key for a `(from, nonce)` pair: `keccak(from || nonce)`.
/// Present iff consumed; the stored value is empty.
pub fn antireplay_key(from: &Address, nonce: &H256) -> H256 {
    let mut data = [0u8; 52];
    data[..20].copy_from_slice(from.as_bytes());
    data[20..].copy_from_slice(nonce.as_bytes());
    H256::keccak(&data)
}

/// In-memory precheck over `(from, nonce)` pairs.
///
/// Lifecycle: created at startup, cleared on shutdown. Only ever used to
/// reject obviously-replayed payloads early; the authoritative record is the
/// on-chain registry.
#[derive(Default)]
pub struct PrecheckSet {
    seen: DashSet<(Address, H256)>,
}

impl PrecheckSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, from: &Address, nonce: &H256) -> bool {
        self.seen.contains(&(*from, *nonce))
    }

    pub fn insert(&self, from: Address, nonce: H256) {
        self.seen.insert((from, nonce));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_both_parts() {
        let a = Address([1; 20]);
        let b = Address([2; 20]);
        let n1 = H256([1; 32]);
        let n2 = H256([2; 32]);

        assert_ne!(antireplay_key(&a, &n1), antireplay_key(&b, &n1));
        assert_ne!(antireplay_key(&a, &n1), antireplay_key(&a, &n2));
        assert_eq!(antireplay_key(&a, &n1), antireplay_key(&a, &n1));
    }

    #[test]
    fn precheck_tracks_pairs() {
        let set = PrecheckSet::new();
        let from = Address([3; 20]);
        let nonce = H256([4; 32]);

        assert!(!set.contains(&from, &nonce));
        set.insert(from, nonce);
        assert!(set.contains(&from, &nonce));

        set.clear();
        assert!(set.is_empty());
    }
}
