//! Block headers.

use crate::rlp;
use crate::{Address, H256};
use serde::{Deserialize, Serialize};

/// Fixed vanity prefix length at the start of the header extra field.
pub const EXTRA_VANITY: usize = 32;

/// ECDSA seal length at the end of the header extra field.
pub const EXTRA_SEAL: usize = 65;

/// A block header.
///
/// The `extra` field carries, in order: 32 bytes of vanity, the checkpoint
/// signer list (checkpoint blocks only), an optional post-quantum seal in TLV
/// form, and the 65-byte ECDSA seal. The consensus crate owns the layout; the
/// header only stores the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
    pub tx_root: H256,
    pub receipt_root: H256,
    pub difficulty: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    #[serde(with = "hex_bytes")]
    pub extra: Vec<u8>,
    pub mix_digest: H256,
    pub nonce: u64,
}

impl Header {
    /// Hash of the complete header including the sealed extra field.
    pub fn hash(&self) -> H256 {
        H256::keccak(&self.rlp_encode(&self.extra))
    }

    /// The hash signed by both the ECDSA and ML-DSA seals.
    ///
    /// `unsealed_extra` must be the extra field with every seal stripped
    /// (vanity plus checkpoint signer list only); including seal bytes here
    /// would make the signature cover itself.
    pub fn seal_hash(&self, unsealed_extra: &[u8]) -> H256 {
        H256::keccak(&self.rlp_encode(unsealed_extra))
    }

    fn rlp_encode(&self, extra: &[u8]) -> Vec<u8> {
        let mut items = Vec::with_capacity(13);
        items.push(rlp_bytes(self.parent_hash.as_bytes()));
        items.push(rlp_bytes(self.coinbase.as_bytes()));
        items.push(rlp_bytes(self.state_root.as_bytes()));
        items.push(rlp_bytes(self.tx_root.as_bytes()));
        items.push(rlp_bytes(self.receipt_root.as_bytes()));
        items.push(rlp_uint(self.difficulty as u128));
        items.push(rlp_uint(self.number as u128));
        items.push(rlp_uint(self.gas_limit as u128));
        items.push(rlp_uint(self.gas_used as u128));
        items.push(rlp_uint(self.timestamp as u128));
        items.push(rlp_bytes(extra));
        items.push(rlp_bytes(self.mix_digest.as_bytes()));
        items.push(rlp_uint(self.nonce as u128));
        rlp::encode_list(&items)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: H256::ZERO,
            coinbase: Address::ZERO,
            state_root: H256::ZERO,
            tx_root: H256::ZERO,
            receipt_root: H256::ZERO,
            difficulty: 1,
            number: 0,
            gas_limit: 30_000_000,
            gas_used: 0,
            timestamp: 0,
            extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
            mix_digest: H256::ZERO,
            nonce: 0,
        }
    }
}

fn rlp_bytes(b: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    rlp::encode_bytes(&mut out, b);
    out
}

fn rlp_uint(v: u128) -> Vec<u8> {
    let mut out = Vec::new();
    rlp::encode_uint(&mut out, v);
    out
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)
    }
}
