//! Slot packing for accelerator kernels.
//!
//! Kernels consume flat buffers of fixed-width slots plus a parallel `u32`
//! length array. Items longer than the slot width are truncated (the decode
//! kernels then fail those items validly); shorter items are zero-padded and
//! fully recoverable.

use splendor_types::H256;

/// Slot width for hash inputs.
pub const HASH_SLOT_WIDTH: usize = 256;

/// Slot width for raw transaction bytes.
pub const TX_SLOT_WIDTH: usize = 1024;

/// Byte stride of one transaction decode result record.
pub const TX_RESULT_STRIDE: usize = 64;

/// A packed slot buffer: flat zero-padded data plus per-item lengths.
pub struct SlotBuffer {
    pub data: Vec<u8>,
    pub lengths: Vec<u32>,
    /// Items whose input exceeded the slot width and were truncated.
    pub truncated: usize,
}

/// Pack items into `slot_width`-byte slots.
pub fn pack_slots(items: &[Vec<u8>], slot_width: usize, mut buf: Vec<u8>) -> SlotBuffer {
    let total = items.len() * slot_width;
    buf.clear();
    buf.resize(total, 0);

    let mut lengths = Vec::with_capacity(items.len());
    let mut truncated = 0;
    for (i, item) in items.iter().enumerate() {
        let n = item.len().min(slot_width);
        if item.len() > slot_width {
            truncated += 1;
        }
        buf[i * slot_width..i * slot_width + n].copy_from_slice(&item[..n]);
        lengths.push(n as u32);
    }

    SlotBuffer { data: buf, lengths, truncated }
}

/// Split a flat output buffer of 32-byte digests back into hashes.
pub fn unpack_digests(out: &[u8], count: usize) -> Vec<H256> {
    (0..count)
        .map(|i| {
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&out[i * 32..(i + 1) * 32]);
            H256(digest)
        })
        .collect()
}

/// Result of decoding one transaction in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub hash: H256,
    pub valid: bool,
    pub gas_used: u64,
    pub chain_id: u64,
    pub nonce: u64,
    pub tx_type: u8,
    pub error: Option<String>,
}

impl TxResult {
    /// Decode failure with no recovered fields.
    pub fn invalid(hash: H256, error: impl Into<String>) -> Self {
        Self {
            hash,
            valid: false,
            gas_used: 0,
            chain_id: 0,
            nonce: 0,
            tx_type: 0,
            error: Some(error.into()),
        }
    }

    /// Parse one 64-byte little-endian kernel record:
    /// `hash[0..32] valid[32] error_code[33] type[34] reserved[35..40]
    ///  gas[40..48] chain_id[48..56] nonce[56..64]`.
    pub fn from_record(record: &[u8]) -> Option<Self> {
        if record.len() != TX_RESULT_STRIDE {
            return None;
        }
        let hash = H256::from_slice(&record[..32])?;
        let valid = record[32] != 0;
        let error_code = record[33];
        let tx_type = record[34];
        let gas_used = u64::from_le_bytes(record[40..48].try_into().ok()?);
        let chain_id = u64::from_le_bytes(record[48..56].try_into().ok()?);
        let nonce = u64::from_le_bytes(record[56..64].try_into().ok()?);

        Some(Self {
            hash,
            valid: valid && error_code == 0,
            gas_used,
            chain_id,
            nonce,
            tx_type,
            error: if error_code != 0 {
                Some(format!("gpu transaction decode failed: code {error_code}"))
            } else {
                None
            },
        })
    }

    /// Encode into the kernel record layout (used by tests and the CPU path
    /// when exercising the record format end to end).
    pub fn to_record(&self) -> [u8; TX_RESULT_STRIDE] {
        let mut out = [0u8; TX_RESULT_STRIDE];
        out[..32].copy_from_slice(self.hash.as_bytes());
        out[32] = self.valid as u8;
        out[33] = if self.error.is_some() { 1 } else { 0 };
        out[34] = self.tx_type;
        out[40..48].copy_from_slice(&self.gas_used.to_le_bytes());
        out[48..56].copy_from_slice(&self.chain_id.to_le_bytes());
        out[56..64].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }
}
