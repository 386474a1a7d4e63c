//! CPU implementations of the batch kernels.
//!
//! These are the fallback for every accelerator failure and the only path on
//! machines without a GPU. Results are bit-identical to the kernel contract:
//! items are hashed over at most one slot width, malformed signature items
//! mark their slot false instead of aborting the batch.

use crate::batch::{TxResult, HASH_SLOT_WIDTH, TX_SLOT_WIDTH};
use rayon::prelude::*;
use splendor_types::{H256, Transaction};

/// Keccak-256 each input, truncated to the hash slot width.
pub fn hash_batch(inputs: &[Vec<u8>]) -> Vec<H256> {
    inputs
        .par_iter()
        .map(|input| {
            let n = input.len().min(HASH_SLOT_WIDTH);
            H256::keccak(&input[..n])
        })
        .collect()
}

/// Verify secp256k1 signatures item by item.
///
/// Signatures are `{r, s}` (the recovery byte, if present, is ignored);
/// messages must be 32-byte prehashes; keys may be 65-byte uncompressed or
/// 64-byte raw. Anything else marks the item invalid.
pub fn verify_signatures_batch(
    signatures: &[Vec<u8>],
    messages: &[Vec<u8>],
    public_keys: &[Vec<u8>],
) -> Vec<bool> {
    signatures
        .par_iter()
        .zip(messages)
        .zip(public_keys)
        .map(|((sig, msg), key)| {
            if sig.len() < 64 || msg.len() != 32 {
                return false;
            }
            let Some(prehash) = H256::from_slice(msg) else {
                return false;
            };
            splendor_crypto::ecdsa::verify_prehash(key, &prehash, sig)
        })
        .collect()
}

/// Decode each raw transaction, truncated to the tx slot width, extracting
/// the cheap fields. Truncated or malformed bytes fail validly.
pub fn decode_transactions_batch(raw_txs: &[Vec<u8>]) -> Vec<TxResult> {
    raw_txs
        .par_iter()
        .map(|raw| {
            let n = raw.len().min(TX_SLOT_WIDTH);
            let slice = &raw[..n];
            match Transaction::decode(slice) {
                Ok(tx) => {
                    let (chain_id, nonce, tx_type) = match &tx {
                        Transaction::Legacy(legacy) => {
                            (legacy.chain_id().unwrap_or(0), legacy.nonce, 0x00)
                        }
                        Transaction::Payment(_) => (0, 0, splendor_types::PAYMENT_TX_TYPE),
                    };
                    TxResult {
                        hash: tx.hash(),
                        valid: true,
                        gas_used: tx.gas_limit(),
                        chain_id,
                        nonce,
                        tx_type,
                        error: None,
                    }
                }
                Err(e) => TxResult::invalid(H256::keccak(slice), e.to_string()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use splendor_types::{Address, LegacyTransaction};

    #[test]
    fn hash_batch_matches_direct_keccak() {
        let inputs = vec![b"alpha".to_vec(), b"beta".to_vec(), Vec::new()];
        let digests = hash_batch(&inputs);
        assert_eq!(digests[0], H256::keccak(b"alpha"));
        assert_eq!(digests[1], H256::keccak(b"beta"));
        assert_eq!(digests[2], H256::keccak(b""));
    }

    #[test]
    fn hash_batch_truncates_to_slot() {
        let long = vec![0xabu8; HASH_SLOT_WIDTH + 100];
        let digests = hash_batch(&[long.clone()]);
        assert_eq!(digests[0], H256::keccak(&long[..HASH_SLOT_WIDTH]));
    }

    #[test]
    fn malformed_signature_items_are_false_not_fatal() {
        let secret = [0x11u8; 32];
        let msg = H256::keccak(b"block payload");
        let sig = splendor_crypto::ecdsa::sign_prehash(&secret, &msg).unwrap();
        let key = splendor_crypto::ecdsa::public_key_of(&secret).unwrap();

        let results = verify_signatures_batch(
            &[sig.to_vec(), vec![0u8; 10], sig.to_vec()],
            &[msg.as_bytes().to_vec(), msg.as_bytes().to_vec(), vec![0u8; 16]],
            &[key.clone(), key.clone(), key],
        );
        assert_eq!(results, vec![true, false, false]);
    }

    #[test]
    fn decode_batch_handles_valid_and_garbage() {
        let tx = Transaction::Legacy(LegacyTransaction {
            nonce: 3,
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            to: Some(Address([9u8; 20])),
            value: 1,
            data: vec![],
            v: 2709,
            r: [1; 32],
            s: [2; 32],
        });
        let raw = tx.encode();
        let results = decode_transactions_batch(&[raw.clone(), vec![0xff, 0x00]]);

        assert!(results[0].valid);
        assert_eq!(results[0].hash, tx.hash());
        assert_eq!(results[0].gas_used, 21_000);
        assert_eq!(results[0].chain_id, 1337);
        assert_eq!(results[0].nonce, 3);
        assert!(!results[1].valid);
        assert!(results[1].error.is_some());
    }
}
