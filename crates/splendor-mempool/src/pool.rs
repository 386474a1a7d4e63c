//! Pool implementation.

use crate::error::{MempoolError, MempoolResult};
use crate::{DEFAULT_MAX_TXS, DEFAULT_TX_EXPIRY_SECS};
use dashmap::DashMap;
use parking_lot::RwLock;
use splendor_state::ChainState;
use splendor_types::{Address, Transaction, H256};
use splendor_x402::{PaymentEnvelope, PaymentRequirements, X402Engine};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Mempool configuration.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    pub max_transactions: usize,
    pub tx_expiry_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { max_transactions: DEFAULT_MAX_TXS, tx_expiry_secs: DEFAULT_TX_EXPIRY_SECS }
    }
}

/// A pooled transaction with arrival metadata.
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    pub tx: Transaction,
    pub hash: H256,
    pub arrival_time: u64,
}

/// Pool statistics.
#[derive(Debug, Clone, Default)]
pub struct MempoolStats {
    pub tx_count: usize,
    pub payment_count: usize,
}

/// The transaction pool.
pub struct Mempool {
    config: MempoolConfig,
    x402: Arc<X402Engine>,
    state: Arc<ChainState>,
    transactions: DashMap<H256, PooledTransaction>,
    /// `(from, nonce)` of pooled payments, mirroring the anti-replay rule.
    nonce_index: DashMap<(Address, H256), H256>,
    arrival_order: RwLock<VecDeque<H256>>,
}

impl Mempool {
    pub fn new(config: MempoolConfig, x402: Arc<X402Engine>, state: Arc<ChainState>) -> Self {
        Self {
            config,
            x402,
            state,
            transactions: DashMap::new(),
            nonce_index: DashMap::new(),
            arrival_order: RwLock::new(VecDeque::new()),
        }
    }

    /// Admit a transaction. Payments run the full x402 verification against
    /// a current state snapshot and must be valid; anything already pooled
    /// with the same `(from, nonce)` is refused outright.
    #[instrument(skip(self, tx), fields(hash = %tx.hash()))]
    pub fn add(&self, tx: Transaction, now: u64) -> MempoolResult<H256> {
        let hash = tx.hash();
        if self.transactions.contains_key(&hash) {
            return Err(MempoolError::AlreadyExists(hash.to_string()));
        }
        if self.transactions.len() >= self.config.max_transactions {
            return Err(MempoolError::PoolFull { count: self.transactions.len() });
        }

        if let Transaction::Payment(payload) = &tx {
            let pair = (payload.from, payload.nonce);
            if self.nonce_index.contains_key(&pair) {
                return Err(MempoolError::NonceConflict);
            }

            let requirements =
                PaymentRequirements::implied_by(payload, self.x402.network().to_string());
            let envelope =
                PaymentEnvelope::implied_by(payload.clone(), self.x402.network().to_string());
            let snapshot = self.state.snapshot();
            self.x402
                .validate(&requirements, &envelope, &(&snapshot), now)
                .map_err(MempoolError::InvalidPayment)?;
            self.nonce_index.insert(pair, hash);
        }

        self.transactions.insert(hash, PooledTransaction { tx, hash, arrival_time: now });
        self.arrival_order.write().push_back(hash);
        debug!(count = self.transactions.len(), "transaction added to mempool");
        Ok(hash)
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn get(&self, hash: &H256) -> Option<PooledTransaction> {
        self.transactions.get(hash).map(|e| e.clone())
    }

    /// Transactions for the next block, oldest first. Pool-level nonce
    /// uniqueness guarantees the block builder never emits two payments with
    /// the same `(from, nonce)`.
    pub fn take_for_block(&self, limit: usize) -> Vec<Transaction> {
        let order = self.arrival_order.read();
        order
            .iter()
            .filter_map(|hash| self.transactions.get(hash).map(|e| e.tx.clone()))
            .take(limit)
            .collect()
    }

    /// Drop transactions included in a block.
    pub fn remove_confirmed(&self, hashes: &[H256]) {
        for hash in hashes {
            self.remove(hash);
        }
    }

    fn remove(&self, hash: &H256) -> Option<PooledTransaction> {
        let (_, pooled) = self.transactions.remove(hash)?;
        if let Transaction::Payment(payload) = &pooled.tx {
            self.nonce_index.remove(&(payload.from, payload.nonce));
        }
        self.arrival_order.write().retain(|h| h != hash);
        Some(pooled)
    }

    /// Drop transactions past their TTL, and payments past `validBefore`
    /// (their natural timeout).
    pub fn remove_expired(&self, now: u64) {
        let expiry = self.config.tx_expiry_secs;
        let stale: Vec<H256> = self
            .transactions
            .iter()
            .filter(|e| {
                let ttl_expired = now.saturating_sub(e.arrival_time) > expiry;
                let window_expired = match &e.tx {
                    Transaction::Payment(p) => now > p.valid_before,
                    Transaction::Legacy(_) => false,
                };
                ttl_expired || window_expired
            })
            .map(|e| *e.key())
            .collect();
        for hash in stale {
            self.remove(&hash);
            debug!(%hash, "expired transaction dropped");
        }
    }

    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            tx_count: self.transactions.len(),
            payment_count: self.nonce_index.len(),
        }
    }

    pub fn clear(&self) {
        self.transactions.clear();
        self.nonce_index.clear();
        self.arrival_order.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splendor_crypto::ecdsa;
    use splendor_types::PaymentPayload;
    use splendor_x402::{sign_payload, X402Config};

    const PAYER_SECRET: [u8; 32] = [0x91u8; 32];
    const NOW: u64 = 1_770_000_000;
    const AMOUNT: u128 = 1_000_000_000_000_000;

    fn payer() -> Address {
        ecdsa::address_of(&PAYER_SECRET).unwrap()
    }

    fn payment(nonce: u8) -> Transaction {
        let mut payload = PaymentPayload {
            from: payer(),
            to: Address([0xc4; 20]),
            value: AMOUNT,
            valid_after: NOW - 5,
            valid_before: NOW + 300,
            nonce: H256([nonce; 32]),
            signature: vec![0u8; 65],
        };
        sign_payload(&mut payload, 1337, &PAYER_SECRET).unwrap();
        Transaction::Payment(payload)
    }

    fn pool() -> Mempool {
        let state = Arc::new(ChainState::new());
        state.set_balance(payer(), 100 * AMOUNT);
        let x402 = Arc::new(X402Engine::new(X402Config::default(), 1337, "splendor"));
        Mempool::new(MempoolConfig::default(), x402, state)
    }

    #[test]
    fn valid_payment_is_admitted() {
        let pool = pool();
        let hash = pool.add(payment(1), NOW).unwrap();
        assert!(pool.contains(&hash));
        assert_eq!(pool.stats().payment_count, 1);
    }

    #[test]
    fn duplicate_hash_and_nonce_are_refused() {
        let pool = pool();
        let tx = payment(2);
        pool.add(tx.clone(), NOW).unwrap();

        assert!(matches!(pool.add(tx, NOW), Err(MempoolError::AlreadyExists(_))));

        // Different payload, same (from, nonce): still refused.
        let mut conflicting = match payment(2) {
            Transaction::Payment(p) => p,
            _ => unreachable!(),
        };
        conflicting.valid_before += 1;
        sign_payload(&mut conflicting, 1337, &PAYER_SECRET).unwrap();
        assert_eq!(
            pool.add(Transaction::Payment(conflicting), NOW),
            Err(MempoolError::NonceConflict)
        );
    }

    #[test]
    fn invalid_payment_is_refused_with_reason() {
        let pool = pool();
        let mut payload = match payment(3) {
            Transaction::Payment(p) => p,
            _ => unreachable!(),
        };
        payload.valid_before = NOW - 1;
        sign_payload(&mut payload, 1337, &PAYER_SECRET).unwrap();

        let err = pool.add(Transaction::Payment(payload), NOW).unwrap_err();
        assert_eq!(err, MempoolError::InvalidPayment(splendor_x402::InvalidReason::Expired));
    }

    #[test]
    fn block_selection_preserves_arrival_order() {
        let pool = pool();
        let h1 = pool.add(payment(4), NOW).unwrap();
        let h2 = pool.add(payment(5), NOW + 1).unwrap();
        let h3 = pool.add(payment(6), NOW + 2).unwrap();

        let selected = pool.take_for_block(2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].hash(), h1);
        assert_eq!(selected[1].hash(), h2);

        pool.remove_confirmed(&[h1, h2]);
        let rest = pool.take_for_block(10);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].hash(), h3);
        // Confirmed payments release their nonce slots.
        assert_eq!(pool.stats().payment_count, 1);
    }

    #[test]
    fn expiry_honours_ttl_and_validity_window() {
        let pool = pool();
        pool.add(payment(7), NOW).unwrap();

        // Not yet expired.
        pool.remove_expired(NOW + 10);
        assert_eq!(pool.stats().tx_count, 1);

        // validBefore (NOW + 300) passes before the 1h TTL.
        pool.remove_expired(NOW + 301);
        assert_eq!(pool.stats().tx_count, 0);
    }

    #[test]
    fn pool_full_refuses_new_transactions() {
        let state = Arc::new(ChainState::new());
        state.set_balance(payer(), 100 * AMOUNT);
        let x402 = Arc::new(X402Engine::new(X402Config::default(), 1337, "splendor"));
        let pool = Mempool::new(
            MempoolConfig { max_transactions: 2, ..Default::default() },
            x402,
            state,
        );

        pool.add(payment(8), NOW).unwrap();
        pool.add(payment(9), NOW).unwrap();
        assert!(matches!(pool.add(payment(10), NOW), Err(MempoolError::PoolFull { .. })));
    }
}
