//! Test harness: an in-process chain with mempool, payment engine, and
//! block production, but no networking.

use splendor_consensus::{BlockExecutor, ChainParams, PqEngine, ValidatorKeyRegistry};
use splendor_crypto::ecdsa;
use splendor_mempool::{Mempool, MempoolConfig};
use splendor_state::{BlockStore, ChainState, StoredBlock};
use splendor_types::{Address, Header, PaymentPayload, Receipt, H256};
use splendor_x402::{
    sign_payload, PaymentEnvelope, PaymentRequirements, X402Config, X402Engine, SCHEME_EXACT,
    X402_VERSION,
};
use std::sync::Arc;

/// Test chain id, per the dev network.
pub const CHAIN_ID: u64 = 1337;

/// Test network name.
pub const NETWORK: &str = "splendor";

/// A fixed "now" so validity windows are deterministic.
pub const NOW: u64 = 1_780_000_000;

/// 0.001 native coin in wei (0x38d7ea4c68000).
pub const MILLI: u128 = 1_000_000_000_000_000;

/// An in-process node core.
pub struct TestChain {
    pub chain: Arc<ChainState>,
    pub store: Arc<BlockStore>,
    pub x402: Arc<X402Engine>,
    pub mempool: Arc<Mempool>,
    pub executor: BlockExecutor,
    pub engine: PqEngine,
    pub validator: Address,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with_config(X402Config::default())
    }

    pub fn with_config(x402_config: X402Config) -> Self {
        let chain = Arc::new(ChainState::new());
        let store = Arc::new(BlockStore::new());
        store.append(StoredBlock { header: Header::default(), transactions: vec![] }, vec![]);

        let x402 = Arc::new(X402Engine::new(x402_config, CHAIN_ID, NETWORK));
        let mempool =
            Arc::new(Mempool::new(MempoolConfig::default(), Arc::clone(&x402), Arc::clone(&chain)));
        let executor = BlockExecutor::new(NETWORK);
        let engine = PqEngine::new(
            ChainParams {
                chain_id: CHAIN_ID,
                network: NETWORK.to_string(),
                ..Default::default()
            },
            Arc::new(ValidatorKeyRegistry::new()),
        );

        Self {
            chain,
            store,
            x402,
            mempool,
            executor,
            engine,
            validator: Address([0xfe; 20]),
        }
    }

    pub fn fund(&self, address: Address, amount: u128) {
        self.chain.set_balance(address, amount);
    }

    pub fn balance(&self, address: &Address) -> u128 {
        use splendor_state::StateReader;
        self.chain.balance(address)
    }

    /// Produce the next block from everything currently pooled, returning
    /// its receipts.
    pub fn produce_block(&self) -> Vec<Receipt> {
        let transactions = self.mempool.take_for_block(1_000);
        let parent = self.store.best_header().expect("genesis present");
        let number = parent.number + 1;

        let executed = self
            .executor
            .execute_block(&self.chain, &self.x402, number, NOW, self.validator, &transactions)
            .expect("block execution");

        let tx_hashes: Vec<H256> = transactions.iter().map(|tx| tx.hash()).collect();
        let header = Header { parent_hash: parent.hash(), number, timestamp: NOW, ..Default::default() };
        self.store
            .append(StoredBlock { header, transactions }, executed.receipts.clone());
        self.mempool.remove_confirmed(&tx_hashes);
        executed.receipts
    }
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

/// A funded test account with its signing key.
pub struct TestAccount {
    pub secret: [u8; 32],
    pub address: Address,
}

impl TestAccount {
    pub fn new(seed: u8) -> Self {
        let secret = [seed; 32];
        let address = ecdsa::address_of(&secret).expect("valid secret");
        Self { secret, address }
    }
}

/// Requirements demanding exactly `amount` to `pay_to`.
pub fn requirements(amount: u128, pay_to: Address) -> PaymentRequirements {
    PaymentRequirements {
        scheme: SCHEME_EXACT.to_string(),
        network: NETWORK.to_string(),
        max_amount_required: amount,
        resource: "/api/data".to_string(),
        description: "test resource".to_string(),
        mime_type: "application/json".to_string(),
        pay_to,
        max_timeout_seconds: 300,
        asset: Address::ZERO,
    }
}

/// A signed payment envelope from `payer` over the given window.
pub fn signed_envelope(
    payer: &TestAccount,
    to: Address,
    amount: u128,
    valid_after: u64,
    valid_before: u64,
    nonce: H256,
    chain_id: u64,
) -> PaymentEnvelope {
    let mut payload = PaymentPayload {
        from: payer.address,
        to,
        value: amount,
        valid_after,
        valid_before,
        nonce,
        signature: vec![0u8; 65],
    };
    sign_payload(&mut payload, chain_id, &payer.secret).expect("signing");
    PaymentEnvelope {
        x402_version: X402_VERSION,
        scheme: SCHEME_EXACT.to_string(),
        network: NETWORK.to_string(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_produces_empty_blocks() {
        let chain = TestChain::new();
        let receipts = chain.produce_block();
        assert!(receipts.is_empty());
        assert_eq!(chain.store.best_number(), Some(1));
    }
}
