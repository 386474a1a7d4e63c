//! Block execution.
//!
//! Transactions execute sequentially and deterministically under one state
//! writer. Payment transactions are dispatched to the x402 engine, which
//! re-verifies and settles them atomically with the anti-replay write; a
//! failed settlement still yields a receipt (status 0) so callers can
//! observe the outcome. Two payments with the same `(from, nonce)` in one
//! block abort the block entirely.

use crate::error::{ConsensusError, ConsensusResult};
use splendor_state::ChainState;
use splendor_types::{
    Address, H256, PaymentOutcome, Receipt, Transaction,
};
use splendor_x402::{PaymentEnvelope, PaymentRequirements, X402Engine};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

/// The outcome of executing a block's transactions.
#[derive(Debug)]
pub struct ExecutedBlock {
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
}

/// Executes transaction lists against the chain state.
pub struct BlockExecutor {
    network: String,
}

/// Intrinsic gas charged for a legacy value transfer.
const TRANSFER_GAS: u64 = 21_000;

impl BlockExecutor {
    pub fn new(network: impl Into<String>) -> Self {
        Self { network: network.into() }
    }

    /// Execute `transactions` as the body of block `number`. On success the
    /// state is committed and receipts are returned; on a fatal error the
    /// state is untouched.
    #[instrument(skip_all, fields(number, txs = transactions.len()))]
    pub fn execute_block(
        &self,
        state: &ChainState,
        x402: &X402Engine,
        number: u64,
        timestamp: u64,
        validator: Address,
        transactions: &[Transaction],
    ) -> ConsensusResult<ExecutedBlock> {
        let mut writer = state.begin_block(number);
        let mut receipts = Vec::with_capacity(transactions.len());
        let mut gas_used = 0u64;
        let mut seen_nonces: HashSet<(Address, H256)> = HashSet::new();

        for (index, tx) in transactions.iter().enumerate() {
            let tx_hash = tx.hash();
            let receipt = match tx {
                Transaction::Payment(payload) => {
                    if !seen_nonces.insert((payload.from, payload.nonce)) {
                        return Err(ConsensusError::DuplicatePaymentNonce(payload.from));
                    }
                    let requirements =
                        PaymentRequirements::implied_by(payload, self.network.clone());
                    let envelope =
                        PaymentEnvelope::implied_by(payload.clone(), self.network.clone());

                    let outcome = PaymentOutcome {
                        payer: payload.from,
                        recipient: payload.to,
                        amount: payload.value,
                        nonce: payload.nonce,
                    };
                    match x402.settle_in_block(
                        &requirements,
                        &envelope,
                        &mut writer,
                        validator,
                        timestamp,
                    ) {
                        Ok(_) => Receipt {
                            tx_hash,
                            block_number: number,
                            tx_index: index as u32,
                            status: 1,
                            gas_used: 0,
                            logs: vec![],
                            payment: Some(outcome),
                        },
                        Err(reason) => {
                            warn!(%tx_hash, %reason, "payment settlement failed");
                            Receipt {
                                tx_hash,
                                block_number: number,
                                tx_index: index as u32,
                                status: 0,
                                gas_used: 0,
                                logs: vec![],
                                payment: Some(outcome),
                            }
                        }
                    }
                }
                Transaction::Legacy(legacy) => {
                    let status = match self.apply_legacy(&mut writer, legacy) {
                        Ok(()) => 1,
                        Err(e) => {
                            debug!(%tx_hash, error = %e, "legacy transfer failed");
                            0
                        }
                    };
                    gas_used += TRANSFER_GAS;
                    Receipt {
                        tx_hash,
                        block_number: number,
                        tx_index: index as u32,
                        status,
                        gas_used: TRANSFER_GAS,
                        logs: vec![],
                        payment: None,
                    }
                }
            };
            receipts.push(receipt);
        }

        writer.commit();
        Ok(ExecutedBlock { receipts, gas_used })
    }

    fn apply_legacy(
        &self,
        writer: &mut splendor_state::StateWriter<'_>,
        tx: &splendor_types::LegacyTransaction,
    ) -> Result<(), String> {
        let rec_id = tx.recovery_id().ok_or("invalid v")?;
        let mut sig = [0u8; 65];
        sig[..32].copy_from_slice(&tx.r);
        sig[32..64].copy_from_slice(&tx.s);
        sig[64] = rec_id;
        let sender = splendor_crypto::ecdsa::recover(&tx.signing_hash(), &sig)
            .map_err(|e| e.to_string())?;
        let to = tx.to.ok_or("contract creation unsupported")?;

        writer.bump_nonce(sender);
        writer.transfer(sender, to, tx.value).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splendor_crypto::ecdsa;
    use splendor_state::StateReader;
    use splendor_types::{LegacyTransaction, PaymentPayload};
    use splendor_x402::{sign_payload, X402Config};

    const PAYER_SECRET: [u8; 32] = [0x71u8; 32];
    const NOW: u64 = 1_760_000_000;
    const AMOUNT: u128 = 1_000_000_000_000_000;

    fn payer() -> Address {
        ecdsa::address_of(&PAYER_SECRET).unwrap()
    }

    fn recipient() -> Address {
        Address([0xd1; 20])
    }

    fn payment(nonce: u8) -> Transaction {
        let mut payload = PaymentPayload {
            from: payer(),
            to: recipient(),
            value: AMOUNT,
            valid_after: NOW - 10,
            valid_before: NOW + 300,
            nonce: H256([nonce; 32]),
            signature: vec![0u8; 65],
        };
        sign_payload(&mut payload, 1337, &PAYER_SECRET).unwrap();
        Transaction::Payment(payload)
    }

    fn setup() -> (ChainState, X402Engine, BlockExecutor) {
        let state = ChainState::new();
        state.set_balance(payer(), 10 * AMOUNT);
        let engine = X402Engine::new(X402Config::default(), 1337, "splendor");
        let executor = BlockExecutor::new("splendor");
        (state, engine, executor)
    }

    #[test]
    fn payment_execution_settles_and_receipts() {
        let (state, engine, executor) = setup();
        let tx = payment(1);
        let tx_hash = tx.hash();

        let executed = executor
            .execute_block(&state, &engine, 1, NOW, Address([0xee; 20]), &[tx])
            .unwrap();

        assert_eq!(executed.receipts.len(), 1);
        let receipt = &executed.receipts[0];
        assert_eq!(receipt.tx_hash, tx_hash);
        assert_eq!(receipt.status, 1);
        assert_eq!(receipt.gas_used, 0); // payments are unmetered
        let outcome = receipt.payment.as_ref().unwrap();
        assert_eq!(outcome.amount, AMOUNT);
        assert_eq!(outcome.payer, payer());

        assert_eq!(state.balance(&recipient()), AMOUNT);
        assert_eq!(state.height(), 1);
    }

    #[test]
    fn replayed_payment_fails_but_block_proceeds() {
        let (state, engine, executor) = setup();
        executor
            .execute_block(&state, &engine, 1, NOW, Address([0xee; 20]), &[payment(2)])
            .unwrap();

        // Same payload in a later block: settlement fails, receipt says so.
        let executed = executor
            .execute_block(&state, &engine, 2, NOW, Address([0xee; 20]), &[payment(2)])
            .unwrap();
        assert_eq!(executed.receipts[0].status, 0);
        // Only the first settlement moved funds.
        assert_eq!(state.balance(&recipient()), AMOUNT);
    }

    #[test]
    fn duplicate_nonce_in_one_block_is_fatal() {
        let (state, engine, executor) = setup();
        let err = executor
            .execute_block(
                &state,
                &engine,
                1,
                NOW,
                Address([0xee; 20]),
                &[payment(3), payment(3)],
            )
            .unwrap_err();
        assert!(matches!(err, ConsensusError::DuplicatePaymentNonce(_)));

        // The abort rolled back everything, including the first settlement.
        assert_eq!(state.balance(&recipient()), 0);
        assert_eq!(state.height(), 0);
    }

    #[test]
    fn legacy_transfer_moves_value_and_meters_gas() {
        let (state, engine, executor) = setup();
        let sender_secret = [0x81u8; 32];
        let sender = ecdsa::address_of(&sender_secret).unwrap();
        state.set_balance(sender, 1_000_000);

        let mut tx = LegacyTransaction {
            nonce: 0,
            gas_price: 1,
            gas_limit: TRANSFER_GAS,
            to: Some(Address([0xa7; 20])),
            value: 250_000,
            data: vec![],
            v: 0,
            r: [0; 32],
            s: [0; 32],
        };
        tx.v = 2 * 1337 + 35; // placeholder until signed
        let sig = ecdsa::sign_prehash(&sender_secret, &tx.signing_hash()).unwrap();
        tx.r.copy_from_slice(&sig[..32]);
        tx.s.copy_from_slice(&sig[32..64]);
        tx.v = 2 * 1337 + 35 + (sig[64] - 27) as u64;

        let executed = executor
            .execute_block(
                &state,
                &engine,
                1,
                NOW,
                Address([0xee; 20]),
                &[Transaction::Legacy(tx)],
            )
            .unwrap();

        assert_eq!(executed.receipts[0].status, 1);
        assert_eq!(executed.receipts[0].gas_used, TRANSFER_GAS);
        assert_eq!(executed.gas_used, TRANSFER_GAS);
        assert_eq!(state.balance(&Address([0xa7; 20])), 250_000);
        assert_eq!(state.balance(&sender), 750_000);
    }
}
