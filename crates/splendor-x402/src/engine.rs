//! Payment verification and settlement.

use crate::message::recover_signer;
use crate::reason::InvalidReason;
use crate::revenue::RevenueTracker;
use crate::types::{PaymentEnvelope, PaymentRequirements, VerificationResponse, SCHEME_EXACT};
use serde::{Deserialize, Serialize};
use splendor_state::{antireplay_key, PrecheckSet, StateReader, StateWriter, ANTI_REPLAY_ADDRESS};
use splendor_types::{Address, H256};
use std::sync::Arc;
use tracing::{debug, instrument};

/// x402 subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct X402Config {
    pub enabled: bool,
    /// Bounds enforced by the RPC surface on `maxAmountRequired`, in wei,
    /// hex-encoded in config files.
    #[serde(with = "hex_wei")]
    pub min_payment: u128,
    #[serde(with = "hex_wei")]
    pub max_payment: u128,
    pub settlement_timeout_secs: u64,
    pub rate_limiting: bool,
    pub max_requests_per_minute: u32,
    /// Strict validation accepts only the chain-bound (v2) message form.
    pub strict_signature_validation: bool,
    pub enable_anti_replay: bool,
}

impl Default for X402Config {
    fn default() -> Self {
        Self {
            enabled: true,
            min_payment: 1,
            max_payment: u128::MAX,
            settlement_timeout_secs: 300,
            rate_limiting: false,
            max_requests_per_minute: 600,
            strict_signature_validation: true,
            enable_anti_replay: true,
        }
    }
}

mod hex_wei {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        splendor_types::parse_hex_u128(&s).map_err(de::Error::custom)
    }
}

/// Balance and nonce-consumption reads needed for payment checks; satisfied
/// by snapshots on the RPC path and by the block writer during settlement.
pub trait PaymentStateView {
    fn balance_of(&self, address: &Address) -> u128;
    fn nonce_consumed(&self, from: &Address, nonce: &H256) -> bool;
}

impl<T: StateReader + ?Sized> PaymentStateView for &T {
    fn balance_of(&self, address: &Address) -> u128 {
        self.balance(address)
    }

    fn nonce_consumed(&self, from: &Address, nonce: &H256) -> bool {
        self.storage_contains(&ANTI_REPLAY_ADDRESS, &antireplay_key(from, nonce))
    }
}

impl PaymentStateView for StateWriter<'_> {
    fn balance_of(&self, address: &Address) -> u128 {
        self.balance(address)
    }

    fn nonce_consumed(&self, from: &Address, nonce: &H256) -> bool {
        self.storage_contains(&ANTI_REPLAY_ADDRESS, &antireplay_key(from, nonce))
    }
}

/// The payment engine: stateless verification rules plus settlement applied
/// under the block executor's state writer.
pub struct X402Engine {
    config: X402Config,
    chain_id: u64,
    network: String,
    precheck: Arc<PrecheckSet>,
    revenue: RevenueTracker,
}

impl X402Engine {
    pub fn new(config: X402Config, chain_id: u64, network: impl Into<String>) -> Self {
        Self {
            config,
            chain_id,
            network: network.into(),
            precheck: Arc::new(PrecheckSet::new()),
            revenue: RevenueTracker::new(),
        }
    }

    pub fn config(&self) -> &X402Config {
        &self.config
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn revenue(&self) -> &RevenueTracker {
        &self.revenue
    }

    /// Supported `(scheme, network)` pairs for `x402_supported`.
    pub fn supported(&self) -> Vec<(String, String)> {
        vec![(SCHEME_EXACT.to_string(), self.network.clone())]
    }

    /// Verify a payment payload against the given state view. Read-only.
    pub fn verify(
        &self,
        requirements: &PaymentRequirements,
        envelope: &PaymentEnvelope,
        state: &impl PaymentStateView,
        now: u64,
    ) -> VerificationResponse {
        match self.validate(requirements, envelope, state, now) {
            Ok(payer) => VerificationResponse::valid(payer),
            Err(reason) => VerificationResponse::invalid(reason),
        }
    }

    /// The ordered verification rules; first failure wins. Typed form of
    /// [`Self::verify`] for callers that branch on the reason.
    pub fn validate(
        &self,
        requirements: &PaymentRequirements,
        envelope: &PaymentEnvelope,
        state: &impl PaymentStateView,
        now: u64,
    ) -> Result<Address, InvalidReason> {
        let payload = &envelope.payload;

        // 1. Scheme and network.
        if requirements.scheme != SCHEME_EXACT || envelope.scheme != requirements.scheme {
            return Err(InvalidReason::UnsupportedScheme);
        }
        if requirements.network != self.network || envelope.network != self.network {
            return Err(InvalidReason::UnsupportedNetwork);
        }

        // 2. Validity window.
        if now < payload.valid_after {
            return Err(InvalidReason::NotYetValid);
        }
        if now > payload.valid_before {
            return Err(InvalidReason::Expired);
        }

        // 3. Signature recovers to the declared payer.
        let payer = recover_signer(
            payload,
            self.chain_id,
            self.config.strict_signature_validation,
        )
        .ok_or(InvalidReason::InvalidSignature)?;

        // 4. Funds.
        if state.balance_of(&payer) < payload.value {
            return Err(InvalidReason::InsufficientBalance);
        }

        // 5. Exact scheme: the payment is the required amount, not a bound.
        if payload.value != requirements.max_amount_required {
            return Err(InvalidReason::AmountMismatch);
        }

        // 6. Recipient.
        if payload.to != requirements.pay_to {
            return Err(InvalidReason::RecipientMismatch);
        }

        // 7. Replay. The precheck set short-circuits known-consumed pairs;
        // the on-chain registry is authoritative.
        if self.config.enable_anti_replay {
            if self.precheck.contains(&payload.from, &payload.nonce)
                || state.nonce_consumed(&payload.from, &payload.nonce)
            {
                return Err(InvalidReason::NonceReused);
            }
        }

        Ok(payer)
    }

    /// Settle a verified payment inside the block executor.
    ///
    /// Verification is re-run against the writer's view of state; on any
    /// failure nothing is recorded and no balance moves. On success the
    /// `(from, nonce)` pair is written to the on-chain registry and `value`
    /// moves from payer to recipient. No fee is taken, no gas is metered.
    #[instrument(skip_all, fields(payer = %envelope.payload.from, value = envelope.payload.value))]
    pub fn settle_in_block(
        &self,
        requirements: &PaymentRequirements,
        envelope: &PaymentEnvelope,
        writer: &mut StateWriter<'_>,
        validator: Address,
        now: u64,
    ) -> Result<Address, InvalidReason> {
        let payer = self.validate(requirements, envelope, &*writer, now)?;
        let payload = &envelope.payload;

        // Balance was checked under this same writer.
        writer
            .transfer(payload.from, payload.to, payload.value)
            .map_err(|_| InvalidReason::InsufficientBalance)?;

        if self.config.enable_anti_replay {
            writer.set_storage(
                ANTI_REPLAY_ADDRESS,
                antireplay_key(&payload.from, &payload.nonce),
                Vec::new(),
            );
            self.precheck.insert(payload.from, payload.nonce);
        }

        self.revenue.record_settlement(validator, payload.value);
        debug!(recipient = %payload.to, "x402 payment settled");
        Ok(payer)
    }

    /// Clear process-level caches on shutdown. On-chain state is unaffected.
    pub fn shutdown(&self) {
        self.precheck.clear();
    }
}
