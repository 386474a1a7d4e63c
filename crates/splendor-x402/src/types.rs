//! Wire types for the x402 verify/settle surface.

use serde::{Deserialize, Serialize};
use splendor_types::{Address, PaymentPayload, H256};

/// Protocol version carried in 402 response bodies and payment envelopes.
pub const X402_VERSION: u32 = 1;

/// The only payment scheme this node implements: the payer transfers exactly
/// `maxAmountRequired`, no over- or underpayment.
pub const SCHEME_EXACT: &str = "exact";

/// What a resource server demands before serving a protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Exact amount due, in wei, hex-encoded.
    #[serde(with = "hex_amount")]
    pub max_amount_required: u128,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub pay_to: Address,
    #[serde(default = "default_timeout")]
    pub max_timeout_seconds: u64,
    /// Zero address denotes the native coin.
    #[serde(default)]
    pub asset: Address,
}

impl PaymentRequirements {
    /// Requirements implied by a payload already committed to a typed
    /// transaction. The consensus-level body is authoritative at execution
    /// time, so amount and recipient come straight from the payload; the
    /// remaining rules (window, signature, funds, replay) still bite.
    pub fn implied_by(payload: &PaymentPayload, network: impl Into<String>) -> Self {
        Self {
            scheme: SCHEME_EXACT.to_string(),
            network: network.into(),
            max_amount_required: payload.value,
            resource: String::new(),
            description: String::new(),
            mime_type: default_mime_type(),
            pay_to: payload.to,
            max_timeout_seconds: default_timeout(),
            asset: Address::ZERO,
        }
    }
}

/// Envelope implied by a bare payload at block-execution time.
impl PaymentEnvelope {
    pub fn implied_by(payload: PaymentPayload, network: impl Into<String>) -> Self {
        Self {
            x402_version: X402_VERSION,
            scheme: SCHEME_EXACT.to_string(),
            network: network.into(),
            payload,
        }
    }
}

fn default_mime_type() -> String {
    "application/json".to_string()
}

fn default_timeout() -> u64 {
    300
}

/// The signed payment a client presents, wrapping the consensus-level
/// payload with protocol metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEnvelope {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: PaymentPayload,
}

/// Result of `x402_verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
}

impl VerificationResponse {
    pub fn valid(payer: Address) -> Self {
        Self { is_valid: true, invalid_reason: None, payer: Some(payer) }
    }

    pub fn invalid(reason: crate::InvalidReason) -> Self {
        Self { is_valid: false, invalid_reason: Some(reason.as_str().to_string()), payer: None }
    }
}

/// Result of `x402_settle`. Produced once the payment transaction is
/// accepted by the mempool; inclusion is confirmed via the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettlementResponse {
    pub fn accepted(tx_hash: H256, network_id: u64) -> Self {
        Self { success: true, tx_hash: Some(tx_hash), network_id: Some(network_id), error: None }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self { success: false, tx_hash: None, network_id: None, error: Some(error.into()) }
    }
}

mod hex_amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        splendor_types::parse_hex_u128(&s).map_err(de::Error::custom)
    }
}
