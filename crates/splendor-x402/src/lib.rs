//! # splendor-x402
//!
//! The native HTTP-402 micropayment engine. A client that hits a paywalled
//! resource receives a 402 response carrying payment requirements, signs a
//! canonical payment message, and retries; the node verifies the payload
//! against a state snapshot, wraps it into a typed transaction, and settles
//! it inside the block executor with zero gas and zero fees. Replay is
//! prevented by the durable on-chain `(from, nonce)` registry.

mod engine;
mod message;
mod reason;
mod revenue;
mod types;

pub use engine::{PaymentStateView, X402Config, X402Engine};
pub use message::{canonical_message_v1, canonical_message_v2, recover_signer, sign_payload};
pub use reason::InvalidReason;
pub use revenue::{
    DistributionMode, RevenueShares, RevenueStats, RevenueTracker, ValidatorRevenue,
};
pub use types::{
    PaymentEnvelope, PaymentRequirements, SettlementResponse, VerificationResponse,
    SCHEME_EXACT, X402_VERSION,
};
