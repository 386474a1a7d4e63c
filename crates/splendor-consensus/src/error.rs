//! Consensus validation errors.

use splendor_types::Address;
use thiserror::Error;

/// Errors raised while verifying or producing blocks. The seal-related
/// variants are fatal for block acceptance.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("post-quantum seal required but not found")]
    MissingPQSeal,

    #[error("post-quantum signature verification failed: {0}")]
    InvalidPQSignature(splendor_crypto::MlDsaError),

    #[error("PQ signer {pq} does not match ECDSA signer {ecdsa}")]
    SignerMismatch { pq: Address, ecdsa: Address },

    #[error("header extra would exceed maximum size: {size} > {max}")]
    ExtraTooLarge { size: usize, max: usize },

    #[error("malformed header extra: {0}")]
    InvalidExtra(String),

    #[error("invalid ECDSA seal: {0}")]
    InvalidSeal(String),

    #[error("signer {0} is not authorised")]
    UnauthorizedSigner(Address),

    #[error("signer {0} signed recently")]
    RecentlySigned(Address),

    #[error("validator key for {validator} expired at block {expired_at}, current {current}")]
    KeyExpired { validator: Address, expired_at: u64, current: u64 },

    #[error("duplicate payment nonce in block from {0}")]
    DuplicatePaymentNonce(Address),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("state error: {0}")]
    State(#[from] splendor_state::StateError),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
