//! Mempool errors.

use thiserror::Error;

/// Errors from pool admission and removal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction {0} already in pool")]
    AlreadyExists(String),

    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("payment with the same (from, nonce) already pooled")]
    NonceConflict,

    #[error("payment rejected: {0}")]
    InvalidPayment(splendor_x402::InvalidReason),

    #[error("transaction rejected: {0}")]
    InvalidTransaction(String),

    #[error("mempool full: {count} transactions")]
    PoolFull { count: usize },
}

/// Result type for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
