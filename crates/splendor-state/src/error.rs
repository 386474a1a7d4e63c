//! State errors.

use splendor_types::Address;
use thiserror::Error;

/// Errors from state mutation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("insufficient balance for {address}: have {have}, need {need}")]
    InsufficientBalance { address: Address, have: u128, need: u128 },

    #[error("balance overflow for {0}")]
    BalanceOverflow(Address),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
