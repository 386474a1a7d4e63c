//! # splendor-types
//!
//! Core chain types shared across the Splendor node:
//! - 32-byte hashes and 20-byte addresses with hex serde
//! - Block headers with the extended extra field used by the PQ transition
//! - Transactions (legacy value transfers and the x402 payment type)
//! - Receipts and logs
//! - A minimal RLP codec used for hashing and wire encoding

mod hash;
mod header;
mod receipt;
pub mod rlp;
mod transaction;

pub use hash::{Address, H256};
pub use header::{Header, EXTRA_SEAL, EXTRA_VANITY};
pub use receipt::{Log, PaymentOutcome, Receipt};
pub use transaction::{
    LegacyTransaction, PaymentPayload, Transaction, TxDecodeError, PAYMENT_TX_TYPE,
};

/// Parse a 0x-prefixed (or bare) hex quantity into a u128 wei amount.
pub fn parse_hex_u128(s: &str) -> Result<u128, TxDecodeError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    if stripped.is_empty() {
        return Err(TxDecodeError::InvalidQuantity(s.to_string()));
    }
    u128::from_str_radix(stripped, 16).map_err(|_| TxDecodeError::InvalidQuantity(s.to_string()))
}

/// Format a u128 wei amount as a 0x-prefixed hex quantity without leading zeros.
pub fn format_hex_u128(value: u128) -> String {
    format!("{:#x}", value)
}
