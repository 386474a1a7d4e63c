//! Verification failure reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a payment payload failed verification. The string form is part of the
/// RPC contract (`invalidReason`), so variants render without decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidReason {
    UnsupportedScheme,
    UnsupportedNetwork,
    NotYetValid,
    Expired,
    InvalidSignature,
    InsufficientBalance,
    AmountMismatch,
    RecipientMismatch,
    NonceReused,
}

impl InvalidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidReason::UnsupportedScheme => "UnsupportedScheme",
            InvalidReason::UnsupportedNetwork => "UnsupportedNetwork",
            InvalidReason::NotYetValid => "NotYetValid",
            InvalidReason::Expired => "Expired",
            InvalidReason::InvalidSignature => "InvalidSignature",
            InvalidReason::InsufficientBalance => "InsufficientBalance",
            InvalidReason::AmountMismatch => "AmountMismatch",
            InvalidReason::RecipientMismatch => "RecipientMismatch",
            InvalidReason::NonceReused => "NonceReused",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_strings() {
        assert_eq!(InvalidReason::NonceReused.to_string(), "NonceReused");
        assert_eq!(InvalidReason::AmountMismatch.to_string(), "AmountMismatch");
    }
}
