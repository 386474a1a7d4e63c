//! Fixed-size hash and address types.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// A 32-byte Keccak-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct H256(pub [u8; 32]);

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl H256 {
    pub const ZERO: H256 = H256([0u8; 32]);

    /// Keccak-256 of arbitrary bytes.
    pub fn keccak(data: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        H256(out)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(data);
        Some(H256(out))
    }
}

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != 20 {
            return None;
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(data);
        Some(Address(out))
    }

    /// Derive an address from a public key: the last 20 bytes of its keccak.
    pub fn from_public_key(pubkey: &[u8]) -> Self {
        let hash = H256::keccak(pubkey);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash.0[12..]);
        Address(out)
    }

    /// Lowercase 0x-prefixed hex form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for H256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)?;
        H256::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)?;
        Address::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_known_vector() {
        // keccak256("") is the canonical empty hash
        let empty = H256::keccak(b"");
        assert_eq!(
            format!("{}", empty),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn address_hex_round_trip() {
        let addr: Address = "0x00000000000000000000000000000000000004_02"
            .replace('_', "")
            .parse()
            .unwrap();
        assert_eq!(addr.to_hex(), "0x0000000000000000000000000000000000000402");
    }

    #[test]
    fn address_from_public_key_takes_last_twenty() {
        let pk = [7u8; 64];
        let addr = Address::from_public_key(&pk);
        let hash = H256::keccak(&pk);
        assert_eq!(addr.as_bytes(), &hash.0[12..]);
    }

    #[test]
    fn serde_uses_hex_strings() {
        let addr = Address([0xab; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0xabababababababababababababababababababab\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
