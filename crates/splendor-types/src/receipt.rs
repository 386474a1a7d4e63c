//! Transaction receipts and logs.

use crate::{Address, H256};
use serde::{Deserialize, Serialize};

/// A log entry emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "hex_data")]
    pub data: Vec<u8>,
}

/// Settlement details attached to x402 payment receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub payer: Address,
    pub recipient: Address,
    #[serde(with = "hex_amount")]
    pub amount: u128,
    pub nonce: H256,
}

/// A transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub tx_index: u32,
    /// 1 = success, 0 = reverted.
    pub status: u8,
    pub gas_used: u64,
    pub logs: Vec<Log>,
    /// Present only for x402 payment transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentOutcome>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

mod hex_data {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(data)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)
    }
}

mod hex_amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::parse_hex_u128(&s).map_err(de::Error::custom)
    }
}
