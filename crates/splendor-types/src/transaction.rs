//! Transactions: legacy value transfers and the x402 payment type.

use crate::rlp::{self, RlpError};
use crate::{Address, H256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type byte identifying x402 payment transactions on the wire.
///
/// Outside the 0x00..=0x02 range used by standard envelopes. Stable: changing
/// it would orphan every settled payment.
pub const PAYMENT_TX_TYPE: u8 = 0x64;

/// Transaction decoding errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TxDecodeError {
    #[error("empty transaction bytes")]
    Empty,

    #[error("unknown transaction type byte {0:#04x}")]
    UnknownType(u8),

    #[error("rlp: {0}")]
    Rlp(#[from] RlpError),

    #[error("wrong field count: expected {expected}, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("invalid field length for {0}")]
    FieldLength(&'static str),

    #[error("invalid hex quantity: {0}")]
    InvalidQuantity(String),
}

/// The signed body of an x402 payment, carried verbatim as the typed
/// transaction payload and inside the JSON payment envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub from: Address,
    pub to: Address,
    /// Payment amount in wei, hex-encoded on the wire.
    #[serde(with = "hex_u128")]
    pub value: u128,
    pub valid_after: u64,
    pub valid_before: u64,
    /// Payer-chosen 32-byte replay nonce. Not an account nonce.
    pub nonce: H256,
    /// 65-byte `{r, s, v}` secp256k1 signature over the canonical message.
    #[serde(with = "hex_sig")]
    pub signature: Vec<u8>,
}

impl PaymentPayload {
    /// RLP body of the typed transaction (without the leading type byte).
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut items = Vec::with_capacity(7);
        items.push(bytes_item(self.from.as_bytes()));
        items.push(bytes_item(self.to.as_bytes()));
        items.push(uint_item(self.value));
        items.push(uint_item(self.valid_after as u128));
        items.push(uint_item(self.valid_before as u128));
        items.push(bytes_item(self.nonce.as_bytes()));
        items.push(bytes_item(&self.signature));
        rlp::encode_list(&items)
    }

    pub fn rlp_decode(data: &[u8]) -> Result<Self, TxDecodeError> {
        let item = rlp::decode(data)?;
        let fields = item.as_list()?;
        if fields.len() != 7 {
            return Err(TxDecodeError::FieldCount { expected: 7, got: fields.len() });
        }
        let from = Address::from_slice(fields[0].as_bytes()?)
            .ok_or(TxDecodeError::FieldLength("from"))?;
        let to =
            Address::from_slice(fields[1].as_bytes()?).ok_or(TxDecodeError::FieldLength("to"))?;
        let value = fields[2].as_uint()?;
        let valid_after = fields[3].as_uint()? as u64;
        let valid_before = fields[4].as_uint()? as u64;
        let nonce = H256::from_slice(fields[5].as_bytes()?)
            .ok_or(TxDecodeError::FieldLength("nonce"))?;
        let signature = fields[6].as_bytes()?.to_vec();
        if signature.len() != 65 {
            return Err(TxDecodeError::FieldLength("signature"));
        }
        Ok(Self { from, to, value, valid_after, valid_before, nonce, signature })
    }
}

/// A pre-typed-envelope value transfer, RLP `[nonce, gasPrice, gas, to, value,
/// data, v, r, s]`. The GPU decode path extracts its cheap fields without
/// running signature recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl LegacyTransaction {
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut items = Vec::with_capacity(9);
        items.push(uint_item(self.nonce as u128));
        items.push(uint_item(self.gas_price));
        items.push(uint_item(self.gas_limit as u128));
        match self.to {
            Some(addr) => items.push(bytes_item(addr.as_bytes())),
            None => items.push(bytes_item(&[])),
        }
        items.push(uint_item(self.value));
        items.push(bytes_item(&self.data));
        items.push(uint_item(self.v as u128));
        items.push(bytes_item(trim_zeros(&self.r)));
        items.push(bytes_item(trim_zeros(&self.s)));
        rlp::encode_list(&items)
    }

    pub fn rlp_decode(data: &[u8]) -> Result<Self, TxDecodeError> {
        let item = rlp::decode(data)?;
        let fields = item.as_list()?;
        if fields.len() != 9 {
            return Err(TxDecodeError::FieldCount { expected: 9, got: fields.len() });
        }
        let to_bytes = fields[3].as_bytes()?;
        let to = if to_bytes.is_empty() {
            None
        } else {
            Some(Address::from_slice(to_bytes).ok_or(TxDecodeError::FieldLength("to"))?)
        };
        Ok(Self {
            nonce: fields[0].as_uint()? as u64,
            gas_price: fields[1].as_uint()?,
            gas_limit: fields[2].as_uint()? as u64,
            to,
            value: fields[4].as_uint()?,
            data: fields[5].as_bytes()?.to_vec(),
            v: fields[6].as_uint()? as u64,
            r: pad32(fields[7].as_bytes()?).ok_or(TxDecodeError::FieldLength("r"))?,
            s: pad32(fields[8].as_bytes()?).ok_or(TxDecodeError::FieldLength("s"))?,
        })
    }

    /// Chain id recovered from the EIP-155 `v` value, if present.
    pub fn chain_id(&self) -> Option<u64> {
        if self.v >= 35 {
            Some((self.v - 35) / 2)
        } else {
            None
        }
    }

    /// The hash the sender signed: EIP-155 form when `v` encodes a chain id,
    /// otherwise the six-field legacy form.
    pub fn signing_hash(&self) -> H256 {
        let mut items = Vec::with_capacity(9);
        items.push(uint_item(self.nonce as u128));
        items.push(uint_item(self.gas_price));
        items.push(uint_item(self.gas_limit as u128));
        match self.to {
            Some(addr) => items.push(bytes_item(addr.as_bytes())),
            None => items.push(bytes_item(&[])),
        }
        items.push(uint_item(self.value));
        items.push(bytes_item(&self.data));
        if let Some(chain_id) = self.chain_id() {
            items.push(uint_item(chain_id as u128));
            items.push(uint_item(0));
            items.push(uint_item(0));
        }
        H256::keccak(&rlp::encode_list(&items))
    }

    /// Recovery id (0 or 1) extracted from `v`.
    pub fn recovery_id(&self) -> Option<u8> {
        match self.chain_id() {
            Some(chain_id) => u8::try_from(self.v - 35 - 2 * chain_id).ok(),
            None if self.v == 27 || self.v == 28 => Some((self.v - 27) as u8),
            None => None,
        }
    }
}

/// Any transaction the node can carry in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Legacy(LegacyTransaction),
    Payment(PaymentPayload),
}

impl Transaction {
    /// Wire encoding: legacy transactions are bare RLP lists, payment
    /// transactions are `0x64 || rlp(payload)`.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Transaction::Legacy(tx) => tx.rlp_encode(),
            Transaction::Payment(p) => {
                let body = p.rlp_encode();
                let mut out = Vec::with_capacity(1 + body.len());
                out.push(PAYMENT_TX_TYPE);
                out.extend_from_slice(&body);
                out
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, TxDecodeError> {
        let first = *data.first().ok_or(TxDecodeError::Empty)?;
        if first >= 0xc0 {
            return Ok(Transaction::Legacy(LegacyTransaction::rlp_decode(data)?));
        }
        match first {
            PAYMENT_TX_TYPE => Ok(Transaction::Payment(PaymentPayload::rlp_decode(&data[1..])?)),
            other => Err(TxDecodeError::UnknownType(other)),
        }
    }

    /// Transaction hash: keccak of the wire encoding.
    pub fn hash(&self) -> H256 {
        H256::keccak(&self.encode())
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            Transaction::Legacy(tx) => tx.gas_limit,
            // Payments are unmetered.
            Transaction::Payment(_) => 0,
        }
    }
}

fn bytes_item(b: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    rlp::encode_bytes(&mut out, b);
    out
}

fn uint_item(v: u128) -> Vec<u8> {
    let mut out = Vec::new();
    rlp::encode_uint(&mut out, v);
    out
}

fn trim_zeros(b: &[u8]) -> &[u8] {
    let first = b.iter().position(|&x| x != 0).unwrap_or(b.len());
    &b[first..]
}

fn pad32(b: &[u8]) -> Option<[u8; 32]> {
    if b.len() > 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out[32 - b.len()..].copy_from_slice(b);
    Some(out)
}

mod hex_u128 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::parse_hex_u128(&s).map_err(de::Error::custom)
    }
}

mod hex_sig {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sig: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(sig)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes =
            hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)?;
        if bytes.len() != 65 {
            return Err(de::Error::custom("signature must be 65 bytes"));
        }
        Ok(bytes)
    }
}
