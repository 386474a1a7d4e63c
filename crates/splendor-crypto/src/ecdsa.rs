//! secp256k1 signing, verification, and recovery.
//!
//! Signatures travel as 65 bytes `{r:32, s:32, v:1}` with `v` normalised to
//! {27, 28} on output. Recovery accepts `v` in {0, 1, 27, 28}.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use splendor_types::{Address, H256};
use thiserror::Error;

/// ECDSA operation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EcdsaError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// Result type for ECDSA operations.
pub type EcdsaResult<T> = Result<T, EcdsaError>;

/// Sign a 32-byte prehash, returning `{r, s, v}` with `v` in {27, 28}.
pub fn sign_prehash(secret: &[u8; 32], prehash: &H256) -> EcdsaResult<[u8; 65]> {
    let key = SigningKey::from_bytes(secret.into()).map_err(|_| EcdsaError::InvalidPrivateKey)?;
    let (sig, rec_id) = key
        .sign_prehash_recoverable(prehash.as_bytes())
        .map_err(|_| EcdsaError::InvalidSignature)?;

    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = rec_id.to_byte() + 27;
    Ok(out)
}

/// Recover the signer address from a 65-byte signature over `prehash`.
pub fn recover(prehash: &H256, signature: &[u8]) -> EcdsaResult<Address> {
    if signature.len() != 65 {
        return Err(EcdsaError::InvalidSignature);
    }
    let v = normalize_v(signature[64])?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| EcdsaError::InvalidSignature)?;
    let rec_id = RecoveryId::from_byte(v).ok_or(EcdsaError::InvalidRecoveryId(signature[64]))?;

    let key = VerifyingKey::recover_from_prehash(prehash.as_bytes(), &sig, rec_id)
        .map_err(|_| EcdsaError::RecoveryFailed)?;
    Ok(address_of_key(&key))
}

/// Verify a 64-byte `{r, s}` signature against an encoded public key.
///
/// Accepts 65-byte uncompressed keys or 64-byte raw coordinates (an `0x04`
/// tag is prepended). Any other key length is invalid rather than an error,
/// matching the GPU batch contract where malformed items mark a slot false.
pub fn verify_prehash(public_key: &[u8], prehash: &H256, signature: &[u8]) -> bool {
    if signature.len() < 64 {
        return false;
    }
    let key_bytes: Vec<u8> = match public_key.len() {
        65 => public_key.to_vec(),
        64 => {
            let mut prefixed = Vec::with_capacity(65);
            prefixed.push(0x04);
            prefixed.extend_from_slice(public_key);
            prefixed
        }
        _ => return false,
    };

    let Ok(key) = VerifyingKey::from_sec1_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&signature[..64]) else {
        return false;
    };
    key.verify_prehash(prehash.as_bytes(), &sig).is_ok()
}

/// Address controlled by a private key.
pub fn address_of(secret: &[u8; 32]) -> EcdsaResult<Address> {
    let key = SigningKey::from_bytes(secret.into()).map_err(|_| EcdsaError::InvalidPrivateKey)?;
    Ok(address_of_key(key.verifying_key()))
}

/// Uncompressed 65-byte SEC1 encoding of the public key for a private key.
pub fn public_key_of(secret: &[u8; 32]) -> EcdsaResult<Vec<u8>> {
    let key = SigningKey::from_bytes(secret.into()).map_err(|_| EcdsaError::InvalidPrivateKey)?;
    Ok(key.verifying_key().to_encoded_point(false).as_bytes().to_vec())
}

/// Hash a text message with the `"\x19Ethereum Signed Message:\n" + len` prefix.
pub fn eip191_hash(message: &[u8]) -> H256 {
    let mut data = Vec::with_capacity(message.len() + 32);
    data.extend_from_slice(b"\x19Ethereum Signed Message:\n");
    data.extend_from_slice(message.len().to_string().as_bytes());
    data.extend_from_slice(message);
    H256::keccak(&data)
}

fn address_of_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 tag; address is keccak(pubkey)[12..].
    Address::from_public_key(&point.as_bytes()[1..])
}

fn normalize_v(v: u8) -> EcdsaResult<u8> {
    match v {
        0 | 1 => Ok(v),
        27 | 28 => Ok(v - 27),
        other => Err(EcdsaError::InvalidRecoveryId(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 32] = [0x42u8; 32];

    #[test]
    fn sign_then_recover_matches_signer() {
        let prehash = H256::keccak(b"splendor seal");
        let sig = sign_prehash(&SECRET, &prehash).unwrap();
        assert!(sig[64] == 27 || sig[64] == 28);

        let recovered = recover(&prehash, &sig).unwrap();
        assert_eq!(recovered, address_of(&SECRET).unwrap());
    }

    #[test]
    fn recover_accepts_zero_based_v() {
        let prehash = H256::keccak(b"v normalisation");
        let mut sig = sign_prehash(&SECRET, &prehash).unwrap();
        sig[64] -= 27;
        assert_eq!(recover(&prehash, &sig).unwrap(), address_of(&SECRET).unwrap());
    }

    #[test]
    fn recover_rejects_bad_v() {
        let prehash = H256::keccak(b"bad v");
        let mut sig = sign_prehash(&SECRET, &prehash).unwrap();
        sig[64] = 5;
        assert_eq!(recover(&prehash, &sig), Err(EcdsaError::InvalidRecoveryId(5)));
    }

    #[test]
    fn tampered_message_recovers_different_address() {
        let sig = sign_prehash(&SECRET, &H256::keccak(b"original")).unwrap();
        let other = recover(&H256::keccak(b"tampered"), &sig);
        // Recovery may fail outright or produce an unrelated address.
        if let Ok(addr) = other {
            assert_ne!(addr, address_of(&SECRET).unwrap());
        }
    }

    #[test]
    fn verify_prehash_accepts_both_key_encodings() {
        let prehash = H256::keccak(b"batch item");
        let sig = sign_prehash(&SECRET, &prehash).unwrap();
        let full = public_key_of(&SECRET).unwrap();

        assert!(verify_prehash(&full, &prehash, &sig));
        assert!(verify_prehash(&full[1..], &prehash, &sig)); // 64-byte raw
        assert!(!verify_prehash(&full[..33], &prehash, &sig)); // wrong length
        assert!(!verify_prehash(&full, &H256::keccak(b"other"), &sig));
    }

    #[test]
    fn eip191_prefix_is_applied() {
        // Hash must differ from the bare keccak and depend on length.
        let msg = b"x402-payment:test";
        assert_ne!(eip191_hash(msg), H256::keccak(msg));
        assert_ne!(eip191_hash(b"ab"), eip191_hash(b"abc"));
    }
}
