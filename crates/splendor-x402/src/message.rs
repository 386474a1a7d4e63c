//! The canonical x402 payment message.
//!
//! The signed text is a colon-separated line over the payload fields. The
//! current form (v2) binds the chain id; the legacy form (v1) omits it and is
//! only accepted when strict validation is off. Both are hashed with the
//! EIP-191 personal-message prefix before signing.

use splendor_crypto::ecdsa;
use splendor_types::{Address, PaymentPayload};

/// Canonical message with chain binding:
/// `x402-payment:{from}:{to}:{value}:{validAfter}:{validBefore}:{nonce}:{chainId}`.
pub fn canonical_message_v2(payload: &PaymentPayload, chain_id: u64) -> String {
    format!("{}:{}", canonical_message_v1(payload), chain_id)
}

/// Legacy canonical message without the trailing chain id.
pub fn canonical_message_v1(payload: &PaymentPayload) -> String {
    format!(
        "x402-payment:{}:{}:{:#x}:{}:{}:0x{}",
        payload.from,
        payload.to,
        payload.value,
        payload.valid_after,
        payload.valid_before,
        hex::encode(payload.nonce.as_bytes()),
    )
}

/// Recover the signer of a payload, trying the v2 message first and falling
/// back to v1 unless `strict`. Returns the recovered address only when it
/// matches `payload.from`.
pub fn recover_signer(payload: &PaymentPayload, chain_id: u64, strict: bool) -> Option<Address> {
    let v2 = ecdsa::eip191_hash(canonical_message_v2(payload, chain_id).as_bytes());
    if let Ok(addr) = ecdsa::recover(&v2, &payload.signature) {
        if addr == payload.from {
            return Some(addr);
        }
    }
    if strict {
        return None;
    }
    let v1 = ecdsa::eip191_hash(canonical_message_v1(payload).as_bytes());
    match ecdsa::recover(&v1, &payload.signature) {
        Ok(addr) if addr == payload.from => Some(addr),
        _ => None,
    }
}

/// Sign a payload's v2 canonical message, filling in its signature field.
/// Used by the test harness and client tooling.
pub fn sign_payload(
    payload: &mut PaymentPayload,
    chain_id: u64,
    secret: &[u8; 32],
) -> Result<(), splendor_crypto::EcdsaError> {
    let hash = ecdsa::eip191_hash(canonical_message_v2(payload, chain_id).as_bytes());
    payload.signature = ecdsa::sign_prehash(secret, &hash)?.to_vec();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splendor_types::H256;

    const SECRET: [u8; 32] = [0x59u8; 32];

    fn payload_for(secret: &[u8; 32]) -> PaymentPayload {
        PaymentPayload {
            from: ecdsa::address_of(secret).unwrap(),
            to: Address([2u8; 20]),
            value: 1_000_000_000_000_000,
            valid_after: 1_700_000_000,
            valid_before: 1_700_000_300,
            nonce: H256([0xab; 32]),
            signature: vec![0u8; 65],
        }
    }

    #[test]
    fn message_layout_is_colon_separated() {
        let payload = payload_for(&SECRET);
        let msg = canonical_message_v2(&payload, 1337);
        assert!(msg.starts_with("x402-payment:0x"));
        assert!(msg.ends_with(":1337"));
        assert_eq!(msg.matches(':').count(), 7);
        assert!(msg.contains(":0x38d7ea4c68000:"));
        // v1 is the v2 message minus the chain id suffix.
        assert_eq!(canonical_message_v1(&payload), msg.trim_end_matches(":1337"));
    }

    #[test]
    fn v2_signature_recovers_signer() {
        let mut payload = payload_for(&SECRET);
        sign_payload(&mut payload, 1337, &SECRET).unwrap();
        assert_eq!(recover_signer(&payload, 1337, true), Some(payload.from));
    }

    #[test]
    fn wrong_chain_id_fails_strict_and_lenient() {
        let mut payload = payload_for(&SECRET);
        sign_payload(&mut payload, 1, &SECRET).unwrap();
        // Verifier runs chain 1337: v2 mismatch, and the signature is not a
        // valid v1 signature either.
        assert_eq!(recover_signer(&payload, 1337, true), None);
        assert_eq!(recover_signer(&payload, 1337, false), None);
    }

    #[test]
    fn v1_signature_only_passes_lenient_mode() {
        let mut payload = payload_for(&SECRET);
        let v1 = ecdsa::eip191_hash(canonical_message_v1(&payload).as_bytes());
        payload.signature = ecdsa::sign_prehash(&SECRET, &v1).unwrap().to_vec();

        assert_eq!(recover_signer(&payload, 1337, true), None);
        assert_eq!(recover_signer(&payload, 1337, false), Some(payload.from));
    }

    #[test]
    fn signer_other_than_from_is_rejected() {
        let mut payload = payload_for(&SECRET);
        let other = [0x77u8; 32];
        sign_payload(&mut payload, 1337, &other).unwrap();
        assert_eq!(recover_signer(&payload, 1337, false), None);
    }
}
