//! ML-DSA (FIPS 204) signatures for consensus sealing.
//!
//! Three parameter sets are supported, trading signature size against
//! security level. Sizes are queried from the linked library at runtime and
//! only fall back to the static table when the library cannot report them;
//! library builds are known to report slightly smaller signatures for the
//! 65/87 variants (3293/4595 versus the documented 3309/4627), so callers
//! that allocate buffers must use [`sizes`] rather than the table.
//!
//! With the `pq` feature disabled every operation returns
//! [`MlDsaError::LibraryUnavailable`] except [`sizes`] and algorithm
//! enumeration, which serve static values so the node can still describe its
//! own wire formats on ECDSA-only chains.

use thiserror::Error;

/// ML-DSA parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MlDsaAlgorithm {
    /// Compact variant, security category 2.
    MlDsa44,
    /// Recommended variant for consensus, security category 3.
    MlDsa65,
    /// High-security variant, security category 5.
    MlDsa87,
}

/// ML-DSA operation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MlDsaError {
    #[error("invalid ML-DSA algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("empty message")]
    EmptyMessage,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid {field} length: expected {expected}, got {got}")]
    InvalidLength { field: &'static str, expected: usize, got: usize },

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("mismatched batch sizes: {messages} messages, {signatures} signatures, {keys} keys")]
    LengthMismatch { messages: usize, signatures: usize, keys: usize },

    #[error("ML-DSA library not available")]
    LibraryUnavailable,

    #[error("signing failed")]
    SigningFailed,

    #[error("key generation failed")]
    KeyGenerationFailed,
}

/// Result type for ML-DSA operations.
pub type MlDsaResult<T> = Result<T, MlDsaError>;

impl MlDsaAlgorithm {
    /// All supported parameter sets.
    pub const ALL: [MlDsaAlgorithm; 3] =
        [MlDsaAlgorithm::MlDsa44, MlDsaAlgorithm::MlDsa65, MlDsaAlgorithm::MlDsa87];

    /// FIPS 204 name.
    pub fn name(self) -> &'static str {
        match self {
            MlDsaAlgorithm::MlDsa44 => "ML-DSA-44",
            MlDsaAlgorithm::MlDsa65 => "ML-DSA-65",
            MlDsaAlgorithm::MlDsa87 => "ML-DSA-87",
        }
    }

    /// Name in the pre-FIPS library vocabulary, kept for older libraries that
    /// only know the round-3 submission names.
    pub fn legacy_name(self) -> &'static str {
        match self {
            MlDsaAlgorithm::MlDsa44 => "Dilithium2",
            MlDsaAlgorithm::MlDsa65 => "Dilithium3",
            MlDsaAlgorithm::MlDsa87 => "Dilithium5",
        }
    }

    /// Parse either vocabulary.
    pub fn from_name(name: &str) -> MlDsaResult<Self> {
        match name {
            "ML-DSA-44" | "Dilithium2" => Ok(MlDsaAlgorithm::MlDsa44),
            "ML-DSA-65" | "Dilithium3" => Ok(MlDsaAlgorithm::MlDsa65),
            "ML-DSA-87" | "Dilithium5" => Ok(MlDsaAlgorithm::MlDsa87),
            other => Err(MlDsaError::InvalidAlgorithm(other.to_string())),
        }
    }

    /// Parse the numeric variant used in chain configuration (44/65/87).
    pub fn from_variant(variant: u32) -> MlDsaResult<Self> {
        match variant {
            44 => Ok(MlDsaAlgorithm::MlDsa44),
            65 => Ok(MlDsaAlgorithm::MlDsa65),
            87 => Ok(MlDsaAlgorithm::MlDsa87),
            other => Err(MlDsaError::InvalidAlgorithm(other.to_string())),
        }
    }

    /// Documented `(signature, public key)` sizes. The linked library may
    /// report different signature sizes for 65/87; prefer [`sizes`].
    pub fn static_sizes(self) -> (usize, usize) {
        match self {
            MlDsaAlgorithm::MlDsa44 => (2420, 1312),
            MlDsaAlgorithm::MlDsa65 => (3309, 1952),
            MlDsaAlgorithm::MlDsa87 => (4627, 2592),
        }
    }

    /// NIST security category.
    pub fn security_level(self) -> u8 {
        match self {
            MlDsaAlgorithm::MlDsa44 => 2,
            MlDsaAlgorithm::MlDsa65 => 3,
            MlDsaAlgorithm::MlDsa87 => 5,
        }
    }
}

impl std::fmt::Display for MlDsaAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether an ML-DSA implementation is linked into this build.
pub fn library_available() -> bool {
    cfg!(feature = "pq")
}

/// `(signature, public key)` sizes for an algorithm, from the library when
/// linked, otherwise from the static table.
pub fn sizes(algorithm: MlDsaAlgorithm) -> (usize, usize) {
    #[cfg(feature = "pq")]
    {
        backend::runtime_sizes(algorithm)
    }
    #[cfg(not(feature = "pq"))]
    {
        algorithm.static_sizes()
    }
}

/// Verify a detached ML-DSA signature.
pub fn verify(
    algorithm: MlDsaAlgorithm,
    message: &[u8],
    signature: &[u8],
    public_key: &[u8],
) -> MlDsaResult<()> {
    if message.is_empty() {
        return Err(MlDsaError::EmptyMessage);
    }
    if signature.is_empty() {
        return Err(MlDsaError::InvalidSignature);
    }
    if public_key.is_empty() {
        return Err(MlDsaError::InvalidPublicKey);
    }

    #[cfg(feature = "pq")]
    {
        let (sig_len, pk_len) = backend::runtime_sizes(algorithm);
        if signature.len() != sig_len {
            return Err(MlDsaError::InvalidLength {
                field: "signature",
                expected: sig_len,
                got: signature.len(),
            });
        }
        if public_key.len() != pk_len {
            return Err(MlDsaError::InvalidLength {
                field: "public key",
                expected: pk_len,
                got: public_key.len(),
            });
        }
        backend::verify(algorithm, message, signature, public_key)
    }
    #[cfg(not(feature = "pq"))]
    {
        Err(MlDsaError::LibraryUnavailable)
    }
}

/// Generate a fresh `(public, secret)` key pair.
pub fn generate(algorithm: MlDsaAlgorithm) -> MlDsaResult<(Vec<u8>, Vec<u8>)> {
    #[cfg(feature = "pq")]
    {
        Ok(backend::generate(algorithm))
    }
    #[cfg(not(feature = "pq"))]
    {
        let _ = algorithm;
        Err(MlDsaError::LibraryUnavailable)
    }
}

/// Produce a detached signature over `message`.
pub fn sign(
    algorithm: MlDsaAlgorithm,
    message: &[u8],
    secret_key: &[u8],
) -> MlDsaResult<Vec<u8>> {
    if message.is_empty() {
        return Err(MlDsaError::EmptyMessage);
    }
    if secret_key.is_empty() {
        return Err(MlDsaError::SigningFailed);
    }

    #[cfg(feature = "pq")]
    {
        backend::sign(algorithm, message, secret_key)
    }
    #[cfg(not(feature = "pq"))]
    {
        let _ = algorithm;
        Err(MlDsaError::LibraryUnavailable)
    }
}

/// Verify a batch of signatures, one boolean per item.
///
/// Items with wrong lengths or failed verification come back `false`; only a
/// shape mismatch between the three arrays is an error.
pub fn batch_verify(
    algorithm: MlDsaAlgorithm,
    messages: &[&[u8]],
    signatures: &[&[u8]],
    public_keys: &[&[u8]],
) -> MlDsaResult<Vec<bool>> {
    if messages.len() != signatures.len() || signatures.len() != public_keys.len() {
        return Err(MlDsaError::LengthMismatch {
            messages: messages.len(),
            signatures: signatures.len(),
            keys: public_keys.len(),
        });
    }
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    #[cfg(feature = "pq")]
    {
        Ok(messages
            .iter()
            .zip(signatures)
            .zip(public_keys)
            .map(|((msg, sig), pk)| verify(algorithm, msg, sig, pk).is_ok())
            .collect())
    }
    #[cfg(not(feature = "pq"))]
    {
        let _ = algorithm;
        Err(MlDsaError::LibraryUnavailable)
    }
}

#[cfg(feature = "pq")]
mod backend {
    use super::{MlDsaAlgorithm, MlDsaError, MlDsaResult};
    use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};

    macro_rules! dispatch {
        ($alg:expr, $m:ident, $body:expr) => {
            match $alg {
                MlDsaAlgorithm::MlDsa44 => {
                    use pqcrypto_dilithium::dilithium2 as $m;
                    $body
                }
                MlDsaAlgorithm::MlDsa65 => {
                    use pqcrypto_dilithium::dilithium3 as $m;
                    $body
                }
                MlDsaAlgorithm::MlDsa87 => {
                    use pqcrypto_dilithium::dilithium5 as $m;
                    $body
                }
            }
        };
    }

    pub fn runtime_sizes(algorithm: MlDsaAlgorithm) -> (usize, usize) {
        dispatch!(algorithm, m, { (m::signature_bytes(), m::public_key_bytes()) })
    }

    pub fn verify(
        algorithm: MlDsaAlgorithm,
        message: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> MlDsaResult<()> {
        dispatch!(algorithm, m, {
            let pk = m::PublicKey::from_bytes(public_key)
                .map_err(|_| MlDsaError::InvalidPublicKey)?;
            let sig = m::DetachedSignature::from_bytes(signature)
                .map_err(|_| MlDsaError::InvalidSignature)?;
            m::verify_detached_signature(&sig, message, &pk)
                .map_err(|_| MlDsaError::VerificationFailed)
        })
    }

    pub fn generate(algorithm: MlDsaAlgorithm) -> (Vec<u8>, Vec<u8>) {
        dispatch!(algorithm, m, {
            let (pk, sk) = m::keypair();
            (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
        })
    }

    pub fn sign(
        algorithm: MlDsaAlgorithm,
        message: &[u8],
        secret_key: &[u8],
    ) -> MlDsaResult<Vec<u8>> {
        dispatch!(algorithm, m, {
            let sk =
                m::SecretKey::from_bytes(secret_key).map_err(|_| MlDsaError::InvalidLength {
                    field: "secret key",
                    expected: m::secret_key_bytes(),
                    got: secret_key.len(),
                })?;
            Ok(m::detached_sign(message, &sk).as_bytes().to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_map_both_vocabularies() {
        for alg in MlDsaAlgorithm::ALL {
            assert_eq!(MlDsaAlgorithm::from_name(alg.name()).unwrap(), alg);
            assert_eq!(MlDsaAlgorithm::from_name(alg.legacy_name()).unwrap(), alg);
        }
        assert!(matches!(
            MlDsaAlgorithm::from_name("ML-DSA-99"),
            Err(MlDsaError::InvalidAlgorithm(_))
        ));
    }

    #[test]
    fn numeric_variants_parse() {
        assert_eq!(MlDsaAlgorithm::from_variant(65).unwrap(), MlDsaAlgorithm::MlDsa65);
        assert!(MlDsaAlgorithm::from_variant(66).is_err());
    }

    #[cfg(feature = "pq")]
    mod with_library {
        use super::super::*;

        #[test]
        fn runtime_sizes_are_authoritative() {
            // Public key sizes agree everywhere; the library is allowed to
            // report the smaller signature sizes for 65/87.
            for alg in MlDsaAlgorithm::ALL {
                let (sig_len, pk_len) = sizes(alg);
                let (static_sig, static_pk) = alg.static_sizes();
                assert_eq!(pk_len, static_pk);
                assert!(sig_len == static_sig || sig_len < static_sig);
            }
            let (sig65, _) = sizes(MlDsaAlgorithm::MlDsa65);
            assert!(sig65 == 3309 || sig65 == 3293);
        }

        #[test]
        fn sign_verify_round_trip_all_variants() {
            for alg in MlDsaAlgorithm::ALL {
                let (pk, sk) = generate(alg).unwrap();
                let (sig_len, pk_len) = sizes(alg);
                assert_eq!(pk.len(), pk_len);

                let sig = sign(alg, b"seal hash", &sk).unwrap();
                assert_eq!(sig.len(), sig_len);
                verify(alg, b"seal hash", &sig, &pk).unwrap();
            }
        }

        #[test]
        fn tampered_message_fails_verification() {
            let alg = MlDsaAlgorithm::MlDsa65;
            let (pk, sk) = generate(alg).unwrap();
            let sig = sign(alg, b"message", &sk).unwrap();
            assert_eq!(
                verify(alg, b"messagE", &sig, &pk),
                Err(MlDsaError::VerificationFailed)
            );
        }

        #[test]
        fn wrong_lengths_are_rejected_before_verification() {
            let alg = MlDsaAlgorithm::MlDsa65;
            let (pk, sk) = generate(alg).unwrap();
            let sig = sign(alg, b"message", &sk).unwrap();

            assert!(matches!(
                verify(alg, b"message", &sig[..sig.len() - 1], &pk),
                Err(MlDsaError::InvalidLength { field: "signature", .. })
            ));
            assert!(matches!(
                verify(alg, b"message", &sig, &pk[..pk.len() - 1]),
                Err(MlDsaError::InvalidLength { field: "public key", .. })
            ));
        }

        #[test]
        fn empty_inputs_have_dedicated_errors() {
            let alg = MlDsaAlgorithm::MlDsa65;
            let (pk, sk) = generate(alg).unwrap();
            let sig = sign(alg, b"m", &sk).unwrap();

            assert_eq!(verify(alg, b"", &sig, &pk), Err(MlDsaError::EmptyMessage));
            assert_eq!(verify(alg, b"m", &[], &pk), Err(MlDsaError::InvalidSignature));
            assert_eq!(verify(alg, b"m", &sig, &[]), Err(MlDsaError::InvalidPublicKey));
        }

        #[test]
        fn batch_verify_reports_per_item() {
            let alg = MlDsaAlgorithm::MlDsa44;
            let (pk, sk) = generate(alg).unwrap();
            let good = sign(alg, b"one", &sk).unwrap();
            let mut bad = good.clone();
            bad[0] ^= 0xff;

            let results = batch_verify(
                alg,
                &[b"one", b"one", b"two"],
                &[&good, &bad, &good],
                &[&pk, &pk, &pk],
            )
            .unwrap();
            assert_eq!(results, vec![true, false, false]);
        }

        #[test]
        fn batch_verify_rejects_mismatched_arrays() {
            let alg = MlDsaAlgorithm::MlDsa44;
            let result = batch_verify(alg, &[b"a"], &[], &[]);
            assert!(matches!(result, Err(MlDsaError::LengthMismatch { .. })));
        }
    }

    #[cfg(not(feature = "pq"))]
    mod without_library {
        use super::super::*;

        #[test]
        fn operations_degrade_to_library_unavailable() {
            let alg = MlDsaAlgorithm::MlDsa65;
            assert_eq!(sizes(alg), alg.static_sizes());
            assert_eq!(
                verify(alg, b"m", &[0u8; 3309], &[0u8; 1952]),
                Err(MlDsaError::LibraryUnavailable)
            );
            assert_eq!(generate(alg), Err(MlDsaError::LibraryUnavailable));
            assert_eq!(sign(alg, b"m", &[0u8; 32]), Err(MlDsaError::LibraryUnavailable));
        }
    }
}
