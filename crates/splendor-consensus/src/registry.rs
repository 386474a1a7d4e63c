//! Validator post-quantum key registry.
//!
//! In-memory with an on-chain anchor planned. Keys are registered by
//! governance transactions, rotated automatically once their expiry block
//! passes, and wiped on shutdown. Reads dominate: verification consults the
//! registry on every sealed header, rotation writes once per interval.

use crate::error::{ConsensusError, ConsensusResult};
use parking_lot::RwLock;
use splendor_crypto::{mldsa, MlDsaAlgorithm, MlDsaError};
use splendor_types::Address;
use std::collections::HashMap;
use tracing::{info, warn};

/// Blocks between automatic key rotations.
pub const KEY_ROTATION_INTERVAL: u64 = 100_000;

/// A registered validator key with lifecycle metadata.
#[derive(Debug, Clone)]
pub struct PqValidatorKey {
    pub address: Address,
    pub algorithm: MlDsaAlgorithm,
    pub public_key: Vec<u8>,
    /// Standby key rotated in if the primary is compromised.
    pub backup_public_key: Option<Vec<u8>>,
    pub generated_at_block: u64,
    pub expiry_block: u64,
}

impl PqValidatorKey {
    pub fn is_expired(&self, current_block: u64) -> bool {
        current_block >= self.expiry_block
    }
}

#[derive(Default)]
struct RegistryInner {
    keys: HashMap<Address, PqValidatorKey>,
    rotation_log: Vec<(u64, Address)>,
}

/// The registry. A single lock guards the whole map; see the concurrency
/// notes above.
#[derive(Default)]
pub struct ValidatorKeyRegistry {
    inner: RwLock<RegistryInner>,
}

impl ValidatorKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a validator's key. The public key length must
    /// match the algorithm's parameter set.
    pub fn register(
        &self,
        validator: Address,
        algorithm: MlDsaAlgorithm,
        public_key: Vec<u8>,
        backup_public_key: Option<Vec<u8>>,
        block_number: u64,
    ) -> ConsensusResult<()> {
        let (_, pk_len) = mldsa::sizes(algorithm);
        if public_key.len() != pk_len {
            return Err(ConsensusError::InvalidPQSignature(MlDsaError::InvalidLength {
                field: "public key",
                expected: pk_len,
                got: public_key.len(),
            }));
        }

        let key = PqValidatorKey {
            address: validator,
            algorithm,
            public_key,
            backup_public_key,
            generated_at_block: block_number,
            expiry_block: block_number + KEY_ROTATION_INTERVAL,
        };
        info!(
            validator = %validator,
            algorithm = %algorithm,
            expiry = key.expiry_block,
            "Registered validator PQ key"
        );

        let mut inner = self.inner.write();
        inner.keys.insert(validator, key);
        inner.rotation_log.push((block_number, validator));
        Ok(())
    }

    pub fn get(&self, validator: &Address) -> Option<PqValidatorKey> {
        self.inner.read().keys.get(validator).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().keys.is_empty()
    }

    pub fn rotation_count(&self) -> usize {
        self.inner.read().rotation_log.len()
    }

    /// Check that a validator's registered key (if any) is still live and
    /// matches the public key presented in a seal. Unregistered validators
    /// pass: registration is currently opt-in per governance.
    pub fn check_seal_key(
        &self,
        validator: &Address,
        public_key: &[u8],
        current_block: u64,
    ) -> ConsensusResult<()> {
        let inner = self.inner.read();
        let Some(key) = inner.keys.get(validator) else {
            return Ok(());
        };
        if key.is_expired(current_block) {
            return Err(ConsensusError::KeyExpired {
                validator: *validator,
                expired_at: key.expiry_block,
                current: current_block,
            });
        }
        let backup_matches =
            key.backup_public_key.as_deref().is_some_and(|b| b == public_key);
        if key.public_key != public_key && !backup_matches {
            return Err(ConsensusError::UnauthorizedSigner(*validator));
        }
        Ok(())
    }

    /// Rotate every key whose expiry block has passed. Returns how many
    /// rotated. Key generation failures (library absent) leave the old key
    /// in place and are logged, not fatal.
    pub fn rotate_expired(&self, current_block: u64) -> usize {
        let expired: Vec<(Address, MlDsaAlgorithm)> = {
            let inner = self.inner.read();
            inner
                .keys
                .values()
                .filter(|k| k.is_expired(current_block))
                .map(|k| (k.address, k.algorithm))
                .collect()
        };

        let mut rotated = 0;
        for (validator, algorithm) in expired {
            match mldsa::generate(algorithm) {
                Ok((public_key, _secret_key)) => {
                    let backup = mldsa::generate(algorithm).ok().map(|(pk, _)| pk);
                    let mut inner = self.inner.write();
                    if let Some(key) = inner.keys.get_mut(&validator) {
                        key.public_key = public_key;
                        key.backup_public_key = backup;
                        key.generated_at_block = current_block;
                        key.expiry_block = current_block + KEY_ROTATION_INTERVAL;
                    }
                    inner.rotation_log.push((current_block, validator));
                    rotated += 1;
                    info!(validator = %validator, block = current_block, "Rotated validator PQ key");
                }
                Err(e) => {
                    warn!(validator = %validator, error = %e, "Failed to rotate validator key");
                }
            }
        }
        rotated
    }

    /// Wipe all key material. Called on node shutdown.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.keys.clear();
        inner.rotation_log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(b: u8) -> Address {
        Address([b; 20])
    }

    fn dummy_key(algorithm: MlDsaAlgorithm) -> Vec<u8> {
        vec![0x42; mldsa::sizes(algorithm).1]
    }

    #[test]
    fn register_and_lookup() {
        let registry = ValidatorKeyRegistry::new();
        let alg = MlDsaAlgorithm::MlDsa65;
        registry.register(validator(1), alg, dummy_key(alg), None, 100).unwrap();

        let key = registry.get(&validator(1)).unwrap();
        assert_eq!(key.generated_at_block, 100);
        assert_eq!(key.expiry_block, 100 + KEY_ROTATION_INTERVAL);
        assert!(!key.is_expired(100 + KEY_ROTATION_INTERVAL - 1));
        assert!(key.is_expired(100 + KEY_ROTATION_INTERVAL));
    }

    #[test]
    fn register_rejects_wrong_key_length() {
        let registry = ValidatorKeyRegistry::new();
        let result = registry.register(
            validator(1),
            MlDsaAlgorithm::MlDsa65,
            vec![0u8; 100],
            None,
            0,
        );
        assert!(matches!(result, Err(ConsensusError::InvalidPQSignature(_))));
    }

    #[test]
    fn seal_key_checks_expiry_and_identity() {
        let registry = ValidatorKeyRegistry::new();
        let alg = MlDsaAlgorithm::MlDsa44;
        let key = dummy_key(alg);
        registry.register(validator(2), alg, key.clone(), None, 0).unwrap();

        registry.check_seal_key(&validator(2), &key, 10).unwrap();

        let other = vec![0x43; key.len()];
        assert!(matches!(
            registry.check_seal_key(&validator(2), &other, 10),
            Err(ConsensusError::UnauthorizedSigner(_))
        ));

        assert!(matches!(
            registry.check_seal_key(&validator(2), &key, KEY_ROTATION_INTERVAL),
            Err(ConsensusError::KeyExpired { .. })
        ));

        // Unregistered validators are not constrained by the registry.
        registry.check_seal_key(&validator(9), &key, 10).unwrap();
    }

    #[test]
    fn rotation_replaces_expired_keys() {
        let registry = ValidatorKeyRegistry::new();
        let alg = MlDsaAlgorithm::MlDsa44;
        let (pk, _) = mldsa::generate(alg).unwrap();
        registry.register(validator(3), alg, pk.clone(), None, 0).unwrap();

        assert_eq!(registry.rotate_expired(KEY_ROTATION_INTERVAL - 1), 0);
        assert_eq!(registry.rotate_expired(KEY_ROTATION_INTERVAL), 1);

        let rotated = registry.get(&validator(3)).unwrap();
        assert_ne!(rotated.public_key, pk);
        assert_eq!(rotated.expiry_block, 2 * KEY_ROTATION_INTERVAL);
        assert!(rotated.backup_public_key.is_some());
    }

    #[test]
    fn clear_wipes_everything() {
        let registry = ValidatorKeyRegistry::new();
        let alg = MlDsaAlgorithm::MlDsa44;
        registry.register(validator(4), alg, dummy_key(alg), None, 0).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.rotation_count(), 0);
    }
}
