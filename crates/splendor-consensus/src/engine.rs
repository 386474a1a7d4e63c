//! Header seal production and verification through the PQ transition.

use crate::error::{ConsensusError, ConsensusResult};
use crate::params::{ChainParams, ForkState, MAX_EXTRA_SIZE};
use crate::pqseal::{ExtraLayout, PqSeal};
use crate::registry::ValidatorKeyRegistry;
use splendor_crypto::{ecdsa, mldsa, MlDsaAlgorithm, MlDsaResult};
use splendor_types::{Address, Header, EXTRA_SEAL, EXTRA_VANITY};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Produces an ML-DSA signature and the matching public key over a seal
/// hash. Supplied by the key manager, which is an external collaborator.
pub type PqSignerFn =
    Box<dyn Fn(MlDsaAlgorithm, &[u8]) -> MlDsaResult<(Vec<u8>, Vec<u8>)> + Send + Sync>;

/// Authorised signer set at a parent block, with recent-signer history for
/// the recency bound.
#[derive(Debug, Clone, Default)]
pub struct SignerSnapshot {
    signers: BTreeSet<Address>,
    /// Block number → signer, for recent blocks.
    recents: HashMap<u64, Address>,
}

impl SignerSnapshot {
    pub fn new(signers: impl IntoIterator<Item = Address>) -> Self {
        Self { signers: signers.into_iter().collect(), recents: HashMap::new() }
    }

    pub fn is_authorized(&self, signer: &Address) -> bool {
        self.signers.contains(signer)
    }

    pub fn signers(&self) -> impl Iterator<Item = &Address> {
        self.signers.iter()
    }

    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    /// A signer may seal again only after `floor(n/2) + 1` other blocks.
    fn recency_limit(&self) -> u64 {
        (self.signers.len() as u64) / 2 + 1
    }

    /// Whether `signer` sealed within the recency window before `number`.
    pub fn signed_recently(&self, signer: &Address, number: u64) -> bool {
        let limit = self.recency_limit();
        self.recents
            .iter()
            .any(|(seen, recent)| recent == signer && *seen + limit > number)
    }

    /// Record that `signer` sealed block `number`, pruning history outside
    /// the recency window.
    pub fn mark_signed(&mut self, number: u64, signer: Address) {
        let limit = self.recency_limit();
        self.recents.retain(|seen, _| *seen + limit > number);
        self.recents.insert(number, signer);
    }
}

/// The consensus engine's seal hooks: ECDSA always, ML-DSA per fork state.
pub struct PqEngine {
    params: ChainParams,
    registry: Arc<ValidatorKeyRegistry>,
}

impl PqEngine {
    pub fn new(params: ChainParams, registry: Arc<ValidatorKeyRegistry>) -> Self {
        Self { params, registry }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn registry(&self) -> &Arc<ValidatorKeyRegistry> {
        &self.registry
    }

    /// Verify both seals of a header against the parent snapshot. Returns
    /// the address accountable for the block (the ECDSA signer when present,
    /// otherwise the PQ-derived signer).
    pub fn verify_header_seals(
        &self,
        header: &Header,
        snapshot: &SignerSnapshot,
    ) -> ConsensusResult<Address> {
        let number = header.number;
        let fork = self.params.fork_state(number);
        let layout = ExtraLayout::parse(&header.extra, self.params.is_checkpoint(number))?;
        let seal_hash = header.seal_hash(&layout.unsealed_bytes());

        let ecdsa_signer = recover_ecdsa_signer(&seal_hash, &layout.ecdsa_seal)?;

        if let Some(signer) = &ecdsa_signer {
            if !snapshot.is_authorized(signer) {
                return Err(ConsensusError::UnauthorizedSigner(*signer));
            }
            if snapshot.signed_recently(signer, number) {
                return Err(ConsensusError::RecentlySigned(*signer));
            }
        } else if fork != ForkState::PostFork {
            // Only the enforced era tolerates a missing ECDSA seal.
            return Err(ConsensusError::InvalidSeal("missing ECDSA seal".to_string()));
        }

        if fork == ForkState::PreFork {
            return ecdsa_signer
                .ok_or_else(|| ConsensusError::InvalidSeal("missing ECDSA seal".to_string()));
        }

        let Some(pq_seal) = &layout.pq_seal else {
            if fork == ForkState::PostFork {
                return Err(ConsensusError::MissingPQSeal);
            }
            // Transition: the PQ seal is still optional.
            debug!(number, "no PQ seal during transition");
            return ecdsa_signer
                .ok_or_else(|| ConsensusError::InvalidSeal("missing ECDSA seal".to_string()));
        };

        mldsa::verify(
            pq_seal.algorithm,
            seal_hash.as_bytes(),
            &pq_seal.signature,
            &pq_seal.public_key,
        )
        .map_err(ConsensusError::InvalidPQSignature)?;

        let pq_signer = pq_seal.signer();

        if fork == ForkState::DualSigning {
            if let Some(ecdsa_signer) = ecdsa_signer {
                if pq_signer != ecdsa_signer {
                    return Err(ConsensusError::SignerMismatch {
                        pq: pq_signer,
                        ecdsa: ecdsa_signer,
                    });
                }
            }
        }

        if !snapshot.is_authorized(&pq_signer) {
            return Err(ConsensusError::UnauthorizedSigner(pq_signer));
        }
        if snapshot.signed_recently(&pq_signer, number) {
            return Err(ConsensusError::RecentlySigned(pq_signer));
        }
        self.registry.check_seal_key(&pq_signer, &pq_seal.public_key, number)?;

        debug!(number, signer = %pq_signer, algorithm = %pq_seal.algorithm, "PQ seal verified");
        Ok(ecdsa_signer.unwrap_or(pq_signer))
    }

    /// Seal a header: ECDSA always, plus an ML-DSA TLV once the fork is
    /// active. The PQ seal is spliced in immediately before the ECDSA seal
    /// so the latter stays at the very end of the extra field.
    pub fn seal_header(
        &self,
        header: &mut Header,
        signers: &[Address],
        ecdsa_secret: &[u8; 32],
        pq_signer: Option<&PqSignerFn>,
    ) -> ConsensusResult<()> {
        let number = header.number;
        let fork = self.params.fork_state(number);

        let vanity: [u8; EXTRA_VANITY] = {
            let mut v = [0u8; EXTRA_VANITY];
            let n = header.extra.len().min(EXTRA_VANITY);
            v[..n].copy_from_slice(&header.extra[..n]);
            v
        };
        let checkpoint_signers: &[Address] =
            if self.params.is_checkpoint(number) { signers } else { &[] };

        let mut unsealed = Vec::with_capacity(EXTRA_VANITY + checkpoint_signers.len() * 20);
        unsealed.extend_from_slice(&vanity);
        for signer in checkpoint_signers {
            unsealed.extend_from_slice(signer.as_bytes());
        }
        let seal_hash = header.seal_hash(&unsealed);

        let ecdsa_seal = ecdsa::sign_prehash(ecdsa_secret, &seal_hash)
            .map_err(|e| ConsensusError::InvalidSeal(e.to_string()))?;

        let pq_seal = if fork != ForkState::PreFork {
            match pq_signer {
                Some(sign) => {
                    let algorithm = self.params.default_mldsa_algorithm();
                    let (signature, public_key) = sign(algorithm, seal_hash.as_bytes())
                        .map_err(ConsensusError::InvalidPQSignature)?;
                    Some(PqSeal { algorithm, signature, public_key })
                }
                None if fork == ForkState::PostFork => {
                    return Err(ConsensusError::MissingPQSeal);
                }
                None => None,
            }
        } else {
            None
        };

        let extra =
            ExtraLayout::assemble(&vanity, checkpoint_signers, pq_seal.as_ref(), &ecdsa_seal);
        if extra.len() > MAX_EXTRA_SIZE {
            return Err(ConsensusError::ExtraTooLarge { size: extra.len(), max: MAX_EXTRA_SIZE });
        }
        header.extra = extra;
        Ok(())
    }
}

/// Recover the ECDSA seal signer; an all-zero seal means "absent".
fn recover_ecdsa_signer(
    seal_hash: &splendor_types::H256,
    seal: &[u8; EXTRA_SEAL],
) -> ConsensusResult<Option<Address>> {
    if seal.iter().all(|&b| b == 0) {
        return Ok(None);
    }
    ecdsa::recover(seal_hash, seal)
        .map(Some)
        .map_err(|e| ConsensusError::InvalidSeal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PostQuantumParams;

    const SEALER_SECRET: [u8; 32] = [0x61u8; 32];
    const FORK: u64 = 1_000;
    const TRANSITION: u64 = 200;

    fn sealer_address() -> Address {
        ecdsa::address_of(&SEALER_SECRET).unwrap()
    }

    fn params() -> ChainParams {
        ChainParams {
            chain_id: 1337,
            network: "splendor".to_string(),
            epoch_length: 30_000,
            period: 1,
            post_quantum: Some(PostQuantumParams {
                pqt_block: FORK,
                transition_blocks: TRANSITION,
                default_mldsa_algorithm: 65,
            }),
        }
    }

    fn engine() -> PqEngine {
        PqEngine::new(params(), Arc::new(ValidatorKeyRegistry::new()))
    }

    fn pq_keys() -> (Vec<u8>, Vec<u8>) {
        mldsa::generate(MlDsaAlgorithm::MlDsa65).unwrap()
    }

    fn pq_signer_fn(pk: Vec<u8>, sk: Vec<u8>) -> PqSignerFn {
        Box::new(move |algorithm, message| {
            let signature = mldsa::sign(algorithm, message, &sk)?;
            Ok((signature, pk.clone()))
        })
    }

    fn header_at(number: u64) -> Header {
        Header { number, timestamp: number, ..Default::default() }
    }

    #[test]
    fn pre_fork_headers_need_only_ecdsa() {
        let engine = engine();
        let mut header = header_at(10);
        engine.seal_header(&mut header, &[], &SEALER_SECRET, None).unwrap();

        let snapshot = SignerSnapshot::new([sealer_address()]);
        let signer = engine.verify_header_seals(&header, &snapshot).unwrap();
        assert_eq!(signer, sealer_address());
    }

    #[test]
    fn transition_accepts_missing_pq_seal() {
        let engine = engine();
        let mut header = header_at(FORK + 1);
        engine.seal_header(&mut header, &[], &SEALER_SECRET, None).unwrap();

        let snapshot = SignerSnapshot::new([sealer_address()]);
        engine.verify_header_seals(&header, &snapshot).unwrap();
    }

    #[test]
    fn transition_rejects_mismatched_dual_signers() {
        // A PQ public key derives an address unrelated to the ECDSA signer,
        // so dual-sealed headers must bind the two identities.
        let engine = engine();
        let (pk, sk) = pq_keys();
        let signer_fn = pq_signer_fn(pk, sk);

        let mut header = header_at(FORK + 1);
        engine.seal_header(&mut header, &[], &SEALER_SECRET, Some(&signer_fn)).unwrap();

        let snapshot = SignerSnapshot::new([sealer_address()]);
        let err = engine.verify_header_seals(&header, &snapshot).unwrap_err();
        assert!(matches!(err, ConsensusError::SignerMismatch { .. }));
    }

    #[test]
    fn enforced_era_requires_pq_seal() {
        let engine = engine();
        let mut header = header_at(FORK + TRANSITION);
        engine.seal_header(&mut header, &[], &SEALER_SECRET, None).unwrap_err();

        // A header that arrives sealed without the TLV is rejected.
        let mut legacy = header_at(FORK + TRANSITION);
        // Build its extra by sealing as if the fork were inactive.
        let pre_fork_engine = PqEngine::new(
            ChainParams { post_quantum: None, ..params() },
            Arc::new(ValidatorKeyRegistry::new()),
        );
        pre_fork_engine.seal_header(&mut legacy, &[], &SEALER_SECRET, None).unwrap();

        let snapshot = SignerSnapshot::new([sealer_address()]);
        let err = engine.verify_header_seals(&legacy, &snapshot).unwrap_err();
        assert_eq!(err, ConsensusError::MissingPQSeal);
    }

    #[test]
    fn enforced_era_accepts_valid_pq_seal() {
        let engine = engine();
        let (pk, sk) = pq_keys();
        let number = FORK + TRANSITION;

        let mut header = header_at(number);
        let algorithm = MlDsaAlgorithm::MlDsa65;
        let vanity = [0u8; EXTRA_VANITY];
        let seal_hash = header.seal_hash(&vanity);
        let signature = mldsa::sign(algorithm, seal_hash.as_bytes(), &sk).unwrap();
        let pq_seal = PqSeal { algorithm, signature, public_key: pk };
        let pq_address = pq_seal.signer();
        // PQ-only header: the ECDSA seal slot stays zeroed.
        header.extra =
            ExtraLayout::assemble(&vanity, &[], Some(&pq_seal), &[0u8; EXTRA_SEAL]);

        let snapshot = SignerSnapshot::new([pq_address]);
        let signer = engine.verify_header_seals(&header, &snapshot).unwrap();
        assert_eq!(signer, pq_address);
    }

    #[test]
    fn tampered_pq_signature_is_rejected() {
        let engine = engine();
        let (pk, sk) = pq_keys();
        let number = FORK + TRANSITION;

        let mut header = header_at(number);
        let vanity = [0u8; EXTRA_VANITY];
        let seal_hash = header.seal_hash(&vanity);
        let mut signature =
            mldsa::sign(MlDsaAlgorithm::MlDsa65, seal_hash.as_bytes(), &sk).unwrap();
        signature[0] ^= 0x01;
        let pq_seal =
            PqSeal { algorithm: MlDsaAlgorithm::MlDsa65, signature, public_key: pk };
        let pq_address = pq_seal.signer();
        header.extra = ExtraLayout::assemble(&vanity, &[], Some(&pq_seal), &[0u8; EXTRA_SEAL]);

        let snapshot = SignerSnapshot::new([pq_address]);
        let err = engine.verify_header_seals(&header, &snapshot).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidPQSignature(_)));
    }

    #[test]
    fn unauthorized_signer_is_rejected() {
        let engine = engine();
        let mut header = header_at(10);
        engine.seal_header(&mut header, &[], &SEALER_SECRET, None).unwrap();

        let snapshot = SignerSnapshot::new([Address([0xde; 20])]);
        let err = engine.verify_header_seals(&header, &snapshot).unwrap_err();
        assert!(matches!(err, ConsensusError::UnauthorizedSigner(_)));
    }

    #[test]
    fn recency_bound_blocks_consecutive_seals() {
        let engine = engine();
        let mut snapshot =
            SignerSnapshot::new([sealer_address(), Address([1; 20]), Address([2; 20])]);

        let mut header = header_at(100);
        engine.seal_header(&mut header, &[], &SEALER_SECRET, None).unwrap();
        engine.verify_header_seals(&header, &snapshot).unwrap();
        snapshot.mark_signed(100, sealer_address());

        let mut next = header_at(101);
        engine.seal_header(&mut next, &[], &SEALER_SECRET, None).unwrap();
        let err = engine.verify_header_seals(&next, &snapshot).unwrap_err();
        assert!(matches!(err, ConsensusError::RecentlySigned(_)));

        // After floor(3/2) + 1 = 2 blocks the signer is allowed again.
        let mut later = header_at(102);
        engine.seal_header(&mut later, &[], &SEALER_SECRET, None).unwrap();
        engine.verify_header_seals(&later, &snapshot).unwrap();
    }

    #[test]
    fn checkpoint_headers_carry_the_signer_list() {
        // Short epochs so a checkpoint lands before the fork activates.
        let engine = PqEngine::new(
            ChainParams { epoch_length: 500, ..params() },
            Arc::new(ValidatorKeyRegistry::new()),
        );
        let signers = vec![sealer_address(), Address([0x02; 20])];
        let mut header = header_at(500);
        engine.seal_header(&mut header, &signers, &SEALER_SECRET, None).unwrap();

        let layout = ExtraLayout::parse(&header.extra, true).unwrap();
        assert_eq!(layout.signers, signers);

        let snapshot = SignerSnapshot::new(signers);
        engine.verify_header_seals(&header, &snapshot).unwrap();
    }

    #[test]
    fn sealed_extra_respects_size_ceiling() {
        let engine = engine();
        let (pk, sk) = pq_keys();
        let signer_fn = pq_signer_fn(pk, sk);
        let mut header = header_at(FORK + 1);
        engine.seal_header(&mut header, &[], &SEALER_SECRET, Some(&signer_fn)).unwrap();
        assert!(header.extra.len() <= MAX_EXTRA_SIZE);
        // ECDSA seal is the final 65 bytes even with a PQ seal spliced in.
        let layout = ExtraLayout::parse(&header.extra, false).unwrap();
        assert!(layout.pq_seal.is_some());
        assert_ne!(layout.ecdsa_seal, [0u8; EXTRA_SEAL]);
    }
}
