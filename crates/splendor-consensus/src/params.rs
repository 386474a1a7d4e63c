//! Chain parameters and the post-quantum fork schedule.

use serde::{Deserialize, Serialize};
use splendor_crypto::MlDsaAlgorithm;

/// Validators accounted for when sizing the header extra field.
pub const MAX_VALIDATORS: usize = 50;

/// Hard ceiling for the header extra field: vanity, a full checkpoint signer
/// list, one ML-DSA-65 seal (signature plus public key in TLV form), the
/// ECDSA seal, and slack for encoding overhead.
pub const MAX_EXTRA_SIZE: usize = 32 + MAX_VALIDATORS * 20 + 9 + 3309 + 1952 + 65 + 1024;

/// Where a block number falls in the post-quantum transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkState {
    /// Before activation: ECDSA only, PQ seals are not checked.
    PreFork,
    /// Transition window: ECDSA required, ML-DSA verified when present and
    /// its signer must match the ECDSA signer.
    DualSigning,
    /// After the transition: an ML-DSA seal is mandatory.
    PostFork,
}

/// Post-quantum fork configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostQuantumParams {
    /// Activation block for the transition.
    pub pqt_block: u64,
    /// Length of the dual-signing window in blocks (~24h at 12s blocks).
    #[serde(default = "default_transition_blocks")]
    pub transition_blocks: u64,
    /// Default ML-DSA variant for sealing: 44, 65, or 87.
    #[serde(default = "default_algorithm_variant")]
    pub default_mldsa_algorithm: u32,
}

fn default_transition_blocks() -> u64 {
    7200
}

fn default_algorithm_variant() -> u32 {
    65
}

impl PostQuantumParams {
    pub fn default_algorithm(&self) -> MlDsaAlgorithm {
        MlDsaAlgorithm::from_variant(self.default_mldsa_algorithm)
            .unwrap_or(MlDsaAlgorithm::MlDsa65)
    }

    fn enforce_block(&self) -> u64 {
        let transition = if self.transition_blocks == 0 {
            default_transition_blocks()
        } else {
            self.transition_blocks
        };
        self.pqt_block.saturating_add(transition)
    }
}

/// Chain-wide parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    pub network: String,
    /// Checkpoint interval: headers at multiples of this carry the signer
    /// list in their extra field.
    pub epoch_length: u64,
    /// Target seconds between blocks.
    pub period: u64,
    pub post_quantum: Option<PostQuantumParams>,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: 2691,
            network: "splendor".to_string(),
            epoch_length: 30_000,
            period: 1,
            post_quantum: None,
        }
    }
}

impl ChainParams {
    pub fn is_checkpoint(&self, number: u64) -> bool {
        self.epoch_length > 0 && number % self.epoch_length == 0
    }

    /// Fork state for a block number.
    pub fn fork_state(&self, number: u64) -> ForkState {
        match &self.post_quantum {
            None => ForkState::PreFork,
            Some(pq) if number < pq.pqt_block => ForkState::PreFork,
            Some(pq) if number < pq.enforce_block() => ForkState::DualSigning,
            Some(_) => ForkState::PostFork,
        }
    }

    pub fn is_pq_active(&self, number: u64) -> bool {
        self.fork_state(number) != ForkState::PreFork
    }

    pub fn default_mldsa_algorithm(&self) -> MlDsaAlgorithm {
        self.post_quantum
            .as_ref()
            .map(|pq| pq.default_algorithm())
            .unwrap_or(MlDsaAlgorithm::MlDsa65)
    }
}
