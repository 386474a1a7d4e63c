//! # splendor-consensus
//!
//! Consensus-layer hooks for the post-quantum transition and x402 execution:
//! - the fork schedule (`PreFork` → `DualSigning` → `PostFork`)
//! - TLV encoding of ML-DSA seals inside the header extra field
//! - header seal production and verification (ECDSA always, ML-DSA per fork
//!   state), with signer authorisation and recency checks
//! - the validator PQ key registry with automatic rotation
//! - the block executor, which applies payment settlements to state and
//!   produces receipts

mod engine;
mod error;
mod executor;
mod params;
mod pqseal;
mod registry;

pub use engine::{PqEngine, PqSignerFn, SignerSnapshot};
pub use error::{ConsensusError, ConsensusResult};
pub use executor::{BlockExecutor, ExecutedBlock};
pub use params::{ChainParams, ForkState, PostQuantumParams, MAX_EXTRA_SIZE, MAX_VALIDATORS};
pub use pqseal::{ExtraLayout, PqSeal, PQ_TLV_HEADER_SIZE};
pub use registry::{PqValidatorKey, ValidatorKeyRegistry, KEY_ROTATION_INTERVAL};
