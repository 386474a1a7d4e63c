//! # splendor-crypto
//!
//! Cryptographic primitives shared across the node:
//! - secp256k1 signing, verification, and public-key recovery (`ecdsa`)
//! - EIP-191 personal-message hashing (`ecdsa::eip191_hash`)
//! - ML-DSA post-quantum signatures over variants 44/65/87 (`mldsa`)
//!
//! ML-DSA is feature-gated behind `pq` (on by default). Without it the node
//! still boots and runs ECDSA-only chains; see [`mldsa`] for the degraded
//! contract.

pub mod ecdsa;
pub mod mldsa;

pub use ecdsa::{EcdsaError, EcdsaResult};
pub use mldsa::{MlDsaAlgorithm, MlDsaError, MlDsaResult};
