//! # splendor-state
//!
//! Account state for the Splendor node. The chain state is mutated only by
//! the block executor through a [`StateWriter`] (single writer during
//! execution); everything else reads through cheap snapshot views. The
//! anti-replay registry for x402 payments lives in-state under a reserved
//! system address so replay protection survives restarts with the chain.

mod antireplay;
mod error;
mod state;
mod store;

pub use antireplay::{antireplay_key, PrecheckSet, ANTI_REPLAY_ADDRESS};
pub use error::{StateError, StateResult};
pub use state::{Account, ChainState, StateReader, StateSnapshot, StateWriter};
pub use store::{BlockStore, StoredBlock};
