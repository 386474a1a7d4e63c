//! # splendor-gpu
//!
//! Batched accelerator offload for the hot paths of block processing:
//! Keccak-256 hashing, secp256k1 signature verification, and transaction
//! decoding. Batches are packed into fixed-width slots, handed to a CUDA or
//! OpenCL backend when one probed successfully at startup, and re-run on the
//! CPU whenever the accelerator is absent, returns an error, or panics.
//!
//! The [`hybrid`] module layers an adaptive CPU/GPU scheduler on top of the
//! raw processor, splitting each batch according to live telemetry.

mod accel;
mod batch;
mod cpu;
mod error;
pub mod hybrid;
mod pool;
mod processor;
mod stats;

pub use accel::GpuType;
pub use batch::{
    pack_slots, unpack_digests, SlotBuffer, TxResult, HASH_SLOT_WIDTH, TX_RESULT_STRIDE,
    TX_SLOT_WIDTH,
};
pub use error::{GpuError, GpuResult};
pub use hybrid::{batch_size_for_ratio, HybridConfig, HybridScheduler, HybridStats, Strategy};
pub use processor::{GpuConfig, GpuProcessor, PreferredGpu};
pub use stats::{GpuStats, KindStats};
