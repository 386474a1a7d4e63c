//! GPU subsystem errors.

use thiserror::Error;

/// Errors surfaced by batch submission and processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The bounded queue for this batch kind is at capacity. Upstream either
    /// retries, backpressures, or processes on the CPU directly.
    #[error("{kind} processing queue full")]
    QueueFull { kind: &'static str },

    /// The processor is shutting down; queued work is drained with this error.
    #[error("gpu processor shut down")]
    Cancelled,

    /// A batch's parallel input arrays disagree in length.
    #[error("mismatched batch inputs: {signatures} signatures, {messages} messages, {keys} keys")]
    InputMismatch { signatures: usize, messages: usize, keys: usize },

    /// The batch exceeds the configured maximum item count. Upstream splits
    /// it or runs it on the CPU.
    #[error("batch of {size} items exceeds maximum {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// The accelerator entry point reported a failure (non-zero status).
    /// Callers never observe this directly; the batch re-runs on the CPU.
    #[error("accelerator call failed with status {0}")]
    AcceleratorFailed(i32),
}

/// Result type for GPU operations.
pub type GpuResult<T> = Result<T, GpuError>;
