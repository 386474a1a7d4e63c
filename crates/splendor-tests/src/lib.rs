//! # splendor-tests
//!
//! Integration and property tests for the Splendor node, plus the shared
//! harness they run on. Scenario coverage follows the end-to-end payment,
//! GPU fallback, and post-quantum sealing flows; property tests pin the
//! codec round-trip laws and the scheduler's adaptive-sizing shape.

pub mod harness;
