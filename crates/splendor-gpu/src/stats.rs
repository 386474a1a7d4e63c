//! Processor statistics.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::accel::GpuType;

/// Batch kinds tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Hash,
    Signature,
    Tx,
}

/// Per-kind statistics snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindStats {
    pub processed_batches: u64,
    pub processed_items: u64,
    pub avg_time_ms: f64,
    pub truncated_items: u64,
    pub queue_depth: usize,
}

/// Full processor statistics snapshot, shaped for the RPC surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuStats {
    pub gpu_type: GpuType,
    pub device_count: usize,
    pub available: bool,
    pub hash: KindStats,
    pub signature: KindStats,
    pub tx: KindStats,
}

#[derive(Default)]
struct KindCounters {
    processed_batches: AtomicU64,
    processed_items: AtomicU64,
    truncated_items: AtomicU64,
    busy_micros: AtomicU64,
    // Exponentially averaged wall time, matching avg' = (avg + sample) / 2.
    avg_time_ms: Mutex<f64>,
}

/// Shared counters updated by workers and read by the RPC surface and the
/// hybrid scheduler.
#[derive(Default)]
pub struct StatsRegistry {
    hash: KindCounters,
    signature: KindCounters,
    tx: KindCounters,
}

impl StatsRegistry {
    fn kind(&self, kind: Kind) -> &KindCounters {
        match kind {
            Kind::Hash => &self.hash,
            Kind::Signature => &self.signature,
            Kind::Tx => &self.tx,
        }
    }

    pub fn record_batch(&self, kind: Kind, items: usize, elapsed: Duration) {
        let counters = self.kind(kind);
        counters.processed_batches.fetch_add(1, Ordering::Relaxed);
        counters.processed_items.fetch_add(items as u64, Ordering::Relaxed);
        counters.busy_micros.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let sample_ms = elapsed.as_secs_f64() * 1000.0;
        let mut avg = counters.avg_time_ms.lock();
        *avg = if *avg == 0.0 { sample_ms } else { (*avg + sample_ms) / 2.0 };
    }

    pub fn record_truncated(&self, kind: Kind, count: usize) {
        if count > 0 {
            self.kind(kind).truncated_items.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Total busy time across all kinds since the last call, for utilisation
    /// estimates. Resets the accumulators.
    pub fn take_busy_micros(&self) -> u64 {
        [&self.hash, &self.signature, &self.tx]
            .iter()
            .map(|c| c.busy_micros.swap(0, Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot_kind(&self, kind: Kind, queue_depth: usize) -> KindStats {
        let counters = self.kind(kind);
        KindStats {
            processed_batches: counters.processed_batches.load(Ordering::Relaxed),
            processed_items: counters.processed_items.load(Ordering::Relaxed),
            avg_time_ms: *counters.avg_time_ms.lock(),
            truncated_items: counters.truncated_items.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}
