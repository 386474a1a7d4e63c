//! Adaptive CPU/GPU batch scheduling.
//!
//! Small batches stay on the CPU. Large batches are split by a live CPU
//! share `r`: the first `r*N` items run on the CPU worker pool while the rest
//! go through the GPU processor, and the two result halves are rejoined in
//! input order. A fixed-cadence tick recomputes throughput and utilisation
//! and nudges `r` to keep both sides inside their configured ceilings.

use crate::batch::TxResult;
use crate::cpu;
use crate::error::{GpuError, GpuResult};
use crate::processor::GpuProcessor;
use crossbeam_channel::bounded;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use splendor_types::H256;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Processing strategy in force for large batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    CpuOnly,
    GpuOnly,
    Hybrid,
}

/// Hybrid scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    /// Batches below this size run entirely on the CPU.
    pub gpu_threshold: usize,
    /// Starting CPU share for hybrid batches (0.15 = 15% CPU).
    pub cpu_gpu_ratio: f64,
    /// Items per second the scheduler grows toward.
    pub throughput_target: f64,
    /// Recompute stats and adapt the split on this cadence.
    pub stats_interval_ms: u64,
    /// Whether the tick adjusts the split at all.
    pub adaptive_load_balancing: bool,
    pub max_cpu_utilization: f64,
    pub max_gpu_utilization: f64,
    /// Bounds for adaptive batch sizing.
    pub min_batch_size: usize,
    pub max_batch_size: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            gpu_threshold: 1000,
            cpu_gpu_ratio: 0.15,
            throughput_target: 100_000.0,
            stats_interval_ms: 500,
            adaptive_load_balancing: true,
            max_cpu_utilization: 0.85,
            max_gpu_utilization: 0.90,
            min_batch_size: 1_000,
            max_batch_size: 100_000,
        }
    }
}

/// Live scheduler statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridStats {
    pub current_tps: f64,
    pub cpu_utilization: f64,
    pub gpu_utilization: f64,
    pub avg_latency_ms: f64,
    pub queue_depth: usize,
    pub strategy: Strategy,
}

#[derive(Default)]
struct Telemetry {
    items: AtomicU64,
    batches: AtomicU64,
    cpu_busy_micros: AtomicU64,
    latency_micros: AtomicU64,
}

/// Partitions batches between the CPU pool and the GPU processor.
pub struct HybridScheduler {
    processor: Arc<GpuProcessor>,
    config: HybridConfig,
    strategy: RwLock<Strategy>,
    cpu_ratio: RwLock<f64>,
    stats: RwLock<HybridStats>,
    telemetry: Telemetry,
    last_tick: RwLock<Instant>,
    shutdown: Arc<AtomicBool>,
}

impl HybridScheduler {
    pub fn new(processor: Arc<GpuProcessor>, config: HybridConfig) -> Arc<Self> {
        let strategy =
            if processor.is_gpu_available() { Strategy::Hybrid } else { Strategy::CpuOnly };
        let cpu_ratio = config.cpu_gpu_ratio.clamp(0.0, 1.0);
        info!(?strategy, cpu_ratio, "Hybrid scheduler initialized");

        Arc::new(Self {
            processor,
            stats: RwLock::new(HybridStats {
                current_tps: 0.0,
                cpu_utilization: 0.0,
                gpu_utilization: 0.0,
                avg_latency_ms: 0.0,
                queue_depth: 0,
                strategy,
            }),
            strategy: RwLock::new(strategy),
            cpu_ratio: RwLock::new(cpu_ratio),
            telemetry: Telemetry::default(),
            last_tick: RwLock::new(Instant::now()),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn strategy(&self) -> Strategy {
        *self.strategy.read()
    }

    /// Force a strategy; `Hybrid` and `GpuOnly` fall back to `CpuOnly` when
    /// no accelerator is bound.
    pub fn set_strategy(&self, strategy: Strategy) {
        let effective = if self.processor.is_gpu_available() { strategy } else { Strategy::CpuOnly };
        *self.strategy.write() = effective;
        self.stats.write().strategy = effective;
    }

    /// Hash a batch, preserving input order in the results.
    pub fn process_hashes(&self, inputs: Vec<Vec<u8>>) -> GpuResult<Vec<H256>> {
        self.run_split(
            inputs,
            |cpu_part| cpu::hash_batch(cpu_part),
            |processor, gpu_part, done| {
                processor.submit_hashes(gpu_part, move |result| {
                    let _ = done.send(result);
                })
            },
        )
    }

    /// Verify a signature batch, preserving input order.
    pub fn process_signatures(
        &self,
        signatures: Vec<Vec<u8>>,
        messages: Vec<Vec<u8>>,
        public_keys: Vec<Vec<u8>>,
    ) -> GpuResult<Vec<bool>> {
        if signatures.len() != messages.len() || messages.len() != public_keys.len() {
            return Err(GpuError::InputMismatch {
                signatures: signatures.len(),
                messages: messages.len(),
                keys: public_keys.len(),
            });
        }
        let n = signatures.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let cpu_count = self.cpu_share(n);

        let mut sig_cpu = signatures;
        let sig_gpu = sig_cpu.split_off(cpu_count);
        let mut msg_cpu = messages;
        let msg_gpu = msg_cpu.split_off(cpu_count);
        let mut key_cpu = public_keys;
        let key_gpu = key_cpu.split_off(cpu_count);

        let (done_tx, done_rx) = bounded(1);
        let gpu_submitted = if sig_gpu.is_empty() {
            false
        } else {
            match self.processor.submit_signatures(
                sig_gpu.clone(),
                msg_gpu.clone(),
                key_gpu.clone(),
                move |result| {
                    let _ = done_tx.send(result);
                },
            ) {
                Ok(()) => true,
                Err(GpuError::QueueFull { .. })
                | Err(GpuError::BatchTooLarge { .. })
                | Err(GpuError::Cancelled) => {
                    // Backpressure: run the would-be GPU share on the CPU too.
                    debug!("GPU signature queue saturated, diverting batch to CPU");
                    sig_cpu.extend(sig_gpu);
                    msg_cpu.extend(msg_gpu);
                    key_cpu.extend(key_gpu);
                    false
                }
                Err(e) => return Err(e),
            }
        };

        let cpu_start = Instant::now();
        let mut results = cpu::verify_signatures_batch(&sig_cpu, &msg_cpu, &key_cpu);
        self.telemetry
            .cpu_busy_micros
            .fetch_add(cpu_start.elapsed().as_micros() as u64, Ordering::Relaxed);

        if gpu_submitted {
            let gpu_results = done_rx.recv().map_err(|_| GpuError::Cancelled)??;
            results.extend(gpu_results);
        }
        self.record(n, start.elapsed());
        Ok(results)
    }

    /// Decode a transaction batch, preserving input order.
    pub fn process_transactions(&self, raw_txs: Vec<Vec<u8>>) -> GpuResult<Vec<TxResult>> {
        self.run_split(
            raw_txs,
            |cpu_part| cpu::decode_transactions_batch(cpu_part),
            |processor, gpu_part, done| {
                processor.submit_transactions(gpu_part, move |result| {
                    let _ = done.send(result);
                })
            },
        )
    }

    fn run_split<T: Send + 'static>(
        &self,
        inputs: Vec<Vec<u8>>,
        cpu_fn: impl Fn(&[Vec<u8>]) -> Vec<T>,
        gpu_fn: impl Fn(
            &GpuProcessor,
            Vec<Vec<u8>>,
            crossbeam_channel::Sender<GpuResult<Vec<T>>>,
        ) -> GpuResult<()>,
    ) -> GpuResult<Vec<T>> {
        let n = inputs.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let cpu_count = self.cpu_share(n);

        let mut cpu_part = inputs;
        let gpu_part = cpu_part.split_off(cpu_count);

        let (done_tx, done_rx) = bounded(1);
        let gpu_submitted = if gpu_part.is_empty() {
            false
        } else {
            match gpu_fn(&self.processor, gpu_part.clone(), done_tx) {
                Ok(()) => true,
                Err(GpuError::QueueFull { .. })
                | Err(GpuError::BatchTooLarge { .. })
                | Err(GpuError::Cancelled) => {
                    debug!("GPU queue saturated, diverting batch to CPU");
                    cpu_part.extend(gpu_part);
                    false
                }
                Err(e) => return Err(e),
            }
        };

        let cpu_start = Instant::now();
        let mut results = cpu_fn(&cpu_part);
        self.telemetry
            .cpu_busy_micros
            .fetch_add(cpu_start.elapsed().as_micros() as u64, Ordering::Relaxed);

        if gpu_submitted {
            let gpu_results = done_rx.recv().map_err(|_| GpuError::Cancelled)??;
            results.extend(gpu_results);
        }
        self.record(n, start.elapsed());
        Ok(results)
    }

    /// Items assigned to the CPU for a batch of `n`.
    fn cpu_share(&self, n: usize) -> usize {
        if n < self.config.gpu_threshold || !self.processor.is_gpu_available() {
            return n;
        }
        match self.strategy() {
            Strategy::CpuOnly => n,
            Strategy::GpuOnly => 0,
            Strategy::Hybrid => {
                let r = *self.cpu_ratio.read();
                ((n as f64 * r).round() as usize).min(n)
            }
        }
    }

    fn record(&self, items: usize, latency: Duration) {
        self.telemetry.items.fetch_add(items as u64, Ordering::Relaxed);
        self.telemetry.batches.fetch_add(1, Ordering::Relaxed);
        self.telemetry
            .latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Recompute stats from telemetry and adapt the CPU/GPU split. Called on
    /// a fixed cadence by the ticker, or directly by tests.
    pub fn tick(&self) {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_tick.write();
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };
        let elapsed_s = elapsed.as_secs_f64().max(1e-6);

        let items = self.telemetry.items.swap(0, Ordering::Relaxed);
        let batches = self.telemetry.batches.swap(0, Ordering::Relaxed);
        let cpu_busy = self.telemetry.cpu_busy_micros.swap(0, Ordering::Relaxed);
        let latency = self.telemetry.latency_micros.swap(0, Ordering::Relaxed);
        let gpu_busy = self.processor.take_busy_micros();

        let cpu_workers = rayon::current_num_threads().max(1) as f64;
        let gpu_workers = (self.processor.config().hash_workers
            + self.processor.config().signature_workers
            + self.processor.config().tx_workers)
            .max(1) as f64;

        let current_tps = items as f64 / elapsed_s;
        let cpu_utilization =
            (cpu_busy as f64 / 1e6 / (elapsed_s * cpu_workers)).clamp(0.0, 1.0);
        let gpu_utilization =
            (gpu_busy as f64 / 1e6 / (elapsed_s * gpu_workers)).clamp(0.0, 1.0);
        let avg_latency_ms =
            if batches > 0 { latency as f64 / 1000.0 / batches as f64 } else { 0.0 };

        {
            let mut stats = self.stats.write();
            stats.current_tps = current_tps;
            stats.cpu_utilization = cpu_utilization;
            stats.gpu_utilization = gpu_utilization;
            stats.avg_latency_ms = avg_latency_ms;
            stats.queue_depth = self.processor.queue_depth();
            stats.strategy = self.strategy();
        }

        if self.config.adaptive_load_balancing && self.strategy() == Strategy::Hybrid {
            self.adapt(current_tps, cpu_utilization, gpu_utilization);
        }
    }

    fn adapt(&self, tps: f64, cpu_util: f64, gpu_util: f64) {
        let mut ratio = self.cpu_ratio.write();
        let before = *ratio;
        if cpu_util > self.config.max_cpu_utilization {
            *ratio -= 0.05;
        } else if gpu_util > self.config.max_gpu_utilization {
            *ratio += 0.05;
        } else if tps < self.config.throughput_target {
            // Headroom on both sides: lean on the accelerator for throughput.
            *ratio -= 0.01;
        }
        *ratio = ratio.clamp(0.0, 1.0);
        if (*ratio - before).abs() > f64::EPSILON {
            debug!(from = before, to = *ratio, "Adjusted CPU/GPU split");
        }
    }

    /// Recommended batch size given how close current throughput is to the
    /// target. Growth is monotone in the ratio and its increments shrink as
    /// the target nears.
    pub fn adaptive_batch_size(&self) -> usize {
        let stats = self.stats.read();
        let ratio = if self.config.throughput_target > 0.0 {
            stats.current_tps / self.config.throughput_target
        } else {
            0.0
        };
        batch_size_for_ratio(self.config.min_batch_size, self.config.max_batch_size, ratio)
    }

    pub fn stats(&self) -> HybridStats {
        self.stats.read().clone()
    }

    /// Spawn the stats ticker thread; it runs until [`Self::stop`].
    pub fn spawn_ticker(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let interval = Duration::from_millis(self.config.stats_interval_ms.max(1));
        std::thread::Builder::new()
            .name("hybrid-ticker".to_string())
            .spawn(move || {
                while !scheduler.shutdown.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    scheduler.tick();
                }
            })
            .expect("spawn hybrid ticker")
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Batch size for a throughput ratio in `[0, 1]`: concave growth from
/// `min` to `max` along a square root, so size increases slow down as the
/// target is approached.
pub fn batch_size_for_ratio(min: usize, max: usize, tps_ratio: f64) -> usize {
    let clamped = tps_ratio.clamp(0.0, 1.0);
    let span = max.saturating_sub(min) as f64;
    min + (span * clamped.sqrt()).round() as usize
}
