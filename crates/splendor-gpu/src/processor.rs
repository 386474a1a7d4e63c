//! The batched GPU processor.
//!
//! Three bounded queues (hash, signature, transaction), each drained by a
//! fixed pool of worker threads. A worker packs its batch into fixed-width
//! slots from the shared buffer pool, invokes the accelerator entry point,
//! unpacks, and fires the batch callback exactly once. Accelerator errors and
//! panics are absorbed by re-running the batch on the CPU.

use crate::accel::{self, Accelerator, GpuType};
use crate::batch::{
    pack_slots, unpack_digests, TxResult, HASH_SLOT_WIDTH, TX_RESULT_STRIDE, TX_SLOT_WIDTH,
};
use crate::cpu;
use crate::error::{GpuError, GpuResult};
use crate::pool::BufferPool;
use crate::stats::{GpuStats, Kind, StatsRegistry};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use splendor_types::H256;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{error, info, warn};

/// Probe order preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PreferredGpu {
    #[default]
    Cuda,
    Opencl,
}

/// GPU processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Master switch; disabled means CPU-only without probing.
    pub enabled: bool,
    /// Which backend to probe first.
    pub preferred_gpu_type: PreferredGpu,
    /// Largest item count accepted per batch.
    pub max_batch_size: usize,
    /// Device memory ceiling in bytes.
    pub max_memory_usage: u64,
    pub hash_workers: usize,
    pub signature_workers: usize,
    pub tx_workers: usize,
    /// Bounded queue capacity per batch kind.
    pub queue_capacity: usize,
    pub enable_pipelining: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preferred_gpu_type: PreferredGpu::Cuda,
            max_batch_size: 100_000,
            max_memory_usage: 12 * 1024 * 1024 * 1024,
            hash_workers: 32,
            signature_workers: 32,
            tx_workers: 32,
            queue_capacity: 100,
            enable_pipelining: true,
        }
    }
}

type HashCallback = Box<dyn FnOnce(GpuResult<Vec<H256>>) + Send + 'static>;
type SigCallback = Box<dyn FnOnce(GpuResult<Vec<bool>>) + Send + 'static>;
type TxCallback = Box<dyn FnOnce(GpuResult<Vec<TxResult>>) + Send + 'static>;

struct HashBatch {
    inputs: Vec<Vec<u8>>,
    callback: HashCallback,
}

struct SignatureBatch {
    signatures: Vec<Vec<u8>>,
    messages: Vec<Vec<u8>>,
    public_keys: Vec<Vec<u8>>,
    callback: SigCallback,
}

struct TxBatch {
    raw_txs: Vec<Vec<u8>>,
    callback: TxCallback,
}

/// Batched accelerator offload with CPU fallback.
pub struct GpuProcessor {
    backend: Option<Arc<dyn Accelerator>>,
    gpu_type: GpuType,
    device_count: usize,
    hash_tx: Mutex<Option<Sender<HashBatch>>>,
    sig_tx: Mutex<Option<Sender<SignatureBatch>>>,
    tx_tx: Mutex<Option<Sender<TxBatch>>>,
    hash_rx: Receiver<HashBatch>,
    sig_rx: Receiver<SignatureBatch>,
    tx_rx: Receiver<TxBatch>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<StatsRegistry>,
    pool: Arc<BufferPool>,
    config: GpuConfig,
}

impl GpuProcessor {
    /// Create the processor, probe for an accelerator, and start the worker
    /// pools. Probe failure is not an error: the processor runs CPU-only.
    pub fn new(config: GpuConfig) -> Arc<Self> {
        let backend: Option<Arc<dyn Accelerator>> = if config.enabled {
            accel::probe(config.preferred_gpu_type == PreferredGpu::Cuda).map(Arc::from)
        } else {
            None
        };
        let (gpu_type, device_count) = match &backend {
            Some(b) => (b.gpu_type(), b.device_count()),
            None => (GpuType::None, 0),
        };
        if backend.is_none() && config.enabled {
            warn!("GPU initialization failed, falling back to CPU");
        }

        let (hash_tx, hash_rx) = bounded(config.queue_capacity);
        let (sig_tx, sig_rx) = bounded(config.queue_capacity);
        let (tx_tx, tx_rx) = bounded(config.queue_capacity);

        let processor = Arc::new(Self {
            backend,
            gpu_type,
            device_count,
            hash_tx: Mutex::new(Some(hash_tx)),
            sig_tx: Mutex::new(Some(sig_tx)),
            tx_tx: Mutex::new(Some(tx_tx)),
            hash_rx,
            sig_rx,
            tx_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            stats: Arc::new(StatsRegistry::default()),
            pool: Arc::new(BufferPool::new(64)),
            config,
        });

        processor.start_workers();

        info!(
            gpu_type = ?processor.gpu_type,
            devices = processor.device_count,
            max_batch = processor.config.max_batch_size,
            "GPU processor initialized"
        );
        processor
    }

    fn start_workers(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        for i in 0..self.config.hash_workers {
            let p = Arc::clone(self);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("gpu-hash-{i}"))
                    .spawn(move || p.hash_worker())
                    .expect("spawn hash worker"),
            );
        }
        for i in 0..self.config.signature_workers {
            let p = Arc::clone(self);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("gpu-sig-{i}"))
                    .spawn(move || p.signature_worker())
                    .expect("spawn signature worker"),
            );
        }
        for i in 0..self.config.tx_workers {
            let p = Arc::clone(self);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("gpu-tx-{i}"))
                    .spawn(move || p.tx_worker())
                    .expect("spawn tx worker"),
            );
        }
    }

    /// Whether an accelerator was bound at startup.
    pub fn is_gpu_available(&self) -> bool {
        self.gpu_type.is_available()
    }

    pub fn gpu_type(&self) -> GpuType {
        self.gpu_type
    }

    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    /// Enqueue a Keccak-256 batch. The callback receives one digest per
    /// input, or an error; it fires exactly once for every accepted batch.
    ///
    /// An empty batch completes immediately without touching the queue.
    pub fn submit_hashes(
        &self,
        inputs: Vec<Vec<u8>>,
        callback: impl FnOnce(GpuResult<Vec<H256>>) + Send + 'static,
    ) -> GpuResult<()> {
        if inputs.is_empty() {
            callback(Ok(Vec::new()));
            return Ok(());
        }
        if inputs.len() > self.config.max_batch_size {
            return Err(GpuError::BatchTooLarge {
                size: inputs.len(),
                max: self.config.max_batch_size,
            });
        }
        let batch = HashBatch { inputs, callback: Box::new(callback) };
        let guard = self.hash_tx.lock();
        let Some(sender) = guard.as_ref() else {
            (batch.callback)(Err(GpuError::Cancelled));
            return Err(GpuError::Cancelled);
        };
        sender.try_send(batch).map_err(|e| drop_full(e, "hash"))
    }

    /// Enqueue a secp256k1 verification batch; the callback receives one
    /// boolean per item.
    pub fn submit_signatures(
        &self,
        signatures: Vec<Vec<u8>>,
        messages: Vec<Vec<u8>>,
        public_keys: Vec<Vec<u8>>,
        callback: impl FnOnce(GpuResult<Vec<bool>>) + Send + 'static,
    ) -> GpuResult<()> {
        if signatures.len() != messages.len() || messages.len() != public_keys.len() {
            return Err(GpuError::InputMismatch {
                signatures: signatures.len(),
                messages: messages.len(),
                keys: public_keys.len(),
            });
        }
        if signatures.is_empty() {
            callback(Ok(Vec::new()));
            return Ok(());
        }
        if signatures.len() > self.config.max_batch_size {
            return Err(GpuError::BatchTooLarge {
                size: signatures.len(),
                max: self.config.max_batch_size,
            });
        }
        let batch =
            SignatureBatch { signatures, messages, public_keys, callback: Box::new(callback) };
        let guard = self.sig_tx.lock();
        let Some(sender) = guard.as_ref() else {
            (batch.callback)(Err(GpuError::Cancelled));
            return Err(GpuError::Cancelled);
        };
        sender.try_send(batch).map_err(|e| drop_full(e, "signature"))
    }

    /// Enqueue a transaction decode batch; the callback receives one
    /// [`TxResult`] per raw transaction.
    pub fn submit_transactions(
        &self,
        raw_txs: Vec<Vec<u8>>,
        callback: impl FnOnce(GpuResult<Vec<TxResult>>) + Send + 'static,
    ) -> GpuResult<()> {
        if raw_txs.is_empty() {
            callback(Ok(Vec::new()));
            return Ok(());
        }
        if raw_txs.len() > self.config.max_batch_size {
            return Err(GpuError::BatchTooLarge {
                size: raw_txs.len(),
                max: self.config.max_batch_size,
            });
        }
        let batch = TxBatch { raw_txs, callback: Box::new(callback) };
        let guard = self.tx_tx.lock();
        let Some(sender) = guard.as_ref() else {
            (batch.callback)(Err(GpuError::Cancelled));
            return Err(GpuError::Cancelled);
        };
        sender.try_send(batch).map_err(|e| drop_full(e, "transaction"))
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> GpuStats {
        GpuStats {
            gpu_type: self.gpu_type,
            device_count: self.device_count,
            available: self.is_gpu_available(),
            hash: self.stats.snapshot_kind(Kind::Hash, self.hash_rx.len()),
            signature: self.stats.snapshot_kind(Kind::Signature, self.sig_rx.len()),
            tx: self.stats.snapshot_kind(Kind::Tx, self.tx_rx.len()),
        }
    }

    /// Busy-time accumulator for the hybrid scheduler; resets on read.
    pub fn take_busy_micros(&self) -> u64 {
        self.stats.take_busy_micros()
    }

    /// Total queued batches across all kinds.
    pub fn queue_depth(&self) -> usize {
        self.hash_rx.len() + self.sig_rx.len() + self.tx_rx.len()
    }

    /// Stop accepting work, cancel queued batches, and join all workers.
    /// Queued batches fire their callbacks with [`GpuError::Cancelled`].
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down GPU processor");
        // Dropping the senders disconnects the queues so blocked workers wake.
        self.hash_tx.lock().take();
        self.sig_tx.lock().take();
        self.tx_tx.lock().take();

        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        info!("GPU processor shutdown complete");
    }

    fn hash_worker(&self) {
        while let Ok(batch) = self.hash_rx.recv() {
            if self.shutdown.load(Ordering::SeqCst) {
                (batch.callback)(Err(GpuError::Cancelled));
                continue;
            }
            let start = Instant::now();
            let count = batch.inputs.len();
            let results = self.run_hashes(batch.inputs);
            self.stats.record_batch(Kind::Hash, count, start.elapsed());
            (batch.callback)(Ok(results));
        }
    }

    fn signature_worker(&self) {
        while let Ok(batch) = self.sig_rx.recv() {
            if self.shutdown.load(Ordering::SeqCst) {
                (batch.callback)(Err(GpuError::Cancelled));
                continue;
            }
            let start = Instant::now();
            let count = batch.signatures.len();
            let results =
                self.run_signatures(batch.signatures, batch.messages, batch.public_keys);
            self.stats.record_batch(Kind::Signature, count, start.elapsed());
            (batch.callback)(Ok(results));
        }
    }

    fn tx_worker(&self) {
        while let Ok(batch) = self.tx_rx.recv() {
            if self.shutdown.load(Ordering::SeqCst) {
                (batch.callback)(Err(GpuError::Cancelled));
                continue;
            }
            let start = Instant::now();
            let count = batch.raw_txs.len();
            let results = self.run_transactions(batch.raw_txs);
            self.stats.record_batch(Kind::Tx, count, start.elapsed());
            (batch.callback)(Ok(results));
        }
    }

    fn run_hashes(&self, inputs: Vec<Vec<u8>>) -> Vec<H256> {
        if let Some(backend) = &self.backend {
            let packed = pack_slots(&inputs, HASH_SLOT_WIDTH, self.pool.get());
            self.stats.record_truncated(Kind::Hash, packed.truncated);
            let mut out = vec![0u8; inputs.len() * 32];

            let status = catch_unwind(AssertUnwindSafe(|| {
                backend.process_hashes(&packed.data, &packed.lengths, inputs.len(), &mut out)
            }));
            self.pool.put(packed.data);

            match status {
                Ok(0) => return unpack_digests(&out, inputs.len()),
                Ok(code) => {
                    warn!(code, "GPU hash processing failed, falling back to CPU");
                }
                Err(_) => {
                    error!("GPU hash processing panicked, falling back to CPU");
                }
            }
        }
        cpu::hash_batch(&inputs)
    }

    fn run_signatures(
        &self,
        signatures: Vec<Vec<u8>>,
        messages: Vec<Vec<u8>>,
        public_keys: Vec<Vec<u8>>,
    ) -> Vec<bool> {
        if let Some(backend) = &self.backend {
            let count = signatures.len();
            let mut sigs = vec![0u8; count * 65];
            let mut msgs = vec![0u8; count * 32];
            let mut keys = vec![0u8; count * 65];
            for i in 0..count {
                copy_clamped(&mut sigs[i * 65..(i + 1) * 65], &signatures[i]);
                copy_clamped(&mut msgs[i * 32..(i + 1) * 32], &messages[i]);
                // Raw 64-byte keys gain the uncompressed-point tag; other
                // lengths stay zeroed and fail verification in the kernel.
                let key_slot = &mut keys[i * 65..(i + 1) * 65];
                match public_keys[i].len() {
                    65 => key_slot.copy_from_slice(&public_keys[i]),
                    64 => {
                        key_slot[0] = 0x04;
                        key_slot[1..].copy_from_slice(&public_keys[i]);
                    }
                    _ => {}
                }
            }
            let mut out = vec![0u8; count];

            let status = catch_unwind(AssertUnwindSafe(|| {
                backend.verify_signatures(&sigs, &msgs, &keys, count, &mut out)
            }));

            match status {
                Ok(0) => return out.into_iter().map(|b| b != 0).collect(),
                Ok(code) => {
                    warn!(code, "GPU signature processing failed, falling back to CPU");
                }
                Err(_) => {
                    error!("GPU signature processing panicked, falling back to CPU");
                }
            }
        }
        cpu::verify_signatures_batch(&signatures, &messages, &public_keys)
    }

    fn run_transactions(&self, raw_txs: Vec<Vec<u8>>) -> Vec<TxResult> {
        if let Some(backend) = &self.backend {
            let packed = pack_slots(&raw_txs, TX_SLOT_WIDTH, self.pool.get());
            self.stats.record_truncated(Kind::Tx, packed.truncated);
            let count = raw_txs.len();
            let mut out = vec![0u8; count * TX_RESULT_STRIDE];

            let status = catch_unwind(AssertUnwindSafe(|| {
                backend.process_transactions(&packed.data, &packed.lengths, count, &mut out)
            }));
            self.pool.put(packed.data);

            match status {
                Ok(0) => {
                    return (0..count)
                        .map(|i| {
                            let record = &out[i * TX_RESULT_STRIDE..(i + 1) * TX_RESULT_STRIDE];
                            let mut result = TxResult::from_record(record)
                                .unwrap_or_else(|| {
                                    TxResult::invalid(H256::ZERO, "malformed kernel record")
                                });
                            if result.hash.is_zero() {
                                // Kernel left the hash slot empty; recompute.
                                let n = raw_txs[i].len().min(TX_SLOT_WIDTH);
                                result.hash = H256::keccak(&raw_txs[i][..n]);
                            }
                            result
                        })
                        .collect();
                }
                Ok(code) => {
                    warn!(code, "GPU transaction processing failed, falling back to CPU");
                }
                Err(_) => {
                    error!("GPU transaction processing panicked, falling back to CPU");
                }
            }
        }
        cpu::decode_transactions_batch(&raw_txs)
    }
}

impl Drop for GpuProcessor {
    fn drop(&mut self) {
        // Workers hold an Arc to the processor, so by the time Drop runs they
        // have all exited; this only covers the senders if shutdown was
        // never called explicitly.
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn copy_clamped(slot: &mut [u8], src: &[u8]) {
    let n = src.len().min(slot.len());
    slot[..n].copy_from_slice(&src[..n]);
}

fn drop_full<T>(err: TrySendError<T>, kind: &'static str) -> GpuError {
    match err {
        TrySendError::Full(_) => GpuError::QueueFull { kind },
        TrySendError::Disconnected(_) => GpuError::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn cpu_only() -> Arc<GpuProcessor> {
        GpuProcessor::new(GpuConfig {
            enabled: false,
            hash_workers: 2,
            signature_workers: 2,
            tx_workers: 2,
            ..Default::default()
        })
    }

    #[test]
    fn hash_batch_on_cpu_matches_keccak() {
        let processor = cpu_only();
        assert_eq!(processor.gpu_type(), GpuType::None);

        let inputs: Vec<Vec<u8>> = (0..100u32).map(|i| i.to_be_bytes().to_vec()).collect();
        let expected: Vec<H256> = inputs.iter().map(|b| H256::keccak(b)).collect();

        let (tx, rx) = mpsc::channel();
        processor
            .submit_hashes(inputs, move |result| {
                tx.send(result).unwrap();
            })
            .unwrap();

        let results = rx.recv().unwrap().unwrap();
        assert_eq!(results, expected);
        processor.shutdown();
    }

    #[test]
    fn empty_batch_completes_without_enqueueing() {
        let processor = cpu_only();
        let (tx, rx) = mpsc::channel();
        processor
            .submit_hashes(Vec::new(), move |result| {
                tx.send(result).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap().unwrap(), Vec::<H256>::new());
        assert_eq!(processor.queue_depth(), 0);
        processor.shutdown();
    }

    #[test]
    fn signature_batch_verifies_on_cpu() {
        let processor = cpu_only();
        let secret = [0x33u8; 32];
        let msg = H256::keccak(b"payload");
        let sig = splendor_crypto::ecdsa::sign_prehash(&secret, &msg).unwrap();
        let key = splendor_crypto::ecdsa::public_key_of(&secret).unwrap();

        let (tx, rx) = mpsc::channel();
        processor
            .submit_signatures(
                vec![sig.to_vec(), sig.to_vec()],
                vec![msg.as_bytes().to_vec(), H256::keccak(b"other").as_bytes().to_vec()],
                vec![key.clone(), key],
                move |result| tx.send(result).unwrap(),
            )
            .unwrap();

        assert_eq!(rx.recv().unwrap().unwrap(), vec![true, false]);
        processor.shutdown();
    }

    #[test]
    fn mismatched_signature_arrays_are_rejected() {
        let processor = cpu_only();
        let result = processor.submit_signatures(
            vec![vec![0u8; 65]],
            Vec::new(),
            Vec::new(),
            |_| panic!("callback must not fire for rejected submissions"),
        );
        assert!(matches!(result, Err(GpuError::InputMismatch { .. })));
        processor.shutdown();
    }

    #[test]
    fn callbacks_fire_exactly_once_across_many_batches() {
        let processor = cpu_only();
        let (tx, rx) = mpsc::channel();
        let batches = 50;
        for i in 0..batches {
            let tx = tx.clone();
            processor
                .submit_hashes(vec![vec![i as u8]], move |result| {
                    tx.send(result.map(|r| r.len())).unwrap();
                })
                .unwrap();
        }
        drop(tx);
        let fired: Vec<_> = rx.iter().collect();
        assert_eq!(fired.len(), batches);
        assert!(fired.iter().all(|r| *r == Ok(1)));
        processor.shutdown();
    }

    #[test]
    fn oversized_batch_is_rejected_before_enqueue() {
        let processor = GpuProcessor::new(GpuConfig {
            enabled: false,
            hash_workers: 1,
            signature_workers: 1,
            tx_workers: 1,
            max_batch_size: 4,
            ..Default::default()
        });
        let result = processor.submit_hashes(vec![vec![0u8]; 5], |_| {
            panic!("callback must not fire for rejected submissions")
        });
        assert_eq!(result, Err(GpuError::BatchTooLarge { size: 5, max: 4 }));
        processor.shutdown();
    }

    #[test]
    fn submission_after_shutdown_cancels() {
        let processor = cpu_only();
        processor.shutdown();

        let (tx, rx) = mpsc::channel();
        let result = processor.submit_hashes(vec![vec![1u8]], move |r| {
            tx.send(r).unwrap();
        });
        assert_eq!(result, Err(GpuError::Cancelled));
        assert_eq!(rx.recv().unwrap(), Err(GpuError::Cancelled));
    }
}
