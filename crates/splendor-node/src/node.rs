//! Node implementation: wiring, block production, lifecycle.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use splendor_api::AppState;
use splendor_consensus::{
    BlockExecutor, ChainParams, ForkState, PqEngine, PqSignerFn, SignerSnapshot,
    ValidatorKeyRegistry,
};
use splendor_crypto::{ecdsa, mldsa};
use splendor_gpu::{GpuProcessor, HybridScheduler};
use splendor_mempool::{Mempool, MempoolConfig};
use splendor_state::{BlockStore, ChainState, StoredBlock};
use splendor_types::{parse_hex_u128, Address, Header, H256};
use splendor_x402::X402Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Transactions drawn from the pool per block.
const BLOCK_TX_LIMIT: usize = 5_000;

/// The main node struct coordinating all components.
pub struct Node {
    config: NodeConfig,
    chain: Arc<ChainState>,
    store: Arc<BlockStore>,
    mempool: Arc<Mempool>,
    x402: Arc<X402Engine>,
    gpu: Arc<GpuProcessor>,
    hybrid: Arc<HybridScheduler>,
    engine: Arc<PqEngine>,
    executor: BlockExecutor,
    snapshot: parking_lot::Mutex<SignerSnapshot>,
    sealing_secret: [u8; 32],
    coinbase: Address,
    pq_signer: Option<PqSignerFn>,
    shutdown: Arc<AtomicBool>,
    api_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    ticker_handle: parking_lot::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Node {
    /// Create a new node.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>> {
        let chain = Arc::new(ChainState::new());
        for account in &config.genesis {
            let balance = parse_hex_u128(&account.balance)
                .with_context(|| format!("genesis balance for {}", account.address))?;
            chain.set_balance(account.address, balance);
        }

        let store = Arc::new(BlockStore::new());
        store.append(
            StoredBlock { header: Header::default(), transactions: vec![] },
            vec![],
        );

        let x402 = Arc::new(X402Engine::new(
            config.x402.clone(),
            config.chain_id,
            config.network.clone(),
        ));
        let mempool = Arc::new(Mempool::new(
            MempoolConfig::default(),
            Arc::clone(&x402),
            Arc::clone(&chain),
        ));

        let gpu = GpuProcessor::new(config.gpu.clone());
        let hybrid = HybridScheduler::new(Arc::clone(&gpu), config.hybrid.clone());

        let registry = Arc::new(ValidatorKeyRegistry::new());
        let params = ChainParams {
            chain_id: config.chain_id,
            network: config.network.clone(),
            epoch_length: config.epoch_length,
            period: config.period,
            post_quantum: config.post_quantum.clone(),
        };
        let engine = Arc::new(PqEngine::new(params, Arc::clone(&registry)));
        let executor = BlockExecutor::new(config.network.clone());

        let sealing_secret = match &config.validator.secret {
            Some(hex_secret) => {
                let bytes = hex::decode(hex_secret.trim_start_matches("0x"))
                    .context("validator secret is not hex")?;
                <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| anyhow::anyhow!("validator secret must be 32 bytes"))?
            }
            None => {
                let mut secret = [0u8; 32];
                rand::Rng::fill(&mut rand::thread_rng(), &mut secret);
                secret
            }
        };
        let coinbase = ecdsa::address_of(&sealing_secret)
            .map_err(|e| anyhow::anyhow!("invalid sealing key: {e}"))?;

        // ML-DSA sealing identity, generated fresh at startup once the fork
        // is configured. Without the PQ library the node stays ECDSA-only
        // and will refuse to produce post-fork blocks.
        let mut pq_signer: Option<PqSignerFn> = None;
        let mut pq_address: Option<Address> = None;
        if config.post_quantum.is_some() {
            let algorithm = engine.params().default_mldsa_algorithm();
            match mldsa::generate(algorithm) {
                Ok((public_key, secret_key)) => {
                    let address = Address::from_public_key(&public_key);
                    registry
                        .register(
                            address,
                            algorithm,
                            public_key.clone(),
                            None,
                            store.best_number().unwrap_or(0),
                        )
                        .ok();
                    info!(pq_address = %address, "ML-DSA sealing key generated");
                    pq_address = Some(address);
                    pq_signer = Some(Box::new(move |algorithm, message| {
                        let signature = mldsa::sign(algorithm, message, &secret_key)?;
                        Ok((signature, public_key.clone()))
                    }));
                }
                Err(e) => {
                    warn!(error = %e, "ML-DSA unavailable, sealing with ECDSA only");
                }
            }
        }

        // The PQ-derived address joins the authorised set so enforced-era
        // seals verify against it.
        let mut authorized = vec![coinbase];
        authorized.extend(config.validator.extra_validators.iter().copied());
        authorized.extend(pq_address);
        let snapshot = parking_lot::Mutex::new(SignerSnapshot::new(authorized));

        Ok(Arc::new(Self {
            config,
            chain,
            store,
            mempool,
            x402,
            gpu,
            hybrid,
            engine,
            executor,
            snapshot,
            sealing_secret,
            coinbase,
            pq_signer,
            shutdown: Arc::new(AtomicBool::new(false)),
            api_handle: RwLock::new(None),
            ticker_handle: parking_lot::Mutex::new(None),
        }))
    }

    pub fn coinbase(&self) -> Address {
        self.coinbase
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            chain: Arc::clone(&self.chain),
            store: Arc::clone(&self.store),
            mempool: Arc::clone(&self.mempool),
            x402: Arc::clone(&self.x402),
            gpu: Arc::clone(&self.gpu),
            hybrid: Arc::clone(&self.hybrid),
            engine: Arc::clone(&self.engine),
            node_name: self.config.node_name.clone(),
            mining_enabled: self.config.validator.enabled,
            coinbase: self.coinbase,
            x402_limiter: AppState::limiter_for(&self.x402),
        }
    }

    /// Run the node until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        info!("Starting node services...");
        self.start_api().await?;
        *self.ticker_handle.lock() = Some(self.hybrid.spawn_ticker());

        let mut block_interval =
            tokio::time::interval(Duration::from_secs(self.config.period.max(1)));
        block_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut housekeeping_interval = tokio::time::interval(Duration::from_secs(30));
        housekeeping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                _ = block_interval.tick() => {
                    if self.config.validator.enabled {
                        if let Err(e) = self.produce_block() {
                            error!(error = %e, "block production failed");
                        }
                    }
                }
                _ = housekeeping_interval.tick() => {
                    self.mempool.remove_expired(now_secs());
                    let stats = self.mempool.stats();
                    info!(
                        height = self.store.best_number().unwrap_or(0),
                        mempool_txs = stats.tx_count,
                        gpu_queue = self.gpu.queue_depth(),
                        "Node status"
                    );
                }
            }
        }

        info!("Node main loop stopped");
        Ok(())
    }

    async fn start_api(&self) -> Result<()> {
        let bind_addr: std::net::SocketAddr = self.config.api.bind_address.parse()?;
        let router = splendor_api::build_api(self.app_state());

        info!("Starting API server on {}", bind_addr);
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!("API server error: {}", e);
            }
        });
        *self.api_handle.write().await = Some(handle);
        Ok(())
    }

    /// Produce and apply the next block from pooled transactions.
    fn produce_block(&self) -> Result<()> {
        let transactions = self.mempool.take_for_block(BLOCK_TX_LIMIT);
        if transactions.is_empty() {
            return Ok(());
        }

        let parent = self
            .store
            .best_header()
            .ok_or_else(|| anyhow::anyhow!("no genesis block"))?;
        let number = parent.number + 1;
        let timestamp = now_secs();

        let executed = self
            .executor
            .execute_block(
                &self.chain,
                &self.x402,
                number,
                timestamp,
                self.coinbase,
                &transactions,
            )
            .map_err(|e| anyhow::anyhow!("execution failed: {e}"))?;

        let tx_hashes: Vec<H256> = transactions.iter().map(|tx| tx.hash()).collect();
        let tx_root = ordered_root(tx_hashes.iter().map(|h| h.0));
        let receipt_root =
            ordered_root(executed.receipts.iter().map(|r| H256::keccak(&r.tx_hash.0).0));
        let state_root = {
            let mut data = Vec::with_capacity(72);
            data.extend_from_slice(parent.state_root.as_bytes());
            data.extend_from_slice(receipt_root.as_bytes());
            data.extend_from_slice(&number.to_be_bytes());
            H256::keccak(&data)
        };

        let mut header = Header {
            parent_hash: parent.hash(),
            coinbase: self.coinbase,
            state_root,
            tx_root,
            receipt_root,
            difficulty: 1,
            number,
            gas_limit: parent.gas_limit,
            gas_used: executed.gas_used,
            timestamp,
            extra: Vec::new(),
            mix_digest: H256::ZERO,
            nonce: 0,
        };

        let checkpoint_signers: Vec<Address> = {
            let snapshot = self.snapshot.lock();
            snapshot.signers().copied().collect()
        };
        // During dual-signing the ML-DSA seal must derive the same address
        // as the ECDSA seal, which distinct key types cannot satisfy; the
        // producer therefore attaches the PQ seal only once it is mandatory.
        let pq_signer = match self.engine.params().fork_state(number) {
            ForkState::PostFork => self.pq_signer.as_ref(),
            _ => None,
        };
        self.engine
            .seal_header(&mut header, &checkpoint_signers, &self.sealing_secret, pq_signer)
            .map_err(|e| anyhow::anyhow!("sealing failed: {e}"))?;

        {
            let mut snapshot = self.snapshot.lock();
            self.engine
                .verify_header_seals(&header, &snapshot)
                .map_err(|e| anyhow::anyhow!("self-verification failed: {e}"))?;
            // Recency only constrains multi-validator sets; a solo devnet
            // validator seals every block.
            if !self.config.validator.extra_validators.is_empty() {
                snapshot.mark_signed(number, self.coinbase);
            }
        }

        debug!(
            number,
            txs = transactions.len(),
            fork = ?self.engine.params().fork_state(number),
            "block sealed"
        );

        self.store.append(StoredBlock { header, transactions }, executed.receipts);
        self.mempool.remove_confirmed(&tx_hashes);
        self.engine.registry().rotate_expired(number);
        Ok(())
    }

    /// Shutdown the node.
    pub async fn shutdown(&self) {
        info!("Shutting down node...");
        self.shutdown.store(true, Ordering::SeqCst);

        self.hybrid.stop();
        if let Some(handle) = self.ticker_handle.lock().take() {
            let _ = handle.join();
        }
        self.gpu.shutdown();
        self.x402.shutdown();
        self.engine.registry().clear();

        if let Some(handle) = self.api_handle.write().await.take() {
            handle.abort();
        }
        info!("Node shutdown complete");
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn ordered_root(items: impl Iterator<Item = [u8; 32]>) -> H256 {
    let mut data = Vec::new();
    for item in items {
        data.extend_from_slice(&item);
    }
    H256::keccak(&data)
}
