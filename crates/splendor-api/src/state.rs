//! Shared application state.

use crate::ratelimit::RateLimiter;
use splendor_consensus::{PqEngine, ValidatorKeyRegistry};
use splendor_gpu::{GpuProcessor, HybridScheduler};
use splendor_mempool::Mempool;
use splendor_state::{BlockStore, ChainState};
use splendor_x402::X402Engine;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<ChainState>,
    pub store: Arc<BlockStore>,
    pub mempool: Arc<Mempool>,
    pub x402: Arc<X402Engine>,
    pub gpu: Arc<GpuProcessor>,
    pub hybrid: Arc<HybridScheduler>,
    pub engine: Arc<PqEngine>,
    pub node_name: String,
    pub mining_enabled: bool,
    /// The local validator address; paywalled resources quote it as payee.
    pub coinbase: splendor_types::Address,
    /// Limits x402 verify/settle traffic when rate limiting is configured.
    pub x402_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Limiter matching the engine's configuration.
    pub fn limiter_for(x402: &X402Engine) -> Arc<RateLimiter> {
        let config = x402.config();
        Arc::new(RateLimiter::new(config.rate_limiting, config.max_requests_per_minute))
    }

    pub fn registry(&self) -> &Arc<ValidatorKeyRegistry> {
        self.engine.registry()
    }

    pub fn chain_id(&self) -> u64 {
        self.x402.chain_id()
    }

    /// Wall-clock seconds, the `now` for payment validity windows.
    pub fn now(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }
}
