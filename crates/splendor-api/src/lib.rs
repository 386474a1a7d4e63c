//! # splendor-api
//!
//! The node's HTTP surface:
//! - JSON-RPC 2.0 on `POST /` with the `x402_*`, `gpu_*`, and a minimal set
//!   of `eth_*` methods
//! - the HTTP-402 paywall contract on `GET /paid/*` (402 challenge, then
//!   verify + settle on an `X-Payment` retry)
//! - `GET /health` for probes

mod handlers;
mod jsonrpc;
mod paywall;
mod ratelimit;
mod routes;
mod state;

pub use jsonrpc::{RpcError, RpcRequest, RpcResponse};
pub use routes::build_api;
pub use state::AppState;

/// Default API port.
pub const DEFAULT_API_PORT: u16 = 8545;
