//! Route definitions.

use crate::handlers::rpc_handler;
use crate::paywall::serve_paid_resource;
use crate::AppState;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Default per-request deadline. Expiry surfaces as 408 to the caller while
/// any in-flight GPU submission completes its callback in the background.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the API router.
pub fn build_api(state: AppState) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route("/health", get(health))
        .route("/paid/:resource", get(serve_paid_resource))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(RPC_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
