//! GPU introspection methods.

use crate::jsonrpc::RpcError;
use crate::AppState;
use serde_json::{json, Value};

/// `gpu_getGPUStats`.
pub fn stats(state: &AppState) -> Result<Value, RpcError> {
    let gpu = state.gpu.stats();
    let hybrid = state.hybrid.stats();
    Ok(json!({
        "gpu": {
            "type": gpu.gpu_type,
            "deviceCount": gpu.device_count,
            "available": gpu.available,
            "queues": {
                "hash": gpu.hash,
                "signature": gpu.signature,
                "tx": gpu.tx,
            },
            "utilization": hybrid.gpu_utilization,
        },
        "miner": {
            "gpuEnabled": state.mining_enabled && gpu.available,
        },
    }))
}

/// `gpu_getGPUConfig`.
pub fn config(state: &AppState) -> Result<Value, RpcError> {
    Ok(json!({
        "processor": state.gpu.config(),
        "strategy": state.hybrid.strategy(),
    }))
}

/// `gpu_getGPUHealth`.
pub fn health(state: &AppState) -> Result<Value, RpcError> {
    let gpu = state.gpu.stats();
    let status = if gpu.available { "healthy" } else { "cpu_only" };
    Ok(json!({
        "status": status,
        "gpuAvailable": gpu.available,
        "queueDepth": state.gpu.queue_depth(),
        "postQuantum": {
            "registeredValidators": state.registry().len(),
            "keyRotations": state.registry().rotation_count(),
            "libraryAvailable": splendor_crypto::mldsa::library_available(),
        },
    }))
}

/// `gpu_getTPSMonitoring`.
pub fn tps_monitoring(state: &AppState) -> Result<Value, RpcError> {
    let hybrid = state.hybrid.stats();
    Ok(json!({
        "currentTps": hybrid.current_tps,
        "cpuUtilization": hybrid.cpu_utilization,
        "gpuUtilization": hybrid.gpu_utilization,
        "avgLatencyMs": hybrid.avg_latency_ms,
        "queueDepth": hybrid.queue_depth,
        "strategy": hybrid.strategy,
        "recommendedBatchSize": state.hybrid.adaptive_batch_size(),
    }))
}
