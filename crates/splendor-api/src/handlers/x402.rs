//! x402 payment methods.

use crate::jsonrpc::{opt_param, param, RpcError};
use crate::AppState;
use serde_json::{json, Value};
use splendor_types::{Address, Transaction};
use splendor_x402::{DistributionMode, PaymentEnvelope, PaymentRequirements, SettlementResponse};
use tracing::info;

pub fn supported(state: &AppState) -> Result<Value, RpcError> {
    let pairs: Vec<Value> = state
        .x402
        .supported()
        .into_iter()
        .map(|(scheme, network)| json!({ "scheme": scheme, "network": network }))
        .collect();
    Ok(Value::Array(pairs))
}

fn admit(state: &AppState) -> Result<(), RpcError> {
    if state.x402_limiter.try_acquire() {
        Ok(())
    } else {
        Err(RpcError { code: -32005, message: "x402 rate limit exceeded".to_string() })
    }
}

/// `x402_verify(requirements, payload)`: read-only, no state change.
pub fn verify(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    admit(state)?;
    let requirements: PaymentRequirements = param(params, 0)?;
    let envelope: PaymentEnvelope = param(params, 1)?;

    let snapshot = state.chain.snapshot();
    let response = state.x402.verify(&requirements, &envelope, &(&snapshot), state.now());
    serde_json::to_value(response).map_err(|e| RpcError::internal(e.to_string()))
}

/// `x402_settle(requirements, payload)`: pre-verify, wrap into a typed
/// transaction, and hand it to the mempool. Returns before mining; callers
/// confirm inclusion via `eth_getTransactionReceipt`.
pub fn settle(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    admit(state)?;
    let requirements: PaymentRequirements = param(params, 0)?;
    let envelope: PaymentEnvelope = param(params, 1)?;

    let response = settle_inner(state, &requirements, &envelope);
    serde_json::to_value(response).map_err(|e| RpcError::internal(e.to_string()))
}

pub(crate) fn settle_inner(
    state: &AppState,
    requirements: &PaymentRequirements,
    envelope: &PaymentEnvelope,
) -> SettlementResponse {
    let config = state.x402.config();
    if !config.enabled {
        return SettlementResponse::rejected("x402 payments are disabled");
    }
    if requirements.max_amount_required < config.min_payment
        || requirements.max_amount_required > config.max_payment
    {
        return SettlementResponse::rejected("payment amount outside configured bounds");
    }

    let now = state.now();
    let snapshot = state.chain.snapshot();
    if let Err(reason) = state.x402.validate(requirements, envelope, &(&snapshot), now) {
        return SettlementResponse::rejected(reason.as_str());
    }

    let tx = Transaction::Payment(envelope.payload.clone());
    match state.mempool.add(tx, now) {
        Ok(tx_hash) => {
            info!(%tx_hash, payer = %envelope.payload.from, "x402 payment queued");
            SettlementResponse::accepted(tx_hash, state.chain_id())
        }
        Err(e) => SettlementResponse::rejected(e.to_string()),
    }
}

pub fn validator_revenue(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let validator: Address = param(params, 0)?;
    let revenue = state.x402.revenue().validator_revenue(&validator);
    serde_json::to_value(revenue).map_err(|e| RpcError::internal(e.to_string()))
}

pub fn revenue_stats(state: &AppState) -> Result<Value, RpcError> {
    serde_json::to_value(state.x402.revenue().stats())
        .map_err(|e| RpcError::internal(e.to_string()))
}

pub fn top_validators(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let limit: usize = opt_param(params, 0)?.unwrap_or(10);
    let top: Vec<Value> = state
        .x402
        .revenue()
        .top_validators(limit)
        .into_iter()
        .map(|(address, revenue)| {
            json!({
                "validator": address,
                "settledVolume": format!("{:#x}", revenue.settled_volume),
                "settledCount": revenue.settled_count,
                "poolShare": format!("{:#x}", revenue.pool_share),
            })
        })
        .collect();
    Ok(Value::Array(top))
}

pub fn set_validator_fee_share(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let fraction: f64 = param(params, 0)?;
    state
        .x402
        .revenue()
        .set_validator_share(fraction)
        .map_err(RpcError::invalid_params)?;
    Ok(json!(true))
}

pub fn set_distribution_mode(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let mode_name: String = param(params, 0)?;
    let mode = DistributionMode::from_name(&mode_name)
        .ok_or_else(|| RpcError::invalid_params(format!("unknown distribution mode {mode_name}")))?;
    state.x402.revenue().set_distribution_mode(mode);
    Ok(json!(true))
}
