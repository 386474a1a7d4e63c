//! Method dispatch.

pub mod chain;
pub mod gpu;
pub mod x402;

use crate::jsonrpc::{RpcError, RpcRequest, RpcResponse};
use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::Value;
use tracing::debug;

/// `POST /` entry point. Accepts a single request or a batch.
pub async fn rpc_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let response = match body {
        Value::Array(requests) => {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                responses.push(handle_value(&state, request));
            }
            serde_json::to_value(responses).unwrap_or(Value::Null)
        }
        single => serde_json::to_value(handle_value(&state, single)).unwrap_or(Value::Null),
    };
    Json(response)
}

fn handle_value(state: &AppState, value: Value) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return RpcResponse::error(Value::Null, RpcError::invalid_request(e.to_string()));
        }
    };
    let id = request.id.clone();
    debug!(method = %request.method, "rpc request");
    match dispatch(state, &request.method, &request.params) {
        Ok(result) => RpcResponse::result(id, result),
        Err(error) => RpcResponse::error(id, error),
    }
}

fn dispatch(state: &AppState, method: &str, params: &Value) -> Result<Value, RpcError> {
    match method {
        // x402 payment surface
        "x402_supported" => x402::supported(state),
        "x402_verify" => x402::verify(state, params),
        "x402_settle" => x402::settle(state, params),
        "x402_getValidatorRevenue" => x402::validator_revenue(state, params),
        "x402_getRevenueStats" => x402::revenue_stats(state),
        "x402_getTopPerformingValidators" => x402::top_validators(state, params),
        "x402_setValidatorFeeShare" => x402::set_validator_fee_share(state, params),
        "x402_setDistributionMode" => x402::set_distribution_mode(state, params),

        // GPU introspection
        "gpu_getGPUStats" => gpu::stats(state),
        "gpu_getGPUConfig" => gpu::config(state),
        "gpu_getGPUHealth" => gpu::health(state),
        "gpu_getTPSMonitoring" => gpu::tps_monitoring(state),

        // Minimal chain queries
        "eth_chainId" => chain::chain_id(state),
        "eth_blockNumber" => chain::block_number(state),
        "eth_getBalance" => chain::get_balance(state, params),
        "eth_getTransactionReceipt" => chain::get_transaction_receipt(state, params),
        "eth_getBlockByNumber" => chain::get_block_by_number(state, params),

        other => Err(RpcError::method_not_found(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use splendor_consensus::{ChainParams, PqEngine, ValidatorKeyRegistry};
    use splendor_crypto::ecdsa;
    use splendor_gpu::{GpuConfig, GpuProcessor, HybridConfig, HybridScheduler};
    use splendor_mempool::{Mempool, MempoolConfig};
    use splendor_state::{BlockStore, ChainState, StoredBlock};
    use splendor_types::{Address, Header, PaymentPayload, H256};
    use splendor_x402::{sign_payload, X402Config, X402Engine};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    const PAYER_SECRET: [u8; 32] = [0xa1u8; 32];
    const AMOUNT: u128 = 1_000_000_000_000_000;

    fn test_state(x402_config: X402Config) -> AppState {
        let chain = Arc::new(ChainState::new());
        chain.set_balance(ecdsa::address_of(&PAYER_SECRET).unwrap(), 10 * AMOUNT);

        let store = Arc::new(BlockStore::new());
        store.append(StoredBlock { header: Header::default(), transactions: vec![] }, vec![]);

        let x402 = Arc::new(X402Engine::new(x402_config, 1337, "splendor"));
        let mempool =
            Arc::new(Mempool::new(MempoolConfig::default(), Arc::clone(&x402), Arc::clone(&chain)));
        let gpu = GpuProcessor::new(GpuConfig {
            enabled: false,
            hash_workers: 1,
            signature_workers: 1,
            tx_workers: 1,
            ..Default::default()
        });
        let hybrid = HybridScheduler::new(Arc::clone(&gpu), HybridConfig::default());
        let engine = Arc::new(PqEngine::new(
            ChainParams { chain_id: 1337, network: "splendor".to_string(), ..Default::default() },
            Arc::new(ValidatorKeyRegistry::new()),
        ));
        let limiter = AppState::limiter_for(&x402);

        AppState {
            chain,
            store,
            mempool,
            x402,
            gpu,
            hybrid,
            engine,
            node_name: "test-node".to_string(),
            mining_enabled: false,
            coinbase: Address([0xff; 20]),
            x402_limiter: limiter,
        }
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn settle_params() -> Value {
        let merchant = Address([0xb7; 20]);
        let mut payload = PaymentPayload {
            from: ecdsa::address_of(&PAYER_SECRET).unwrap(),
            to: merchant,
            value: AMOUNT,
            valid_after: now() - 10,
            valid_before: now() + 300,
            nonce: H256([0x61; 32]),
            signature: vec![0u8; 65],
        };
        sign_payload(&mut payload, 1337, &PAYER_SECRET).unwrap();

        json!([
            {
                "scheme": "exact",
                "network": "splendor",
                "maxAmountRequired": "0x38d7ea4c68000",
                "payTo": merchant,
                "maxTimeoutSeconds": 300,
                "asset": "0x0000000000000000000000000000000000000000",
            },
            {
                "x402Version": 1,
                "scheme": "exact",
                "network": "splendor",
                "payload": serde_json::to_value(&payload).unwrap(),
            }
        ])
    }

    #[test]
    fn supported_lists_exact_scheme() {
        let state = test_state(X402Config::default());
        let result = dispatch(&state, "x402_supported", &Value::Null).unwrap();
        assert_eq!(result[0]["scheme"], "exact");
        assert_eq!(result[0]["network"], "splendor");
        state.gpu.shutdown();
    }

    #[test]
    fn verify_then_settle_through_dispatch() {
        let state = test_state(X402Config::default());
        let params = settle_params();

        let verdict = dispatch(&state, "x402_verify", &params).unwrap();
        assert_eq!(verdict["isValid"], true);

        let settlement = dispatch(&state, "x402_settle", &params).unwrap();
        assert_eq!(settlement["success"], true);
        let tx_hash = settlement["txHash"].as_str().unwrap().to_string();
        assert_eq!(state.mempool.stats().tx_count, 1);

        // Unmined: the receipt is null until a block includes the payment.
        let receipt =
            dispatch(&state, "eth_getTransactionReceipt", &json!([tx_hash])).unwrap();
        assert_eq!(receipt, Value::Null);
        state.gpu.shutdown();
    }

    #[test]
    fn settle_reports_invalid_reason() {
        let state = test_state(X402Config::default());
        let mut params = settle_params();
        // Break the recipient binding.
        params[1]["payload"]["to"] = json!("0x9999999999999999999999999999999999999999");

        let settlement = dispatch(&state, "x402_settle", &params).unwrap();
        assert_eq!(settlement["success"], false);
        // Recipient change invalidates the signature before rule 6 is hit.
        assert_eq!(settlement["error"], "InvalidSignature");
        assert_eq!(state.mempool.stats().tx_count, 0);
        state.gpu.shutdown();
    }

    #[test]
    fn settle_holds_payload_to_the_quoted_recipient_and_amount() {
        use crate::handlers::x402::settle_inner;
        use splendor_x402::{PaymentEnvelope, PaymentRequirements, SCHEME_EXACT};

        let state = test_state(X402Config::default());
        let payer = ecdsa::address_of(&PAYER_SECRET).unwrap();
        let merchant = Address([0xb7; 20]);

        // Self-signed envelope paying 1 wei back to the payer.
        let mut payload = PaymentPayload {
            from: payer,
            to: payer,
            value: 1,
            valid_after: now() - 10,
            valid_before: now() + 300,
            nonce: H256([0x62; 32]),
            signature: vec![0u8; 65],
        };
        sign_payload(&mut payload, 1337, &PAYER_SECRET).unwrap();
        let envelope = PaymentEnvelope {
            x402_version: 1,
            scheme: SCHEME_EXACT.to_string(),
            network: "splendor".to_string(),
            payload,
        };
        // The server's quote: the full amount, to the merchant.
        let requirements = PaymentRequirements {
            scheme: SCHEME_EXACT.to_string(),
            network: "splendor".to_string(),
            max_amount_required: AMOUNT,
            resource: "/paid/data".to_string(),
            description: String::new(),
            mime_type: "application/json".to_string(),
            pay_to: merchant,
            max_timeout_seconds: 300,
            asset: Address::ZERO,
        };

        let settlement = settle_inner(&state, &requirements, &envelope);
        assert!(!settlement.success);
        assert_eq!(settlement.error.as_deref(), Some("AmountMismatch"));
        assert_eq!(state.mempool.stats().tx_count, 0);

        // Right amount, still the wrong recipient.
        let mut payload = envelope.payload.clone();
        payload.value = AMOUNT;
        payload.nonce = H256([0x63; 32]);
        sign_payload(&mut payload, 1337, &PAYER_SECRET).unwrap();
        let envelope = PaymentEnvelope { payload, ..envelope };

        let settlement = settle_inner(&state, &requirements, &envelope);
        assert!(!settlement.success);
        assert_eq!(settlement.error.as_deref(), Some("RecipientMismatch"));
        assert_eq!(state.mempool.stats().tx_count, 0);
        state.gpu.shutdown();
    }

    #[test]
    fn rate_limit_rejects_after_quota() {
        let state = test_state(X402Config {
            rate_limiting: true,
            max_requests_per_minute: 2,
            ..Default::default()
        });
        let params = settle_params();

        assert!(dispatch(&state, "x402_verify", &params).is_ok());
        assert!(dispatch(&state, "x402_verify", &params).is_ok());
        let err = dispatch(&state, "x402_verify", &params).unwrap_err();
        assert_eq!(err.code, -32005);
        state.gpu.shutdown();
    }

    #[test]
    fn unknown_method_is_reported() {
        let state = test_state(X402Config::default());
        let err = dispatch(&state, "eth_call", &Value::Null).unwrap_err();
        assert_eq!(err.code, -32601);
        state.gpu.shutdown();
    }

    #[test]
    fn gpu_health_reports_cpu_only() {
        let state = test_state(X402Config::default());
        let health = dispatch(&state, "gpu_getGPUHealth", &Value::Null).unwrap();
        assert_eq!(health["status"], "cpu_only");
        assert_eq!(health["gpuAvailable"], false);
        state.gpu.shutdown();
    }
}
