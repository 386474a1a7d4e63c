//! Minimal chain query methods.

use crate::jsonrpc::{opt_param, param, RpcError};
use crate::AppState;
use serde_json::{json, Value};
use splendor_state::StateReader;
use splendor_types::{Address, H256};

pub fn chain_id(state: &AppState) -> Result<Value, RpcError> {
    Ok(json!(format!("{:#x}", state.chain_id())))
}

pub fn block_number(state: &AppState) -> Result<Value, RpcError> {
    Ok(json!(format!("{:#x}", state.store.best_number().unwrap_or(0))))
}

/// `eth_getBalance(address, [block])`. Only the latest state is served.
pub fn get_balance(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let address: Address = param(params, 0)?;
    Ok(json!(format!("{:#x}", state.chain.balance(&address))))
}

/// `eth_getTransactionReceipt(hash)`; `null` until the transaction mines.
pub fn get_transaction_receipt(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let tx_hash: H256 = param(params, 0)?;
    match state.store.receipt(&tx_hash) {
        Some(receipt) => {
            serde_json::to_value(receipt).map_err(|e| RpcError::internal(e.to_string()))
        }
        None => Ok(Value::Null),
    }
}

/// `eth_getBlockByNumber(number | "latest")`, headers only.
pub fn get_block_by_number(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let tag: String = param(params, 0)?;
    let _full: Option<bool> = opt_param(params, 1)?;
    let number = if tag == "latest" {
        state.store.best_number().unwrap_or(0)
    } else {
        splendor_types::parse_hex_u128(&tag)
            .map_err(|e| RpcError::invalid_params(e.to_string()))? as u64
    };

    match state.store.block_by_number(number) {
        Some(block) => {
            let tx_hashes: Vec<String> =
                block.transactions.iter().map(|tx| tx.hash().to_string()).collect();
            let mut value = serde_json::to_value(&block.header)
                .map_err(|e| RpcError::internal(e.to_string()))?;
            value["hash"] = json!(block.header.hash().to_string());
            value["transactions"] = json!(tx_hashes);
            Ok(value)
        }
        None => Ok(Value::Null),
    }
}
