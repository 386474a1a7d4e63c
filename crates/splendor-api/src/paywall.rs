//! The HTTP-402 paywall contract.
//!
//! A request without payment receives status 402 and a JSON body listing
//! accepted payment requirements. A retry carrying an `X-Payment` header
//! (base64-encoded payment envelope JSON) is verified and settled; on
//! success the protected resource is served with the settlement attached.

use crate::handlers::x402::settle_inner;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use serde_json::json;
use splendor_x402::{PaymentEnvelope, PaymentRequirements, SCHEME_EXACT, X402_VERSION};
use tracing::debug;

/// Requirements quoted for a protected resource. Demo pricing: every
/// resource costs the configured minimum payment, paid to the node's
/// coinbase; real deployments quote per resource.
fn requirements_for(state: &AppState, resource: &str) -> PaymentRequirements {
    let config = state.x402.config();
    PaymentRequirements {
        scheme: SCHEME_EXACT.to_string(),
        network: state.x402.network().to_string(),
        max_amount_required: config.min_payment.max(1),
        resource: format!("/paid/{resource}"),
        description: "paywalled resource".to_string(),
        mime_type: "application/json".to_string(),
        pay_to: state.coinbase,
        max_timeout_seconds: config.settlement_timeout_secs,
        asset: splendor_types::Address::ZERO,
    }
}

/// `GET /paid/:resource`.
pub async fn serve_paid_resource(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> Response {
    let requirements = requirements_for(&state, &resource);

    let Some(header) = headers.get("X-Payment") else {
        return payment_required(&requirements);
    };

    let envelope = match decode_payment_header(header.as_bytes()) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "malformed X-Payment header");
            return payment_required(&requirements);
        }
    };

    // Settle against the server's own quote: the verification rules reject
    // payloads that underpay or redirect the payment.
    let settlement = settle_inner(&state, &requirements, &envelope);
    if !settlement.success {
        let body = json!({
            "x402Version": X402_VERSION,
            "error": settlement.error,
            "accepts": [requirements],
        });
        return (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response();
    }

    let body = json!({
        "resource": resource,
        "payment": settlement,
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn payment_required(requirements: &PaymentRequirements) -> Response {
    let body = json!({
        "x402Version": X402_VERSION,
        "accepts": [requirements],
    });
    (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
}

fn decode_payment_header(raw: &[u8]) -> Result<PaymentEnvelope, String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| format!("base64: {e}"))?;
    serde_json::from_slice(&decoded).map_err(|e| format!("json: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_decoding_round_trips() {
        let envelope_json = json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "splendor",
            "payload": {
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0x2222222222222222222222222222222222222222",
                "value": "0x38d7ea4c68000",
                "validAfter": 1,
                "validBefore": 2,
                "nonce": "0x0000000000000000000000000000000000000000000000000000000000000001",
                "signature": format!("0x{}", "00".repeat(65)),
            }
        });
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&envelope_json).unwrap());
        let envelope = decode_payment_header(encoded.as_bytes()).unwrap();
        assert_eq!(envelope.payload.value, 1_000_000_000_000_000);
        assert!(decode_payment_header(b"!!!not-base64!!!").is_err());
    }
}
