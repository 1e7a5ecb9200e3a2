//! Shared JSON-RPC-over-HTTP call helper for the `eip155` namespace.
//!
//! Both the read-only passthrough methods and the transaction adapter
//! need the same thing: resolve the chain's currently active endpoint
//! through the network controller, POST a `(method, params)` envelope to
//! it, and report the outcome back so a flaky endpoint gets rotated out.

use serde_json::{json, Value};

use crate::common::error::{Result, WalletError};
use crate::controllers::NetworkController;
use crate::types::ChainRef;

pub async fn call(
    http: &reqwest::Client,
    network: &NetworkController,
    chain_ref: &ChainRef,
    method: &str,
    params: Value,
) -> Result<Value> {
    let endpoint = network
        .active_endpoint(chain_ref)
        .await
        .ok_or_else(|| WalletError::chain_not_registered(chain_ref.to_string()))?;

    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response = http.post(&endpoint).json(&body).send().await;
    let outcome_ok = response.as_ref().map(|r| r.status().is_success()).unwrap_or(false);
    network
        .report_rpc_outcome(chain_ref, chrono::Utc::now().timestamp_millis(), outcome_ok)
        .await
        .ok();

    let response = response.map_err(|e| WalletError::internal(format!("rpc node request failed: {}", e)))?;
    let payload: Value = response
        .json()
        .await
        .map_err(|e| WalletError::internal(format!("rpc node response malformed: {}", e)))?;

    if let Some(error) = payload.get("error") {
        return Err(WalletError::internal(format!("rpc node returned error: {}", error)));
    }

    payload
        .get("result")
        .cloned()
        .ok_or_else(|| WalletError::internal("rpc node returned no result"))
}
