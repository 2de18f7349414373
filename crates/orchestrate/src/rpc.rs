//! Shared JSON-RPC utilities for talking to Ethereum-style endpoints.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{OrchestrateError, Result};

/// Default timeout for a single RPC request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| OrchestrateError::TransientNetwork {
            reason: format!("failed to create HTTP client: {e}"),
        })
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Transport failures (connection reset, timeouts, rate limiting) map to
/// `TransientNetwork`; an error response whose message mentions a revert maps
/// to `OnChainRevert`, since resubmitting the same inputs cannot succeed.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| OrchestrateError::TransientNetwork {
            reason: format!("failed to send {method} request: {e}"),
        })?;

    let result: Value =
        response
            .json()
            .await
            .map_err(|e| OrchestrateError::TransientNetwork {
                reason: format!("failed to parse {method} response: {e}"),
            })?;

    if let Some(error) = result.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();
        return Err(classify_rpc_error(message));
    }

    let result_value = result
        .get("result")
        .ok_or_else(|| OrchestrateError::TransientNetwork {
            reason: format!("no result in {method} response"),
        })?
        .clone();

    serde_json::from_value(result_value).map_err(|e| OrchestrateError::TransientNetwork {
        reason: format!("failed to deserialize {method} result: {e}"),
    })
}

/// Classify an error message returned by the node.
fn classify_rpc_error(message: String) -> OrchestrateError {
    if message.to_ascii_lowercase().contains("revert") {
        OrchestrateError::OnChainRevert { reason: message }
    } else {
        OrchestrateError::TransientNetwork { reason: message }
    }
}
