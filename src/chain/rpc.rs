//! Solana JSON-RPC broadcaster
//!
//! `sendTransaction` with base64 encoding, then poll `getSignatureStatuses`
//! until the transaction reaches `confirmed` or `finalized`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{BroadcastError, TransactionBroadcaster};

/// Default interval between status polls
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Broadcasts through a Solana JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcBroadcaster {
    client: reqwest::Client,
    rpc_url: String,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RpcBroadcaster {
    pub fn new(rpc_url: &str, confirm_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.to_string(),
            confirm_timeout,
            poll_interval: POLL_INTERVAL,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, BroadcastError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BroadcastError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| BroadcastError::Transport(format!("invalid response: {e}")))?;

        rpc_result(response)
    }

    async fn send(&self, signed_tx: &[u8]) -> Result<String, BroadcastError> {
        let result = self
            .call(
                "sendTransaction",
                json!([BASE64.encode(signed_tx), { "encoding": "base64" }]),
            )
            .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BroadcastError::Transport("sendTransaction returned no signature".into()))
    }

    async fn is_confirmed(&self, signature: &str) -> Result<bool, BroadcastError> {
        let result = self
            .call("getSignatureStatuses", json!([[signature]]))
            .await?;
        confirmation_status(&result)
    }
}

#[async_trait]
impl TransactionBroadcaster for RpcBroadcaster {
    async fn broadcast_and_confirm(&self, signed_tx: &[u8]) -> Result<String, BroadcastError> {
        let signature = self.send(signed_tx).await?;
        debug!(signature = %signature, "Transaction sent, awaiting confirmation");

        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            if self.is_confirmed(&signature).await? {
                info!(signature = %signature, "Transaction confirmed");
                return Ok(signature);
            }
            if Instant::now() >= deadline {
                return Err(BroadcastError::ConfirmationTimeout(signature));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Extract `result` from a JSON-RPC response, turning `error` into `Rejected`.
fn rpc_result(mut response: Value) -> Result<Value, BroadcastError> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown RPC error");
        return Err(BroadcastError::Rejected(message.to_string()));
    }

    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(BroadcastError::Transport("response has no result".into())),
    }
}

/// Read the first entry of a `getSignatureStatuses` result.
fn confirmation_status(result: &Value) -> Result<bool, BroadcastError> {
    let status = &result["value"][0];
    if status.is_null() {
        return Ok(false);
    }
    if !status["err"].is_null() {
        return Err(BroadcastError::Rejected(format!(
            "transaction failed: {}",
            status["err"]
        )));
    }

    Ok(matches!(
        status["confirmationStatus"].as_str(),
        Some("confirmed") | Some("finalized")
    ))
}
