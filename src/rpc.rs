//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to the two endpoints event ingestion needs:
//! the chain head and contract logs in a block range.

use crate::types::{parse_hex_u64, Log};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    ///
    /// `timeout` bounds each HTTP request, so a hung node surfaces as an error
    /// instead of stalling a cycle.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?
            .error_for_status()
            .with_context(|| format!("{} request returned HTTP error", method))?;

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error from {}: {}", method, error);
        }

        // Extract result
        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    /// Get the latest block number.
    pub async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let number = result
            .as_str()
            .context("Block number response is not a string")?;
        parse_hex_u64(number).context("Failed to parse block number")
    }

    /// Get all logs of `address` with `from_block <= block <= to_block`.
    pub async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let filter = json!({
            "address": format!("0x{:x}", address),
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });
        let result = self.call("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result).context("Failed to deserialize logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_quantity_formatting() {
        // eth_getLogs expects unpadded hex quantities
        assert_eq!(format!("0x{:x}", 0u64), "0x0");
        assert_eq!(format!("0x{:x}", 1_000_000u64), "0xf4240");
    }

    #[test]
    fn test_client_keeps_url() {
        let rpc =
            RpcClient::new("http://127.0.0.1:8545".to_string(), Duration::from_secs(5)).unwrap();
        assert_eq!(rpc.url(), "http://127.0.0.1:8545");
    }
}
