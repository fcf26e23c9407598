//! # Chain RPC Client
//!
//! Purely a transport concern: JSON-RPC over an endpoint pool with random
//! rotation and fixed-delay retry. Each call picks a random endpoint and is
//! retried on transport failure or an error-shaped response, up to
//! `2 × endpoint_count` attempts total, before surfacing
//! [`RpcError::Exhausted`]. No result caching happens at this layer.

use crate::config::ChainConfig;
use crate::errors::{ConfigError, RpcError};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256, U64};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::RawLog;

/// The transport seam. Everything above the RPC layer talks to the chain
/// through this trait, which keeps the cache/oracle/decoder testable against
/// in-process mocks.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

pub struct HttpRpcClient {
    endpoints: Vec<String>,
    http: reqwest::Client,
    retry_delay: Duration,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(chain: &ChainConfig) -> Result<Self, ConfigError> {
        if chain.rpc_http_endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one RPC HTTP endpoint is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(chain.rpc_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self {
            endpoints: chain.rpc_http_endpoints.clone(),
            http,
            retry_delay: Duration::from_millis(chain.rpc_retry_delay_ms),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl ChainRpc for HttpRpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let max_attempts = (self.endpoints.len() as u32) * 2;
        let mut last_error: Option<RpcError> = None;

        for attempt in 1..=max_attempts {
            let idx = rand::thread_rng().gen_range(0..self.endpoints.len());
            let endpoint = &self.endpoints[idx];
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let body = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            });

            let error: RpcError = match self.http.post(endpoint).json(&body).send().await {
                Ok(resp) => match resp.json::<Value>().await {
                    Ok(reply) => {
                        if let Some(err) = reply.get("error") {
                            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
                            let message = err
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string();
                            RpcError::ErrorResponse { code, message }
                        } else if let Some(result) = reply.get("result") {
                            return Ok(result.clone());
                        } else {
                            RpcError::Decode("response has neither result nor error".to_string())
                        }
                    }
                    Err(e) => RpcError::Transport(e.to_string()),
                },
                Err(e) => RpcError::Transport(e.to_string()),
            };

            warn!(
                target: "rpc",
                method,
                endpoint = %endpoint,
                attempt,
                max_attempts,
                error = %error,
                "RPC call failed, rotating endpoint"
            );
            last_error = Some(error);
            if attempt < max_attempts {
                sleep(self.retry_delay).await;
            }
        }

        debug!(target: "rpc", method, last_error = ?last_error, "All endpoints exhausted");
        Err(RpcError::Exhausted {
            method: method.to_string(),
            attempts: max_attempts,
        })
    }
}

//================================================================================================//
//                                     TYPED HELPERS                                              //
//================================================================================================//

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: U64,
    pub timestamp: U256,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: H256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

pub async fn block_number(rpc: &dyn ChainRpc) -> Result<u64, RpcError> {
    let result = rpc.call("eth_blockNumber", json!([])).await?;
    let number: U64 = serde_json::from_value(result)
        .map_err(|e| RpcError::Decode(format!("eth_blockNumber: {e}")))?;
    Ok(number.as_u64())
}

/// Fetches a block with full transaction objects.
pub async fn block_by_number(rpc: &dyn ChainRpc, number: u64) -> Result<Option<RpcBlock>, RpcError> {
    let tag = format!("0x{number:x}");
    let result = rpc.call("eth_getBlockByNumber", json!([tag, true])).await?;
    if result.is_null() {
        return Ok(None);
    }
    let block: RpcBlock = serde_json::from_value(result)
        .map_err(|e| RpcError::Decode(format!("eth_getBlockByNumber: {e}")))?;
    Ok(Some(block))
}

pub async fn transaction_receipt(
    rpc: &dyn ChainRpc,
    hash: H256,
) -> Result<Option<RpcReceipt>, RpcError> {
    let result = rpc.call("eth_getTransactionReceipt", json!([hash])).await?;
    if result.is_null() {
        return Ok(None);
    }
    let receipt: RpcReceipt = serde_json::from_value(result)
        .map_err(|e| RpcError::Decode(format!("eth_getTransactionReceipt: {e}")))?;
    Ok(Some(receipt))
}

/// Issues a read-only contract call against the latest state.
pub async fn eth_call(rpc: &dyn ChainRpc, to: Address, data: Vec<u8>) -> Result<Bytes, RpcError> {
    let params = json!([{ "to": to, "data": Bytes::from(data) }, "latest"]);
    let result = rpc.call("eth_call", params).await?;
    let bytes: Bytes =
        serde_json::from_value(result).map_err(|e| RpcError::Decode(format!("eth_call: {e}")))?;
    Ok(bytes)
}
