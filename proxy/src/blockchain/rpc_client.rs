/// Node RPC client - JSON-RPC 2.0 over HTTP to an Ethereum Classic node
///
/// Work is pulled with `eth_getWork` and solutions are pushed with
/// `eth_submitWork`. Every call is bounded by the configured timeout.

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Buf, Method, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{ProxyError, Result};
use crate::metrics::prometheus as metrics;
use crate::shares::SubmitParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

/// Part of `eth_getBlockByNumber("pending")` the proxy cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    pub number: u64,
    pub difficulty: BigUint,
}

/// What the share pipeline and the template manager need from a node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// `[pow_hash, seed_hash, target, height?]`
    async fn get_work(&self) -> Result<Vec<String>>;

    async fn get_pending_block(&self) -> Result<PendingBlock>;

    /// Broadcast a solution. `Ok(false)` means the node refused it.
    async fn submit_block(&self, params: &SubmitParams) -> Result<bool>;
}

pub struct NodeRpcClient {
    url: String,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl NodeRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();

        tracing::info!("NodeRpcClient initialized: {} (timeout {}s)", url, timeout.as_secs());

        Self {
            url: url.to_string(),
            timeout,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call and return its `result`
    pub async fn call(&self, method: &str, params: Value) -> AnyResult<Value> {
        metrics::inc_rpc_requests();

        let res: AnyResult<Value> = async {
            let payload = RpcRequest {
                jsonrpc: "2.0".to_string(),
                id: 0,
                method: method.to_string(),
                params,
            };

            let body = Full::new(Bytes::from(serde_json::to_vec(&payload)?));
            let req = Request::builder()
                .method(Method::POST)
                .uri(&self.url)
                .header("Content-Type", "application/json")
                .body(body)?;

            let response = tokio::time::timeout(self.timeout, self.client.request(req))
                .await
                .map_err(|_| anyhow!("RPC request timeout"))?
                .map_err(|e| anyhow!("RPC connection failed: {}", e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("RPC HTTP error: {}", status));
            }

            let body_bytes = response.into_body().collect().await?.to_bytes();
            let rpc_response: RpcResponse = serde_json::from_reader(body_bytes.reader())?;

            if let Some(error) = rpc_response.error {
                tracing::error!("RPC error from {}: {}", method, error);
                return Err(anyhow!("RPC error: {}", error));
            }

            Ok(rpc_response.result.unwrap_or(Value::Null))
        }
        .await;

        if res.is_err() {
            metrics::inc_rpc_errors();
        }

        res
    }
}

#[async_trait]
impl NodeRpc for NodeRpcClient {
    async fn get_work(&self) -> Result<Vec<String>> {
        let result = self
            .call("eth_getWork", json!([]))
            .await
            .map_err(|e| ProxyError::RpcFailure(e.to_string()))?;
        parse_work_reply(&result)
    }

    async fn get_pending_block(&self) -> Result<PendingBlock> {
        let result = self
            .call("eth_getBlockByNumber", json!(["pending", false]))
            .await
            .map_err(|e| ProxyError::RpcFailure(e.to_string()))?;
        parse_pending_block(&result)
    }

    async fn submit_block(&self, params: &SubmitParams) -> Result<bool> {
        let result = self
            .call("eth_submitWork", json!(params.as_array()))
            .await
            .map_err(|e| ProxyError::RpcFailure(e.to_string()))?;

        let accepted = parse_accepted(&result);
        if !accepted {
            tracing::warn!("eth_submitWork rejected: {}", result);
        }
        Ok(accepted)
    }
}

pub fn parse_work_reply(result: &Value) -> Result<Vec<String>> {
    let reply: Vec<String> = serde_json::from_value(result.clone())?;
    if reply.len() < 3 {
        return Err(ProxyError::RpcFailure(format!(
            "eth_getWork returned {} fields, expected at least 3",
            reply.len()
        )));
    }
    Ok(reply)
}

pub fn parse_pending_block(result: &Value) -> Result<PendingBlock> {
    let field = |name: &str| {
        result
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProxyError::RpcFailure(format!("pending block without {}", name)))
    };

    let number = parse_hex_u64(field("number")?)
        .ok_or_else(|| ProxyError::RpcFailure("pending block number is not hex".to_string()))?;
    let difficulty = parse_hex_biguint(field("difficulty")?)
        .ok_or_else(|| ProxyError::RpcFailure("pending block difficulty is not hex".to_string()))?;

    Ok(PendingBlock { number, difficulty })
}

/// Nodes answer `eth_submitWork` with a bool; some proxies in front of them
/// wrap it in an object.
pub fn parse_accepted(result: &Value) -> bool {
    if let Some(b) = result.as_bool() {
        b
    } else if let Some(obj) = result.as_object() {
        obj.get("accepted")
            .and_then(|v| v.as_bool())
            .or_else(|| {
                obj.get("status")
                    .and_then(|s| s.as_str())
                    .map(|s| s.eq_ignore_ascii_case("accepted") || s.eq_ignore_ascii_case("ok"))
            })
            .unwrap_or(false)
    } else {
        false
    }
}

pub fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

pub fn parse_hex_biguint(s: &str) -> Option<BigUint> {
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return None;
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
}
