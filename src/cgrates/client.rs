//! HTTP JSON-RPC client for the rating engine, CDR store and resource limiter.

use reqwest::{Client, ClientBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, instrument};

use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::error::ChargingError;

/// Connection to a remote engine speaking JSON-RPC over HTTP.
pub struct CgratesClient {
    http_client: Client,
    base_url: String,
    timeout_ms: u64,
    request_id: AtomicU64,
}

impl CgratesClient {
    /// Creates a client for `base_url` (e.g. "http://127.0.0.1:2080/jsonrpc").
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, ChargingError> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ChargingError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.to_string(),
            timeout_ms,
            request_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Executes one call. Remote error text is mapped onto the error
    /// taxonomy by suffix.
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn call<T, R>(&self, method: &str, params: T) -> Result<R, ChargingError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request_id = self.next_id();

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: vec![params],
            id: request_id,
        };

        debug!("RPC request: method={}, id={}", method, request_id);

        let response = self
            .http_client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChargingError::TimedOut
                } else {
                    ChargingError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("❌ RPC HTTP error: status={}", status);
            return Err(ChargingError::Connection(format!("HTTP status {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChargingError::Connection(format!("failed to read body: {}", e)))?;

        debug!("RPC response: {}", body);

        let rpc_response: JsonRpcResponse<R> = serde_json::from_str(&body)
            .map_err(|e| ChargingError::ParserError(format!("{} - body: {}", e, body)))?;

        if let Some(msg) = rpc_response.error_message() {
            return Err(ChargingError::from_rpc_message(&msg));
        }

        rpc_response
            .result
            .ok_or_else(|| ChargingError::ServerError("empty reply".to_string()))
    }

    /// Calls a method whose reply must be the literal `OK`.
    pub async fn call_ok<T: Serialize>(&self, method: &str, params: T) -> Result<(), ChargingError> {
        let reply: String = self.call(method, params).await?;
        if reply != crate::utils::consts::OK {
            return Err(ChargingError::ServerError(format!(
                "unexpected reply from {}: {}",
                method, reply
            )));
        }
        Ok(())
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}
