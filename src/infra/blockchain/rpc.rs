//! JSON-RPC 2.0 transport shared by the EVM and Solana clients.

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{instrument, warn};

use crate::domain::{AppError, BlockchainError};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Error object reported by the node itself.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

pub struct JsonRpcTransport {
    http_client: Client,
    rpc_url: String,
    config: RpcClientConfig,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(rpc_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;
        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Read call with retries; node errors are mapped to [`BlockchainError`].
    #[instrument(skip(self, params), fields(rpc_url = %self.rpc_url))]
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, AppError> {
        match self.try_call(method, params).await? {
            Ok(result) => Ok(result),
            Err(error) => Err(map_node_error(&error, BlockchainError::RpcError)),
        }
    }

    /// Read call with retries that hands node-reported errors back to the caller.
    ///
    /// The outer error is a transport failure; the inner one is the node's
    /// answer (a revert or a failed preflight, for example).
    pub async fn try_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<Result<R, JsonRpcError>, AppError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.do_rpc_call(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Blockchain(BlockchainError::RpcError("Unknown error".to_string()))
        }))
    }

    /// Single attempt for calls that must never be repeated, such as broadcasts.
    #[instrument(skip(self, params), fields(rpc_url = %self.rpc_url))]
    pub async fn send<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, AppError> {
        match self.do_rpc_call(method, &params).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(map_node_error(&error, BlockchainError::SubmissionFailed)),
            Err(AppError::Blockchain(BlockchainError::RpcError(msg))) => Err(AppError::Blockchain(
                BlockchainError::SubmissionFailed(msg),
            )),
            Err(e) => Err(e),
        }
    }

    async fn do_rpc_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<Result<R, JsonRpcError>, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
                } else if e.is_connect() {
                    AppError::Blockchain(BlockchainError::Connection(e.to_string()))
                } else {
                    AppError::Blockchain(BlockchainError::RpcError(e.to_string()))
                }
            })?;

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::RpcError(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Ok(Err(error));
        }

        // `null` is a meaningful answer for lookups such as unknown hashes
        let result = rpc_response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map(Ok).map_err(|e| {
            AppError::Blockchain(BlockchainError::RpcError(format!(
                "Unexpected {method} response: {e}"
            )))
        })
    }
}

fn map_node_error(error: &JsonRpcError, wrap: fn(String) -> BlockchainError) -> AppError {
    if error.message.to_lowercase().contains("insufficient funds") {
        return AppError::Blockchain(BlockchainError::InsufficientFunds);
    }
    AppError::Blockchain(wrap(error.to_string()))
}

/// Parses a `0x`-prefixed hex quantity as returned by EVM nodes.
pub fn parse_quantity(value: &str) -> Result<u128, BlockchainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| BlockchainError::DeserializationFailed(format!("quantity '{value}': {e}")))
}
