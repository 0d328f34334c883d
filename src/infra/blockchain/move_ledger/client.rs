//! REST client for Move ledger full nodes.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::domain::{AppError, BlockchainError, LedgerEvent};
use crate::infra::blockchain::rpc::RpcClientConfig;

const BCS_SIGNED_TRANSACTION: &str = "application/x.aptos.signed_transaction+bcs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerInfo {
    pub chain_id: u8,
    pub ledger_timestamp_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveSimulation {
    pub success: bool,
    pub vm_status: String,
    pub gas_used: u64,
}

/// A transaction as reported by `transactions/by_hash`.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveTransaction {
    Pending,
    Committed {
        success: bool,
        vm_status: String,
        events: Vec<LedgerEvent>,
        undecodable: Vec<String>,
    },
}

/// Node operations the Move adapter needs.
#[async_trait]
pub trait MoveNodeApi: Send + Sync {
    async fn ledger_info(&self) -> Result<LedgerInfo, AppError>;

    /// Sequence number of `address`, `None` when the account does not exist
    async fn sequence_number(&self, address: &str) -> Result<Option<u64>, AppError>;

    async fn simulate(&self, signed_txn: Vec<u8>) -> Result<MoveSimulation, AppError>;

    /// Broadcast once; returns the transaction hash
    async fn submit(&self, signed_txn: Vec<u8>) -> Result<String, AppError>;

    /// `None` when the node does not know the hash
    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<MoveTransaction>, AppError>;

    async fn view(
        &self,
        function: &str,
        type_arguments: &[String],
        arguments: Vec<Value>,
    ) -> Result<Vec<Value>, AppError>;
}

#[derive(Debug, Deserialize)]
struct LedgerInfoResponse {
    chain_id: u8,
    ledger_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    sequence_number: String,
}

#[derive(Debug, Deserialize)]
struct SimulationResponse {
    success: bool,
    vm_status: String,
    gas_used: String,
}

#[derive(Debug, Deserialize)]
struct PendingTransactionResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    vm_status: Option<String>,
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct NodeErrorResponse {
    message: String,
    #[serde(default)]
    vm_error_code: Option<u64>,
}

/// Splits raw node events into typed events and decode failures.
fn decode_events(raw: Vec<Value>) -> (Vec<LedgerEvent>, Vec<String>) {
    let mut events = Vec::with_capacity(raw.len());
    let mut undecodable = Vec::new();
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<EventResponse>(value) {
            Ok(e) => events.push(LedgerEvent {
                type_name: e.type_name,
                data: e.data,
            }),
            Err(e) => undecodable.push(format!("event {index}: {e}")),
        }
    }
    (events, undecodable)
}

pub struct MoveRestClient {
    http_client: Client,
    base_url: String,
    config: RpcClientConfig,
}

fn rpc_error(e: impl std::fmt::Display) -> AppError {
    AppError::Blockchain(BlockchainError::RpcError(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
    } else if e.is_connect() {
        AppError::Blockchain(BlockchainError::Connection(e.to_string()))
    } else {
        rpc_error(e)
    }
}

fn parse_u64(field: &str, value: &str) -> Result<u64, AppError> {
    value.parse().map_err(|_| {
        AppError::Blockchain(BlockchainError::DeserializationFailed(format!(
            "{field} '{value}' is not a u64"
        )))
    })
}

async fn node_error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<NodeErrorResponse>().await {
        Ok(body) => match body.vm_error_code {
            Some(code) => format!("{status}: {} (vm error {code})", body.message),
            None => format!("{status}: {}", body.message),
        },
        Err(_) => status.to_string(),
    }
}

impl MoveRestClient {
    /// `base_url` is the node's REST root, e.g. `https://fullnode.testnet.aptoslabs.com/v1`.
    pub fn new(base_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    /// GET with retries; `None` on 404.
    async fn get_json<R: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Option<R>, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.do_get(&url).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, url = %url, "Node request failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| rpc_error("Unknown error")))
    }

    async fn do_get<R: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<Option<R>, AppError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rpc_error(node_error_message(response).await));
        }
        response.json().await.map(Some).map_err(rpc_error)
    }

    async fn post_bcs(&self, path: &str, body: Vec<u8>) -> Result<reqwest::Response, AppError> {
        self.http_client
            .post(format!("{}{}", self.base_url, path))
            .header(reqwest::header::CONTENT_TYPE, BCS_SIGNED_TRANSACTION)
            .body(body)
            .send()
            .await
            .map_err(transport_error)
    }
}

#[async_trait]
impl MoveNodeApi for MoveRestClient {
    #[instrument(skip(self))]
    async fn ledger_info(&self) -> Result<LedgerInfo, AppError> {
        let info: LedgerInfoResponse = self
            .get_json("/")
            .await?
            .ok_or_else(|| rpc_error("ledger info not available"))?;
        let micros = parse_u64("ledger_timestamp", &info.ledger_timestamp)?;
        Ok(LedgerInfo {
            chain_id: info.chain_id,
            ledger_timestamp_secs: micros / 1_000_000,
        })
    }

    #[instrument(skip(self))]
    async fn sequence_number(&self, address: &str) -> Result<Option<u64>, AppError> {
        let account: Option<AccountResponse> =
            self.get_json(&format!("/accounts/{address}")).await?;
        account
            .map(|a| parse_u64("sequence_number", &a.sequence_number))
            .transpose()
    }

    #[instrument(skip(self, signed_txn))]
    async fn simulate(&self, signed_txn: Vec<u8>) -> Result<MoveSimulation, AppError> {
        let response = self.post_bcs("/transactions/simulate", signed_txn).await?;
        if !response.status().is_success() {
            return Err(AppError::Blockchain(BlockchainError::SimulationFailed(
                node_error_message(response).await,
            )));
        }
        let results: Vec<SimulationResponse> = response.json().await.map_err(rpc_error)?;
        let first = results
            .into_iter()
            .next()
            .ok_or_else(|| rpc_error("empty simulation response"))?;
        Ok(MoveSimulation {
            success: first.success,
            vm_status: first.vm_status,
            gas_used: parse_u64("gas_used", &first.gas_used)?,
        })
    }

    #[instrument(skip(self, signed_txn))]
    async fn submit(&self, signed_txn: Vec<u8>) -> Result<String, AppError> {
        let response = self.post_bcs("/transactions", signed_txn).await?;
        if !response.status().is_success() {
            return Err(AppError::Blockchain(BlockchainError::SubmissionFailed(
                node_error_message(response).await,
            )));
        }
        let pending: PendingTransactionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::SubmissionFailed(e.to_string())))?;
        Ok(pending.hash)
    }

    #[instrument(skip(self))]
    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<MoveTransaction>, AppError> {
        let tx: Option<TransactionResponse> = self
            .get_json(&format!("/transactions/by_hash/{hash}"))
            .await?;
        Ok(tx.map(|tx| {
            if tx.kind == "pending_transaction" {
                return MoveTransaction::Pending;
            }
            let (events, undecodable) = decode_events(tx.events);
            if !undecodable.is_empty() {
                warn!(hash, skipped = ?undecodable, "Transaction has undecodable events");
            }
            MoveTransaction::Committed {
                success: tx.success.unwrap_or(false),
                vm_status: tx.vm_status.unwrap_or_default(),
                events,
                undecodable,
            }
        }))
    }

    #[instrument(skip(self, arguments))]
    async fn view(
        &self,
        function: &str,
        type_arguments: &[String],
        arguments: Vec<Value>,
    ) -> Result<Vec<Value>, AppError> {
        let body = json!({
            "function": function,
            "type_arguments": type_arguments,
            "arguments": arguments,
        });
        let response = self
            .http_client
            .post(format!("{}/view", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(rpc_error(node_error_message(response).await));
        }
        response.json().await.map_err(rpc_error)
    }
}
