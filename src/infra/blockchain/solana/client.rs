//! JSON-RPC client for Solana clusters.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::domain::{AppError, BlockchainError, SolanaInstruction};
use crate::infra::blockchain::rpc::{JsonRpcTransport, RpcClientConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaSimulation {
    pub error: Option<String>,
    pub units_consumed: u64,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// `processed`, `confirmed` or `finalized`
    pub confirmation_status: Option<String>,
    pub error: Option<String>,
}

impl SignatureStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaTransaction {
    pub error: Option<String>,
    /// Leading instructions that decoded cleanly
    pub instructions: Vec<SolanaInstruction>,
    pub undecodable: Vec<String>,
}

/// Cluster operations the Solana adapter needs.
#[async_trait]
pub trait SolanaRpcApi: Send + Sync {
    async fn slot(&self) -> Result<u64, AppError>;

    async fn latest_blockhash(&self) -> Result<[u8; 32], AppError>;

    /// Dry run without signature verification
    async fn simulate_transaction(&self, wire: &[u8]) -> Result<SolanaSimulation, AppError>;

    /// Broadcast once; returns the first signature
    async fn send_transaction(&self, wire: &[u8]) -> Result<String, AppError>;

    async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, AppError>;

    async fn transaction(&self, signature: &str) -> Result<Option<SolanaTransaction>, AppError>;

    /// Raw account data, `None` when the account does not exist
    async fn account_data(&self, address: &str) -> Result<Option<Vec<u8>>, AppError>;
}

#[derive(Debug, Deserialize)]
struct RpcValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct BlockhashResponse {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationResponse {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    units_consumed: Option<u64>,
    #[serde(default)]
    logs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatusResponse {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompiledInstructionResponse {
    program_id_index: usize,
    #[serde(default)]
    accounts: Vec<usize>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    account_keys: Vec<String>,
    instructions: Vec<CompiledInstructionResponse>,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    message: MessageResponse,
}

#[derive(Debug, Default, Deserialize)]
struct LoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    loaded_addresses: Option<LoadedAddresses>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    transaction: TransactionBody,
    #[serde(default)]
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    data: (String, String),
}

fn decode_failed(message: impl Into<String>) -> AppError {
    AppError::Blockchain(BlockchainError::DeserializationFailed(message.into()))
}

impl CompiledInstructionResponse {
    fn resolve(self, keys: &[String]) -> Result<SolanaInstruction, BlockchainError> {
        let key = |index: usize| {
            keys.get(index).cloned().ok_or_else(|| {
                BlockchainError::DeserializationFailed(format!(
                    "account index {index} out of range"
                ))
            })
        };
        Ok(SolanaInstruction {
            program_id: key(self.program_id_index)?,
            accounts: self
                .accounts
                .iter()
                .map(|i| key(*i))
                .collect::<Result<_, _>>()?,
            data: bs58::decode(&self.data).into_vec().map_err(|e| {
                BlockchainError::DeserializationFailed(format!("instruction data: {e}"))
            })?,
        })
    }
}

impl From<TransactionResponse> for SolanaTransaction {
    /// Instructions are positional, so decoding stops at the first one that
    /// cannot be resolved and the rest are reported as undecodable.
    fn from(response: TransactionResponse) -> Self {
        let meta = response.meta;
        let error = meta.as_ref().and_then(|m| m.err.as_ref()).map(Value::to_string);

        // v0 transactions index into the static keys followed by looked-up addresses
        let mut keys = response.transaction.message.account_keys;
        if let Some(loaded) = meta.and_then(|m| m.loaded_addresses) {
            keys.extend(loaded.writable);
            keys.extend(loaded.readonly);
        }

        let compiled = response.transaction.message.instructions;
        let total = compiled.len();
        let mut instructions = Vec::with_capacity(total);
        let mut undecodable = Vec::new();
        for (index, ix) in compiled.into_iter().enumerate() {
            match ix.resolve(&keys) {
                Ok(ix) => instructions.push(ix),
                Err(e) => {
                    undecodable.push(format!("instruction {index}: {e}"));
                    if index + 1 < total {
                        undecodable.push(format!(
                            "instructions {}..{total} not read",
                            index + 1
                        ));
                    }
                    break;
                }
            }
        }

        SolanaTransaction {
            error,
            instructions,
            undecodable,
        }
    }
}

pub struct SolanaRpcClient {
    transport: JsonRpcTransport,
}

impl SolanaRpcClient {
    pub fn new(rpc_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        Ok(Self {
            transport: JsonRpcTransport::new(rpc_url, config)?,
        })
    }
}

#[async_trait]
impl SolanaRpcApi for SolanaRpcClient {
    async fn slot(&self) -> Result<u64, AppError> {
        self.transport.call("getSlot", json!([])).await
    }

    #[instrument(skip(self))]
    async fn latest_blockhash(&self) -> Result<[u8; 32], AppError> {
        let result: RpcValue<BlockhashResponse> = self
            .transport
            .call("getLatestBlockhash", json!([{"commitment": "finalized"}]))
            .await?;
        let bytes = bs58::decode(&result.value.blockhash)
            .into_vec()
            .map_err(|e| decode_failed(format!("blockhash: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| decode_failed("blockhash must be 32 bytes"))
    }

    #[instrument(skip(self, wire))]
    async fn simulate_transaction(&self, wire: &[u8]) -> Result<SolanaSimulation, AppError> {
        let params = json!([
            BASE64.encode(wire),
            {"encoding": "base64", "sigVerify": false, "replaceRecentBlockhash": true}
        ]);
        let result: RpcValue<SimulationResponse> =
            self.transport.call("simulateTransaction", params).await?;
        let value = result.value;
        Ok(SolanaSimulation {
            error: value.err.map(|e| e.to_string()),
            units_consumed: value.units_consumed.unwrap_or_default(),
            logs: value.logs.unwrap_or_default(),
        })
    }

    async fn send_transaction(&self, wire: &[u8]) -> Result<String, AppError> {
        let params = json!([BASE64.encode(wire), {"encoding": "base64"}]);
        self.transport.send("sendTransaction", params).await
    }

    async fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, AppError> {
        let params = json!([[signature], {"searchTransactionHistory": true}]);
        let result: RpcValue<Vec<Option<SignatureStatusResponse>>> =
            self.transport.call("getSignatureStatuses", params).await?;
        Ok(result.value.into_iter().next().flatten().map(|status| SignatureStatus {
            confirmation_status: status.confirmation_status,
            error: status.err.map(|e| e.to_string()),
        }))
    }

    #[instrument(skip(self))]
    async fn transaction(&self, signature: &str) -> Result<Option<SolanaTransaction>, AppError> {
        let params = json!([
            signature,
            {"encoding": "json", "commitment": "confirmed", "maxSupportedTransactionVersion": 0}
        ]);
        let response: Option<TransactionResponse> =
            self.transport.call("getTransaction", params).await?;
        let tx = response.map(SolanaTransaction::from);
        if let Some(tx) = tx.as_ref().filter(|tx| !tx.undecodable.is_empty()) {
            warn!(signature, skipped = ?tx.undecodable, "Transaction has undecodable instructions");
        }
        Ok(tx)
    }

    async fn account_data(&self, address: &str) -> Result<Option<Vec<u8>>, AppError> {
        let params = json!([address, {"encoding": "base64"}]);
        let result: RpcValue<Option<AccountResponse>> =
            self.transport.call("getAccountInfo", params).await?;
        result
            .value
            .map(|account| {
                BASE64
                    .decode(account.data.0)
                    .map_err(|e| decode_failed(format!("account data: {e}")))
            })
            .transpose()
    }
}
