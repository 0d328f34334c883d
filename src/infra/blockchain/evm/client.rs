//! JSON-RPC client for EVM nodes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::domain::encoding::format_evm_address;
use crate::domain::{AppError, BlockchainError, EvmLog};
use crate::infra::blockchain::rpc::{JsonRpcError, JsonRpcTransport, RpcClientConfig, parse_quantity};

use super::abi::decode_revert_reason;

/// Parameters of `eth_call` and `eth_estimateGas`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmCall {
    pub from: [u8; 20],
    pub to: [u8; 20],
    pub data: Vec<u8>,
    pub gas: Option<u64>,
}

/// Result of executing a call against current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution<T> {
    Success(T),
    Reverted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmReceipt {
    pub status: bool,
    pub logs: Vec<EvmLog>,
    /// Decode failures for logs left out of `logs`
    pub undecodable: Vec<String>,
}

/// Node operations the EVM adapter needs.
#[async_trait]
pub trait EvmRpcApi: Send + Sync {
    async fn chain_id(&self) -> Result<u64, AppError>;

    async fn pending_nonce(&self, address: &[u8; 20]) -> Result<u64, AppError>;

    async fn gas_price(&self) -> Result<u128, AppError>;

    async fn call(&self, call: &EvmCall) -> Result<Execution<Vec<u8>>, AppError>;

    async fn estimate_gas(&self, call: &EvmCall) -> Result<Execution<u64>, AppError>;

    /// Broadcast once; returns the transaction hash
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, AppError>;

    /// `None` when the node does not know the hash, `Some(true)` while it
    /// sits in the mempool.
    async fn transaction_pending(&self, hash: &str) -> Result<Option<bool>, AppError>;

    async fn receipt(&self, hash: &str) -> Result<Option<EvmReceipt>, AppError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    #[serde(default)]
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogResponse {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct ReceiptResponse {
    status: String,
    #[serde(default)]
    logs: Vec<LogResponse>,
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, BlockchainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits)
        .map_err(|e| BlockchainError::DeserializationFailed(format!("{field}: {e}")))
}

fn quantity_u64(field: &str, value: &str) -> Result<u64, BlockchainError> {
    u64::try_from(parse_quantity(value)?)
        .map_err(|_| BlockchainError::DeserializationFailed(format!("{field} exceeds u64")))
}

impl TryFrom<LogResponse> for EvmLog {
    type Error = BlockchainError;

    fn try_from(log: LogResponse) -> Result<Self, Self::Error> {
        let topics = log
            .topics
            .iter()
            .map(|topic| {
                decode_hex("topic", topic)?.try_into().map_err(|_| {
                    BlockchainError::DeserializationFailed("topic must be 32 bytes".to_string())
                })
            })
            .collect::<Result<Vec<[u8; 32]>, _>>()?;
        Ok(EvmLog {
            address: log.address.to_lowercase(),
            topics,
            data: decode_hex("log data", &log.data)?,
        })
    }
}

impl TryFrom<ReceiptResponse> for EvmReceipt {
    type Error = BlockchainError;

    /// Only the status is required; a log that fails to decode is skipped.
    fn try_from(receipt: ReceiptResponse) -> Result<Self, Self::Error> {
        let status = parse_quantity(&receipt.status)? == 1;
        let mut logs = Vec::with_capacity(receipt.logs.len());
        let mut undecodable = Vec::new();
        for (index, log) in receipt.logs.into_iter().enumerate() {
            match EvmLog::try_from(log) {
                Ok(log) => logs.push(log),
                Err(e) => undecodable.push(format!("log {index}: {e}")),
            }
        }
        Ok(EvmReceipt {
            status,
            logs,
            undecodable,
        })
    }
}

fn call_object(call: &EvmCall) -> Value {
    let mut object = json!({
        "from": format_evm_address(&call.from),
        "to": format_evm_address(&call.to),
        "data": format!("0x{}", hex::encode(&call.data)),
    });
    if let Some(gas) = call.gas {
        object["gas"] = json!(format!("0x{gas:x}"));
    }
    object
}

/// Node errors that mean "the call reverted" rather than "the node failed".
fn revert_reason(error: &JsonRpcError) -> Option<String> {
    let is_revert = error.code == 3 || error.message.to_lowercase().contains("revert");
    if !is_revert {
        return None;
    }
    let reason = error
        .data
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|data| decode_hex("revert data", data).ok())
        .and_then(|data| decode_revert_reason(&data));
    Some(match reason {
        Some(reason) => format!("execution reverted: {reason}"),
        None => error.message.clone(),
    })
}

pub struct EvmJsonRpcClient {
    transport: JsonRpcTransport,
}

impl EvmJsonRpcClient {
    pub fn new(rpc_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        Ok(Self {
            transport: JsonRpcTransport::new(rpc_url, config)?,
        })
    }

    async fn execute(&self, method: &str, call: &EvmCall) -> Result<Execution<String>, AppError> {
        match self
            .transport
            .try_call::<_, String>(method, json!([call_object(call), "latest"]))
            .await?
        {
            Ok(result) => Ok(Execution::Success(result)),
            Err(error) => match revert_reason(&error) {
                Some(reason) => Ok(Execution::Reverted(reason)),
                None => Err(AppError::Blockchain(BlockchainError::RpcError(error.to_string()))),
            },
        }
    }
}

#[async_trait]
impl EvmRpcApi for EvmJsonRpcClient {
    async fn chain_id(&self) -> Result<u64, AppError> {
        let id: String = self.transport.call("eth_chainId", json!([])).await?;
        Ok(quantity_u64("chainId", &id)?)
    }

    async fn pending_nonce(&self, address: &[u8; 20]) -> Result<u64, AppError> {
        let nonce: String = self
            .transport
            .call(
                "eth_getTransactionCount",
                json!([format_evm_address(address), "pending"]),
            )
            .await?;
        Ok(quantity_u64("nonce", &nonce)?)
    }

    async fn gas_price(&self) -> Result<u128, AppError> {
        let price: String = self.transport.call("eth_gasPrice", json!([])).await?;
        Ok(parse_quantity(&price)?)
    }

    #[instrument(skip(self, call))]
    async fn call(&self, call: &EvmCall) -> Result<Execution<Vec<u8>>, AppError> {
        Ok(match self.execute("eth_call", call).await? {
            Execution::Success(data) => Execution::Success(decode_hex("eth_call", &data)?),
            Execution::Reverted(reason) => Execution::Reverted(reason),
        })
    }

    #[instrument(skip(self, call))]
    async fn estimate_gas(&self, call: &EvmCall) -> Result<Execution<u64>, AppError> {
        Ok(match self.execute("eth_estimateGas", call).await? {
            Execution::Success(gas) => Execution::Success(quantity_u64("gas", &gas)?),
            Execution::Reverted(reason) => Execution::Reverted(reason),
        })
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, AppError> {
        self.transport
            .send(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await
    }

    async fn transaction_pending(&self, hash: &str) -> Result<Option<bool>, AppError> {
        let tx: Option<TransactionResponse> = self
            .transport
            .call("eth_getTransactionByHash", json!([hash]))
            .await?;
        Ok(tx.map(|tx| tx.block_number.is_none()))
    }

    async fn receipt(&self, hash: &str) -> Result<Option<EvmReceipt>, AppError> {
        let receipt: Option<ReceiptResponse> = self
            .transport
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let receipt = EvmReceipt::try_from(receipt)?;
        if !receipt.undecodable.is_empty() {
            warn!(hash, skipped = ?receipt.undecodable, "Receipt has undecodable logs");
        }
        Ok(Some(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_object_formats_fields() {
        let call = EvmCall {
            from: [0x11; 20],
            to: [0x22; 20],
            data: vec![0xab, 0xcd],
            gas: Some(300_000),
        };
        let object = call_object(&call);
        assert_eq!(object["from"], format!("0x{}", "11".repeat(20)));
        assert_eq!(object["data"], "0xabcd");
        assert_eq!(object["gas"], "0x493e0");

        let without_gas = call_object(&EvmCall { gas: None, ..call });
        assert!(without_gas.get("gas").is_none());
    }

    #[test]
    fn test_revert_reason_detection() {
        let mut payload = vec![0x08, 0xc3, 0x79, 0xa0];
        let mut word = [0u8; 32];
        word[31] = 32;
        payload.extend_from_slice(&word);
        word[31] = 7;
        payload.extend_from_slice(&word);
        let mut text = b"bad opt".to_vec();
        text.resize(32, 0);
        payload.extend_from_slice(&text);

        let error = JsonRpcError {
            code: 3,
            message: "execution reverted".to_string(),
            data: Some(json!(format!("0x{}", hex::encode(&payload)))),
        };
        assert_eq!(
            revert_reason(&error).as_deref(),
            Some("execution reverted: bad opt")
        );

        let plain = JsonRpcError {
            code: -32000,
            message: "execution reverted".to_string(),
            data: None,
        };
        assert_eq!(revert_reason(&plain).as_deref(), Some("execution reverted"));

        let other = JsonRpcError {
            code: -32000,
            message: "header not found".to_string(),
            data: None,
        };
        assert_eq!(revert_reason(&other), None);
    }

    #[test]
    fn test_log_conversion() {
        let log = LogResponse {
            address: "0xABCDEF0000000000000000000000000000000001".to_string(),
            topics: vec![format!("0x{}", "aa".repeat(32))],
            data: "0x0102".to_string(),
        };
        let log = EvmLog::try_from(log).unwrap();
        assert_eq!(log.address, "0xabcdef0000000000000000000000000000000001");
        assert_eq!(log.topics, vec![[0xaa; 32]]);
        assert_eq!(log.data, vec![1, 2]);

        let bad = LogResponse {
            address: "0x01".to_string(),
            topics: vec!["0x1234".to_string()],
            data: "0x".to_string(),
        };
        assert!(EvmLog::try_from(bad).is_err());
    }

    #[test]
    fn test_receipt_skips_undecodable_logs() {
        let good = format!("0x{}", "aa".repeat(32));
        let response: ReceiptResponse = serde_json::from_value(json!({
            "status": "0x1",
            "logs": [
                {"address": "0xabc", "topics": ["0xzz"], "data": "0x"},
                {"address": "0xABC", "topics": [good], "data": "0x01"},
                {"address": "0xabc", "topics": [], "data": "0xq"}
            ]
        }))
        .unwrap();

        let receipt = EvmReceipt::try_from(response).unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].address, "0xabc");
        assert_eq!(receipt.undecodable.len(), 2);
        assert!(receipt.undecodable[0].starts_with("log 0: topic"));
        assert!(receipt.undecodable[1].starts_with("log 2: log data"));
    }

    #[test]
    fn test_receipt_requires_status() {
        let response: ReceiptResponse =
            serde_json::from_value(json!({"status": "yes", "logs": []})).unwrap();
        assert!(EvmReceipt::try_from(response).is_err());
    }
}
