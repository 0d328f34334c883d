//! Transaction lifecycle interpretation.
//!
//! Every ledger leaves a different trace of a completed payment: Move nodes
//! return typed events, EVM nodes return receipt logs, and on Solana the
//! amount only exists inside the instruction data. Each ledger gets a
//! [`CompletionRule`]; the [`TransactionLifecycleTracker`] turns a raw
//! [`ConfirmationOutcome`] plus the rule's verdict into a [`TransactionRecord`].

use std::sync::Arc;

use serde_json::Value;

use super::encoding::{anchor_discriminator, keccak256};
use super::error::BlockchainError;
use super::registry::CurrencyRegistry;
use super::traits::CompletionRule;
use super::types::{
    AssetId, CompletionAmount, CompletionEvidence, ConfirmationOutcome, ConfirmedTransaction,
    LedgerEvent, TransactionRecord, UNKNOWN_CURRENCY,
};

pub const PAYMENT_COMPLETED_EVENT: &str = "PaymentCompleted";

/// Solidity signature of the contract's completion log.
pub const EVM_PAYMENT_COMPLETED_SIGNATURE: &str =
    "PaymentCompleted(address,address,address,uint256,uint256,bytes,uint64)";

const MOVE_TRANSFER_EVENT_SUFFIXES: &[&str] = &[
    "::fungible_asset::Withdraw",
    "::fungible_asset::Deposit",
    "::coin::CoinWithdraw",
    "::coin::CoinDeposit",
    "::coin::WithdrawEvent",
    "::coin::DepositEvent",
];

const MOVE_ASSET_FIELDS: &[&str] = &["token", "coin_type", "metadata", "asset"];

/// Move ledger rule: the contract's `PaymentCompleted` event first, generic
/// fungible-asset and coin transfer events as fallback.
#[derive(Debug, Clone)]
pub struct MoveEventRule {
    native_asset: AssetId,
}

impl MoveEventRule {
    /// `native_asset` is reported for events that carry no asset field.
    pub fn new(native_asset: AssetId) -> Self {
        Self { native_asset }
    }

    fn asset_of(&self, event: &LedgerEvent) -> AssetId {
        MOVE_ASSET_FIELDS
            .iter()
            .filter_map(|field| event.data.get(*field))
            .find_map(|value| match value {
                Value::String(s) => Some(AssetId::new(s)),
                Value::Object(map) => map
                    .get("inner")
                    .and_then(Value::as_str)
                    .map(AssetId::new),
                _ => None,
            })
            .unwrap_or_else(|| self.native_asset.clone())
    }
}

fn json_amount(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        _ => None,
    }
}

impl CompletionRule for MoveEventRule {
    fn extract(
        &self,
        evidence: &CompletionEvidence,
    ) -> Result<Option<CompletionAmount>, BlockchainError> {
        let CompletionEvidence::Events(events) = evidence else {
            return Err(BlockchainError::DeserializationFailed(
                "expected Move events".to_string(),
            ));
        };

        let suffix = format!("::{PAYMENT_COMPLETED_EVENT}");
        if let Some(event) = events.iter().find(|e| e.type_name.ends_with(&suffix)) {
            let amount = json_amount(event.data.get("amount")).ok_or_else(|| {
                BlockchainError::DeserializationFailed(format!(
                    "{} has no readable amount",
                    event.type_name
                ))
            })?;
            return Ok(Some(CompletionAmount {
                amount,
                asset: self.asset_of(event),
            }));
        }

        let transfer = events
            .iter()
            .filter(|e| {
                MOVE_TRANSFER_EVENT_SUFFIXES
                    .iter()
                    .any(|s| e.type_name.ends_with(s))
            })
            .filter_map(|e| json_amount(e.data.get("amount")).map(|amount| (e, amount)))
            .find(|(_, amount)| *amount > 0);

        Ok(transfer.map(|(event, amount)| CompletionAmount {
            amount,
            asset: self.asset_of(event),
        }))
    }
}

/// EVM rule: decodes only the payment contract's own `PaymentCompleted` log.
#[derive(Debug, Clone)]
pub struct EvmLogRule {
    contract: String,
    topic: [u8; 32],
}

impl EvmLogRule {
    pub fn new(contract: &str) -> Self {
        Self {
            contract: contract.trim().to_lowercase(),
            topic: keccak256(EVM_PAYMENT_COMPLETED_SIGNATURE.as_bytes()),
        }
    }
}

impl CompletionRule for EvmLogRule {
    fn extract(
        &self,
        evidence: &CompletionEvidence,
    ) -> Result<Option<CompletionAmount>, BlockchainError> {
        let CompletionEvidence::Logs(logs) = evidence else {
            return Err(BlockchainError::DeserializationFailed(
                "expected EVM logs".to_string(),
            ));
        };

        let Some(log) = logs.iter().find(|log| {
            log.address.to_lowercase() == self.contract
                && log.topics.first() == Some(&self.topic)
        }) else {
            return Ok(None);
        };

        // payer, recipient and token are indexed
        let token_topic = log.topics.get(3).ok_or_else(|| {
            BlockchainError::DeserializationFailed("PaymentCompleted log lacks token topic".into())
        })?;
        let word = log.data.get(..32).ok_or_else(|| {
            BlockchainError::DeserializationFailed(format!(
                "PaymentCompleted data too short: {} bytes",
                log.data.len()
            ))
        })?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(BlockchainError::DeserializationFailed(
                "PaymentCompleted amount exceeds u64".to_string(),
            ));
        }
        let mut amount_bytes = [0u8; 8];
        amount_bytes.copy_from_slice(&word[24..32]);

        Ok(Some(CompletionAmount {
            amount: u64::from_be_bytes(amount_bytes),
            asset: AssetId::new(format!("0x{}", hex::encode(&token_topic[12..]))),
        }))
    }
}

/// Solana rule: the amount is the trailing little-endian `u64` of the first
/// instruction's data; token payments name the mint as their last account.
#[derive(Debug, Clone)]
pub struct SolanaInstructionRule {
    token_discriminator: [u8; 8],
}

/// Anchor tag (8) + opt length prefix (4) + amount (8)
const MIN_SOLANA_PAYMENT_DATA: usize = 20;

impl SolanaInstructionRule {
    pub fn new() -> Self {
        Self {
            token_discriminator: anchor_discriminator("complete_token_payment"),
        }
    }
}

impl Default for SolanaInstructionRule {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionRule for SolanaInstructionRule {
    fn extract(
        &self,
        evidence: &CompletionEvidence,
    ) -> Result<Option<CompletionAmount>, BlockchainError> {
        let CompletionEvidence::Instructions(instructions) = evidence else {
            return Err(BlockchainError::DeserializationFailed(
                "expected Solana instructions".to_string(),
            ));
        };
        let Some(first) = instructions.first() else {
            return Ok(None);
        };

        let data = &first.data;
        if data.len() < MIN_SOLANA_PAYMENT_DATA {
            return Err(BlockchainError::DeserializationFailed(format!(
                "instruction data too short: {} bytes",
                data.len()
            )));
        }
        let mut amount_bytes = [0u8; 8];
        amount_bytes.copy_from_slice(&data[data.len() - 8..]);

        let asset = if data[..8] == self.token_discriminator {
            first
                .accounts
                .last()
                .map(AssetId::new)
                .unwrap_or_else(AssetId::native)
        } else {
            AssetId::native()
        };

        Ok(Some(CompletionAmount {
            amount: u64::from_le_bytes(amount_bytes),
            asset,
        }))
    }
}

/// Builds normalized records from raw confirmation outcomes.
#[derive(Debug, Clone)]
pub struct TransactionLifecycleTracker {
    registry: Arc<CurrencyRegistry>,
}

impl TransactionLifecycleTracker {
    pub fn new(registry: Arc<CurrencyRegistry>) -> Self {
        Self { registry }
    }

    /// Classifies `outcome` and extracts the settled amount.
    ///
    /// Only a transaction the ledger has never seen is an error. Extraction
    /// failures leave the amount at zero and attach a note instead.
    pub fn record<F>(
        &self,
        network: &str,
        reference: &str,
        outcome: &ConfirmationOutcome,
        extract: F,
    ) -> Result<TransactionRecord, BlockchainError>
    where
        F: FnOnce(&ConfirmedTransaction) -> Result<Option<CompletionAmount>, BlockchainError>,
    {
        let mut record = TransactionRecord {
            reference: reference.to_string(),
            network: network.to_string(),
            confirmed: false,
            success: false,
            amount: 0,
            currency: UNKNOWN_CURRENCY.to_string(),
            error: None,
            note: None,
        };

        let tx = match outcome {
            ConfirmationOutcome::NotFound => {
                return Err(BlockchainError::TransactionNotFound(reference.to_string()));
            }
            ConfirmationOutcome::Pending => return Ok(record),
            ConfirmationOutcome::Included(tx) => tx,
        };

        record.confirmed = true;
        record.success = tx.success;
        if !tx.success {
            record.error = Some(
                tx.vm_status
                    .clone()
                    .unwrap_or_else(|| "transaction failed".to_string()),
            );
            return Ok(record);
        }

        let note = match extract(tx) {
            Ok(Some(completion)) => {
                record.amount = completion.amount;
                record.currency = self.registry.resolve_currency(network, &completion.asset);
                return Ok(record);
            }
            Ok(None) => "no payment completion event found".to_string(),
            Err(e) => e.to_string(),
        };
        record.note = Some(if tx.undecodable.is_empty() {
            note
        } else {
            format!("{note}; skipped undecodable entries: {}", tx.undecodable.join("; "))
        });

        Ok(record)
    }
}
