use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use validator::Validate;

use super::error::ValidationError;

/// Upper-cased currency symbol such as `APT`, `ETH` or `USDC`.
pub type Symbol = String;

/// Transaction hash (Move, EVM) or signature (Solana) returned by a submission.
pub type ChainTxRef = String;

/// Display symbol reported when an on-chain asset is absent from the registry.
pub const UNKNOWN_CURRENCY: &str = "UNKNOWN";

/// The three transaction models the gateway knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Move,
    Evm,
    Solana,
}

impl LedgerKind {
    /// Asset identifier of the ledger's native coin when configuration names none.
    pub fn default_native_asset(self) -> AssetId {
        match self {
            LedgerKind::Move => AssetId::new("0x1::aptos_coin::AptosCoin"),
            LedgerKind::Evm => AssetId::new("0x0000000000000000000000000000000000000000"),
            LedgerKind::Solana => AssetId::native(),
        }
    }
}

impl std::fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LedgerKind::Move => "move",
            LedgerKind::Evm => "evm",
            LedgerKind::Solana => "solana",
        };
        f.write_str(name)
    }
}

/// Chain-specific asset identifier.
///
/// Hex-style identifiers are lower-cased on construction so that comparisons
/// are insensitive to the casing a chain happens to return. For Move struct
/// tags only the address segment is lower-cased; module and struct names keep
/// their case. Base58 identifiers (Solana mints) are kept verbatim. The empty
/// identifier means "native asset" on ledgers that have no native token id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize_identifier(raw.as_ref()))
    }

    pub fn native() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("0x") || trimmed.starts_with("0X")) {
        return trimmed.to_string();
    }
    match trimmed.split_once("::") {
        Some((address, rest)) => format!("{}::{}", address.to_lowercase(), rest),
        None => trimmed.to_lowercase(),
    }
}

/// Normalizes a user-supplied currency symbol for lookups.
pub fn normalize_symbol(symbol: &str) -> Symbol {
    symbol.trim().to_uppercase()
}

/// A payer's request to settle `amount` of `currency` to `recipient` by
/// revealing the one-time secret `opt`.
///
/// Immutable once constructed. `opt` is kept exactly as exchanged; each
/// ledger adapter derives the bytes its contract expects from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    payer: String,
    recipient: String,
    amount: u64,
    currency: Symbol,
    opt: String,
}

impl PaymentIntent {
    pub fn new(
        payer: impl Into<String>,
        recipient: impl Into<String>,
        amount: u64,
        currency: impl AsRef<str>,
        opt: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let payer = payer.into().trim().to_string();
        let recipient = recipient.into().trim().to_string();
        let opt = opt.into();

        if payer.is_empty() {
            return Err(ValidationError::MissingField("payer".to_string()));
        }
        if recipient.is_empty() {
            return Err(ValidationError::MissingField("recipient".to_string()));
        }
        if opt.trim().is_empty() {
            return Err(ValidationError::MissingField("opt".to_string()));
        }
        if amount == 0 {
            return Err(ValidationError::invalid_field(
                "amount",
                "must be greater than 0",
            ));
        }

        Ok(Self {
            payer,
            recipient,
            amount,
            currency: normalize_symbol(currency.as_ref()),
            opt,
        })
    }

    pub fn payer(&self) -> &str {
        &self.payer
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Upper-cased currency symbol; empty when the caller left it to the network default.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn opt(&self) -> &str {
        &self.opt
    }
}

/// SHA-256 digest binding payer, recipient, amount and opt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitHash([u8; 32]);

impl CommitHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        let stripped = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(stripped)
            .map_err(|e| ValidationError::invalid_field("commit_hash", e.to_string()))?;
        let array: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            ValidationError::invalid_field(
                "commit_hash",
                format!("must be 32 bytes, got {}", v.len()),
            )
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Serialize for CommitHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Read-only description of one configured network and its currencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub name: String,
    pub kind: LedgerKind,
    pub native_symbol: Symbol,
    pub assets: BTreeMap<Symbol, AssetId>,
}

impl NetworkDescriptor {
    /// Creates a descriptor whose native symbol maps to the ledger's default native asset.
    pub fn new(name: impl Into<String>, kind: LedgerKind, native_symbol: &str) -> Self {
        let native_symbol = normalize_symbol(native_symbol);
        let mut assets = BTreeMap::new();
        assets.insert(native_symbol.clone(), kind.default_native_asset());
        Self {
            name: name.into().trim().to_lowercase(),
            kind,
            native_symbol,
            assets,
        }
    }

    /// Overrides the asset identifier of the native symbol.
    pub fn with_native_asset(mut self, asset: impl AsRef<str>) -> Self {
        self.assets
            .insert(self.native_symbol.clone(), AssetId::new(asset));
        self
    }

    pub fn with_asset(mut self, symbol: &str, asset: impl AsRef<str>) -> Self {
        self.assets.insert(normalize_symbol(symbol), AssetId::new(asset));
        self
    }

    pub fn native_asset(&self) -> Option<&AssetId> {
        self.assets.get(&self.native_symbol)
    }

    pub fn supported_symbols(&self) -> Vec<Symbol> {
        self.assets.keys().cloned().collect()
    }
}

/// Payment limit counters of a payer account, read fresh from the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLimits {
    pub payment_limit: u64,
    pub tail_update_count: u64,
    pub max_tail_updates: u64,
}

/// Normalized view of a submitted payment, derived fresh on every status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub reference: ChainTxRef,
    pub network: String,
    pub confirmed: bool,
    pub success: bool,
    pub amount: u64,
    pub currency: Symbol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Diagnostic left when the amount could not be extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Outcome of a dry run against current chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_estimate: u64,
    pub vm_error: Option<String>,
}

impl SimulationResult {
    pub fn succeeded(gas_estimate: u64) -> Self {
        Self {
            success: true,
            gas_estimate,
            vm_error: None,
        }
    }

    pub fn failed(vm_error: impl Into<String>) -> Self {
        Self {
            success: false,
            gas_estimate: 0,
            vm_error: Some(vm_error.into()),
        }
    }
}

/// Chain-native unsigned transaction produced by an adapter's build step.
///
/// `payload` is opaque outside the adapter that built it: a BCS raw
/// transaction on Move ledgers, the EIP-155 signing RLP on EVM ledgers and
/// a legacy message on Solana ledgers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub network: String,
    pub ledger: LedgerKind,
    pub signer: String,
    pub payload: Vec<u8>,
}

/// How long, and until what signal, a confirmation wait may block.
#[derive(Debug, Clone)]
pub struct ConfirmationWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl ConfirmationWait {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_millis(500),
            cancel: None,
        }
    }

    /// A single look at the ledger without waiting.
    pub fn probe() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A Move ledger event as returned by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub type_name: String,
    pub data: serde_json::Value,
}

/// An EVM receipt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmLog {
    /// Lower-case `0x`-prefixed emitting contract address.
    pub address: String,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// A compiled Solana instruction with resolved account keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolanaInstruction {
    pub program_id: String,
    pub accounts: Vec<String>,
    pub data: Vec<u8>,
}

/// Raw material a ledger leaves behind for amount extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvidence {
    Events(Vec<LedgerEvent>),
    Logs(Vec<EvmLog>),
    Instructions(Vec<SolanaInstruction>),
}

/// A transaction the ledger reports as included.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedTransaction {
    pub reference: ChainTxRef,
    pub success: bool,
    pub vm_status: Option<String>,
    pub evidence: CompletionEvidence,
    /// Entries the node returned that could not be decoded; they are absent from `evidence`.
    pub undecodable: Vec<String>,
}

/// Raw confirmation state returned by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Pending,
    NotFound,
    Included(ConfirmedTransaction),
}

/// Amount and asset extracted from a confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionAmount {
    pub amount: u64,
    pub asset: AssetId,
}

/// Reference returned to the caller after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSubmission {
    pub transaction_ref: ChainTxRef,
    pub network: String,
    pub signer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<CommitHash>,
}

/// Request payload for submitting a payment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitPaymentRequest {
    #[validate(length(min = 1, max = 64))]
    pub network: String,
    #[validate(length(min = 1, max = 128))]
    pub payer: String,
    #[validate(length(min = 1, max = 128))]
    pub recipient: String,
    #[validate(range(min = 1))]
    pub amount: u64,
    #[serde(default)]
    #[validate(length(max = 16))]
    pub currency: String,
    #[validate(length(min = 1, max = 256))]
    pub opt: String,
    /// Asset id the caller expects the currency to resolve to.
    #[serde(default)]
    pub token_address: Option<String>,
}

/// Request payload for computing a commit hash.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ComputeHashRequest {
    #[serde(default)]
    pub network: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub payer: String,
    #[validate(length(min = 1, max = 128))]
    pub recipient: String,
    #[validate(range(min = 1))]
    pub amount: u64,
    #[validate(length(min = 1, max = 256))]
    pub opt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeHashResponse {
    pub hash: String,
}

/// Request payload for a merchant pre-commit.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PrecommitRequest {
    #[validate(length(min = 1, max = 64))]
    pub network: String,
    #[validate(length(equal = 64))]
    pub commit_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecommitResponse {
    pub transaction_ref: ChainTxRef,
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyValidationResponse {
    pub network: String,
    pub currency: Symbol,
    pub native: bool,
    pub asset: AssetId,
}

/// Public summary of a configured network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub name: String,
    pub kind: LedgerKind,
    pub native_symbol: Symbol,
    pub currencies: Vec<Symbol>,
    pub signer: String,
}

/// Health check status for services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub networks: BTreeMap<String, HealthStatus>,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// Healthy when every network answers, unhealthy when none does.
    pub fn new(networks: BTreeMap<String, HealthStatus>) -> Self {
        let total = networks.len();
        let healthy = networks
            .values()
            .filter(|s| **s == HealthStatus::Healthy)
            .count();
        let status = if healthy == total {
            HealthStatus::Healthy
        } else if healthy == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            networks,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    pub retry_after: u64,
}
