//! Domain traits defining contracts for external systems.

use async_trait::async_trait;

use super::commitment::OtpEncoding;
use super::error::{AppError, BlockchainError};
use super::types::{
    AssetId, ChainTxRef, CommitHash, CompletionAmount, CompletionEvidence, ConfirmationOutcome,
    ConfirmationWait, ConfirmedTransaction, LedgerKind, PaymentIntent, SimulationResult,
    UnsignedTransaction, UserLimits,
};

/// One ledger driven through the payment contract it hosts.
///
/// Implementations own their signer accounts and their RPC client; the
/// orchestrator only ever sees this capability set.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Configured network name this adapter serves
    fn network(&self) -> &str;

    fn kind(&self) -> LedgerKind;

    /// Address of the resolved signer (paymaster when configured, else merchant)
    fn signer_address(&self) -> String;

    /// Whether payments on this ledger carry a commit hash
    fn requires_commit_hash(&self) -> bool;

    /// How the one-time secret is turned into contract bytes
    fn otp_encoding(&self) -> OtpEncoding {
        OtpEncoding::for_ledger(self.kind())
    }

    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Build an unsigned call to the payment-completion entry point
    async fn build_payment_transaction(
        &self,
        intent: &PaymentIntent,
        asset: &AssetId,
        commit_hash: Option<&CommitHash>,
    ) -> Result<UnsignedTransaction, AppError>;

    /// Dry-run against current chain state
    async fn simulate(&self, tx: &UnsignedTransaction) -> Result<SimulationResult, AppError>;

    /// Sign with the resolved signer and broadcast; never retried
    async fn sign_and_submit(&self, tx: &UnsignedTransaction) -> Result<ChainTxRef, AppError>;

    /// Poll until the ledger reports inclusion, the wait times out, or it is cancelled
    async fn await_confirmation(
        &self,
        reference: &str,
        wait: &ConfirmationWait,
    ) -> Result<ConfirmationOutcome, AppError>;

    /// Read the payer's limit counters from chain state
    async fn query_user_limits(&self, address: &str) -> Result<UserLimits, AppError>;

    /// Extract the settled amount and asset; `Ok(None)` when no completion signal exists
    fn parse_completion_event(
        &self,
        tx: &ConfirmedTransaction,
    ) -> Result<Option<CompletionAmount>, BlockchainError>;

    /// Submit a commit hash ahead of the reveal; returns once the node accepts it
    async fn precommit(&self, commit_hash: &CommitHash) -> Result<ChainTxRef, AppError> {
        let _ = commit_hash;
        Err(AppError::NotSupported(format!(
            "merchant precommit is not available on {} ledgers",
            self.kind()
        )))
    }
}

/// Ledger-specific rule turning completion evidence into an amount.
pub trait CompletionRule: Send + Sync {
    fn extract(
        &self,
        evidence: &CompletionEvidence,
    ) -> Result<Option<CompletionAmount>, BlockchainError>;
}
