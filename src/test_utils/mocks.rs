//! Mock implementations for testing.
//!
//! [`MockChainAdapter`] stands in for a ledger: its simulation result,
//! confirmation outcome and completion evidence are configurable, and it
//! records every call so tests can assert on what the orchestrator did.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::{
    AppError, AssetId, BlockchainError, ChainAdapter, ChainTxRef, CommitHash, CompletionAmount,
    CompletionEvidence, CompletionRule, ConfirmationOutcome, ConfirmationWait, ConfirmedTransaction,
    CurrencyRegistry, LedgerKind, NetworkDescriptor, PaymentIntent, SimulationResult,
    UnsignedTransaction, UserLimits,
};

pub const MOVE_NETWORK: &str = "aptos-testnet";
pub const EVM_NETWORK: &str = "eth-sepolia";
pub const SOLANA_NETWORK: &str = "solana-devnet";

pub const MOVE_USDC: &str = "0x69091fbab5f7d635ee7ac5098cf0c1efbe31d68fec0f2cd565e8d168daf52832";
pub const EVM_USDC: &str = "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238";
pub const SOLANA_USDC: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

/// Registry with one network per ledger kind, each offering its native coin and USDC.
pub fn sample_registry() -> CurrencyRegistry {
    CurrencyRegistry::new([
        NetworkDescriptor::new(MOVE_NETWORK, LedgerKind::Move, "APT").with_asset("USDC", MOVE_USDC),
        NetworkDescriptor::new(EVM_NETWORK, LedgerKind::Evm, "ETH").with_asset("USDC", EVM_USDC),
        NetworkDescriptor::new(SOLANA_NETWORK, LedgerKind::Solana, "SOL")
            .with_asset("USDC", SOLANA_USDC),
    ])
}

/// Payer and recipient addresses in the ledger's native format.
pub fn sample_parties(kind: LedgerKind) -> (String, String) {
    match kind {
        LedgerKind::Move => (format!("0x{}", "11".repeat(32)), format!("0x{}", "22".repeat(32))),
        LedgerKind::Evm => (format!("0x{}", "11".repeat(20)), format!("0x{}", "22".repeat(20))),
        LedgerKind::Solana => (
            bs58::encode([0x11u8; 32]).into_string(),
            bs58::encode([0x22u8; 32]).into_string(),
        ),
    }
}

/// What the mock saw in one build call.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildCall {
    pub intent: PaymentIntent,
    pub asset: AssetId,
    pub commit_hash: Option<CommitHash>,
}

/// Mock ledger adapter.
///
/// Defaults to a healthy ledger whose simulations succeed and whose
/// transactions confirm successfully with no completion evidence.
pub struct MockChainAdapter {
    network: String,
    kind: LedgerKind,
    signer: String,
    requires_commit_hash: bool,
    latency: Option<Duration>,
    confirmation_delay: Option<Duration>,
    healthy: AtomicBool,
    simulation: Mutex<SimulationResult>,
    submit_error: Mutex<Option<String>>,
    outcome: Mutex<Option<ConfirmationOutcome>>,
    completion: Mutex<Result<Option<CompletionAmount>, BlockchainError>>,
    rule: Option<Box<dyn CompletionRule>>,
    limits: Mutex<Option<UserLimits>>,
    builds: Mutex<Vec<BuildCall>>,
    submissions: Mutex<Vec<UnsignedTransaction>>,
    precommits: Mutex<Vec<CommitHash>>,
    next_ref: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    confirmation_calls: AtomicU64,
}

impl MockChainAdapter {
    #[must_use]
    pub fn new(network: &str, kind: LedgerKind) -> Self {
        Self {
            network: network.to_string(),
            kind,
            signer: format!("{network}-signer"),
            requires_commit_hash: true,
            latency: None,
            confirmation_delay: None,
            healthy: AtomicBool::new(true),
            simulation: Mutex::new(SimulationResult::succeeded(1_000)),
            submit_error: Mutex::new(None),
            outcome: Mutex::new(None),
            completion: Mutex::new(Ok(None)),
            rule: None,
            limits: Mutex::new(None),
            builds: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            precommits: Mutex::new(Vec::new()),
            next_ref: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            confirmation_calls: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_signer(mut self, signer: &str) -> Self {
        self.signer = signer.to_string();
        self
    }

    /// Mirrors a paymaster-signed Solana setup when `false`.
    #[must_use]
    pub fn with_commit_hash_required(mut self, required: bool) -> Self {
        self.requires_commit_hash = required;
        self
    }

    /// Delay applied inside every build call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay applied inside every confirmation query.
    #[must_use]
    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_simulation(self, result: SimulationResult) -> Self {
        *self.simulation.lock().unwrap() = result;
        self
    }

    #[must_use]
    pub fn with_submit_error(self, message: &str) -> Self {
        *self.submit_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Fixed outcome for every confirmation query.
    #[must_use]
    pub fn with_outcome(self, outcome: ConfirmationOutcome) -> Self {
        *self.outcome.lock().unwrap() = Some(outcome);
        self
    }

    /// Successful inclusion whose completion rule yields `amount` of `asset`.
    #[must_use]
    pub fn with_completion(self, amount: u64, asset: AssetId) -> Self {
        *self.completion.lock().unwrap() = Ok(Some(CompletionAmount { amount, asset }));
        self
    }

    #[must_use]
    pub fn with_completion_error(self, error: BlockchainError) -> Self {
        *self.completion.lock().unwrap() = Err(error);
        self
    }

    /// Extract completions with a real ledger rule instead of the canned result.
    #[must_use]
    pub fn with_completion_rule(mut self, rule: impl CompletionRule + 'static) -> Self {
        self.rule = Some(Box::new(rule));
        self
    }

    #[must_use]
    pub fn with_limits(self, limits: UserLimits) -> Self {
        *self.limits.lock().unwrap() = Some(limits);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    pub fn builds(&self) -> Vec<BuildCall> {
        self.builds.lock().unwrap().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn precommits(&self) -> Vec<CommitHash> {
        self.precommits.lock().unwrap().clone()
    }

    pub fn confirmation_calls(&self) -> u64 {
        self.confirmation_calls.load(Ordering::SeqCst)
    }

    /// Highest number of build calls observed running at the same time.
    pub fn max_concurrent_builds(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn issue_reference(&self) -> ChainTxRef {
        let n = self.next_ref.fetch_add(1, Ordering::SeqCst);
        format!("{}-tx-{n}", self.network)
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn network(&self) -> &str {
        &self.network
    }

    fn kind(&self) -> LedgerKind {
        self.kind
    }

    fn signer_address(&self) -> String {
        self.signer.clone()
    }

    fn requires_commit_hash(&self) -> bool {
        self.requires_commit_hash
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Blockchain(BlockchainError::Connection(
                "mock node unreachable".to_string(),
            )))
        }
    }

    async fn build_payment_transaction(
        &self,
        intent: &PaymentIntent,
        asset: &AssetId,
        commit_hash: Option<&CommitHash>,
    ) -> Result<UnsignedTransaction, AppError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.builds.lock().unwrap().push(BuildCall {
            intent: intent.clone(),
            asset: asset.clone(),
            commit_hash: commit_hash.copied(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(UnsignedTransaction {
            network: self.network.clone(),
            ledger: self.kind,
            signer: self.signer.clone(),
            payload: intent.opt().as_bytes().to_vec(),
        })
    }

    async fn simulate(&self, _tx: &UnsignedTransaction) -> Result<SimulationResult, AppError> {
        Ok(self.simulation.lock().unwrap().clone())
    }

    async fn sign_and_submit(&self, tx: &UnsignedTransaction) -> Result<ChainTxRef, AppError> {
        self.submissions.lock().unwrap().push(tx.clone());
        if let Some(message) = self.submit_error.lock().unwrap().clone() {
            return Err(AppError::Blockchain(BlockchainError::SubmissionFailed(
                message,
            )));
        }
        Ok(self.issue_reference())
    }

    async fn await_confirmation(
        &self,
        reference: &str,
        _wait: &ConfirmationWait,
    ) -> Result<ConfirmationOutcome, AppError> {
        self.confirmation_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.confirmation_delay {
            tokio::time::sleep(delay).await;
        }
        let configured = self.outcome.lock().unwrap().clone();
        Ok(match configured {
            Some(ConfirmationOutcome::Included(mut tx)) => {
                tx.reference = reference.to_string();
                ConfirmationOutcome::Included(tx)
            }
            Some(other) => other,
            None => ConfirmationOutcome::Included(ConfirmedTransaction {
                reference: reference.to_string(),
                success: true,
                vm_status: None,
                evidence: CompletionEvidence::Events(Vec::new()),
                undecodable: Vec::new(),
            }),
        })
    }

    async fn query_user_limits(&self, address: &str) -> Result<UserLimits, AppError> {
        let limits = *self.limits.lock().unwrap();
        limits.ok_or_else(|| {
            AppError::Blockchain(BlockchainError::AccountNotFound(address.to_string()))
        })
    }

    fn parse_completion_event(
        &self,
        tx: &ConfirmedTransaction,
    ) -> Result<Option<CompletionAmount>, BlockchainError> {
        match &self.rule {
            Some(rule) => rule.extract(&tx.evidence),
            None => self.completion.lock().unwrap().clone(),
        }
    }

    async fn precommit(&self, commit_hash: &CommitHash) -> Result<ChainTxRef, AppError> {
        if self.kind != LedgerKind::Move {
            return Err(AppError::NotSupported(format!(
                "merchant precommit is not available on {} ledgers",
                self.kind
            )));
        }
        self.precommits.lock().unwrap().push(*commit_hash);
        Ok(self.issue_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_submissions() {
        let mock = MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move);
        let intent = PaymentIntent::new("0x1", "0x2", 5, "APT", "abcd").unwrap();
        let tx = mock
            .build_payment_transaction(&intent, &AssetId::native(), None)
            .await
            .unwrap();

        let first = mock.sign_and_submit(&tx).await.unwrap();
        let second = mock.sign_and_submit(&tx).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(mock.build_count(), 1);
        assert_eq!(mock.submit_count(), 2);
        assert_eq!(mock.max_concurrent_builds(), 1);
    }

    #[tokio::test]
    async fn test_mock_health_toggle() {
        let mock = MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm);
        assert!(mock.health_check().await.is_ok());
        mock.set_healthy(false);
        assert!(mock.health_check().await.is_err());
    }

    #[test]
    fn test_sample_registry_covers_every_ledger() {
        let registry = sample_registry();
        assert_eq!(
            registry.network_names(),
            vec![MOVE_NETWORK, EVM_NETWORK, SOLANA_NETWORK]
        );
    }
}
