//! Payment orchestration.
//!
//! [`PaymentService`] routes every operation to the adapter configured for
//! the requested network. Validation happens locally before any RPC, and
//! submissions from one signer are serialized from build through broadcast
//! so two payments never race for the same sequence number.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::config::ConfirmationSettings;
use crate::domain::{
    AppError, AssetId, BlockchainError, ChainAdapter, CommitHash, ComputeHashRequest, ConfigError,
    ConfirmationOutcome, ConfirmationWait, CurrencyRegistry, CurrencyValidationResponse, HealthResponse, HealthStatus,
    LedgerKind, NetworkSummary, PaymentIntent, PaymentSubmission, PrecommitResponse,
    SubmitPaymentRequest, TransactionLifecycleTracker, TransactionRecord, UserLimits,
    ValidationError, compute_commit_hash, encode_one_time_secret,
};
use crate::domain::commitment::OtpEncoding;
use crate::infra::observability::{PAYMENTS_SUBMITTED, SIMULATION_FAILURES, STATUS_QUERIES};

type SignerKey = (String, String);

/// Orchestrates payments across every configured ledger.
pub struct PaymentService {
    registry: Arc<CurrencyRegistry>,
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
    submission_locks: HashMap<SignerKey, Arc<Mutex<()>>>,
    tracker: TransactionLifecycleTracker,
    confirmation: ConfirmationSettings,
}

impl PaymentService {
    /// Wires adapters to the registry. Every adapter must serve a registered
    /// network of its own ledger kind, and no network may be served twice.
    pub fn new(
        registry: Arc<CurrencyRegistry>,
        adapters: Vec<Arc<dyn ChainAdapter>>,
        confirmation: ConfirmationSettings,
    ) -> Result<Self, AppError> {
        let mut by_network = HashMap::with_capacity(adapters.len());
        let mut submission_locks = HashMap::with_capacity(adapters.len());

        for adapter in adapters {
            let key = format!("networks.{}", adapter.network());
            let descriptor = registry.network(adapter.network())?;
            if descriptor.kind != adapter.kind() {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: format!(
                        "adapter is {} but the network is registered as {}",
                        adapter.kind(),
                        descriptor.kind
                    ),
                }
                .into());
            }
            let name = descriptor.name.clone();
            if by_network.contains_key(&name) {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "network served by more than one adapter".to_string(),
                }
                .into());
            }
            submission_locks.insert(
                (name.clone(), adapter.signer_address()),
                Arc::new(Mutex::new(())),
            );
            by_network.insert(name, adapter);
        }

        let tracker = TransactionLifecycleTracker::new(Arc::clone(&registry));
        Ok(Self {
            registry,
            adapters: by_network,
            submission_locks,
            tracker,
            confirmation,
        })
    }

    pub fn registry(&self) -> &CurrencyRegistry {
        &self.registry
    }

    fn adapter(&self, network: &str) -> Result<&Arc<dyn ChainAdapter>, AppError> {
        let descriptor = self.registry.network(network)?;
        self.adapters.get(&descriptor.name).ok_or_else(|| {
            let mut supported: Vec<String> = self.adapters.keys().cloned().collect();
            supported.sort();
            AppError::Validation(ValidationError::UnsupportedNetwork {
                network: network.to_string(),
                supported,
            })
        })
    }

    fn submission_lock(&self, adapter: &dyn ChainAdapter) -> Arc<Mutex<()>> {
        let key = (adapter.network().to_string(), adapter.signer_address());
        self.submission_locks
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    fn status_wait(&self) -> ConfirmationWait {
        ConfirmationWait::new(self.confirmation.status_timeout)
            .with_poll_interval(self.confirmation.poll_interval)
    }

    fn confirmation_wait(&self) -> ConfirmationWait {
        ConfirmationWait::new(self.confirmation.timeout)
            .with_poll_interval(self.confirmation.poll_interval)
    }

    /// Validates an HTTP request and submits the payment it describes.
    pub async fn submit_payment_request(
        &self,
        request: &SubmitPaymentRequest,
    ) -> Result<PaymentSubmission, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed for payment request");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let intent = PaymentIntent::new(
            request.payer.as_str(),
            request.recipient.as_str(),
            request.amount,
            &request.currency,
            request.opt.as_str(),
        )?;
        self.submit_payment(&request.network, &intent, request.token_address.as_deref())
            .await
    }

    /// Builds, simulates, signs and broadcasts one payment.
    ///
    /// A failed simulation aborts before anything is signed. The broadcast
    /// is never retried; a caller that wants to retry must first check the
    /// status of the returned reference.
    #[instrument(skip(self, intent, token_address), fields(network = %network, signer = tracing::field::Empty))]
    pub async fn submit_payment(
        &self,
        network: &str,
        intent: &PaymentIntent,
        token_address: Option<&str>,
    ) -> Result<PaymentSubmission, AppError> {
        let adapter = self.adapter(network)?;
        let network = adapter.network().to_string();

        let asset = match token_address {
            Some(claimed) => self
                .registry
                .verify_asset(&network, intent.currency(), claimed)?,
            None => self.registry.resolve_asset(&network, intent.currency())?,
        };

        let commit_hash = if adapter.requires_commit_hash() {
            let secret = encode_one_time_secret(intent.opt(), adapter.otp_encoding());
            Some(compute_commit_hash(
                adapter.kind(),
                intent.payer(),
                intent.recipient(),
                intent.amount(),
                &secret,
            )?)
        } else {
            None
        };

        let lock = self.submission_lock(adapter.as_ref());
        let _guard = lock.lock().await;

        let tx = adapter
            .build_payment_transaction(intent, &asset, commit_hash.as_ref())
            .await?;
        tracing::Span::current().record("signer", tx.signer.as_str());

        let simulation = adapter.simulate(&tx).await?;
        if !simulation.success {
            metrics::counter!(SIMULATION_FAILURES, "network" => network.clone()).increment(1);
            let reason = simulation
                .vm_error
                .unwrap_or_else(|| "simulation reported failure".to_string());
            warn!(reason = %reason, "Simulation failed, payment not submitted");
            return Err(AppError::Blockchain(BlockchainError::SimulationFailed(
                reason,
            )));
        }

        let reference = adapter.sign_and_submit(&tx).await?;
        metrics::counter!(PAYMENTS_SUBMITTED, "network" => network.clone()).increment(1);
        info!(
            reference = %reference,
            amount = intent.amount(),
            asset = %asset,
            gas_estimate = simulation.gas_estimate,
            "Payment submitted"
        );

        Ok(PaymentSubmission {
            transaction_ref: reference,
            network,
            signer: tx.signer,
            commit_hash,
        })
    }

    /// Current state of a submitted payment; never mutates chain state.
    #[instrument(skip(self), fields(network = %network, reference = %reference))]
    pub async fn get_status(
        &self,
        network: &str,
        reference: &str,
    ) -> Result<TransactionRecord, AppError> {
        self.track(network, reference, &self.status_wait()).await
    }

    /// Waits up to the confirmation timeout, or until `cancel` fires, for a
    /// payment to be included; a wait that ends early reports it unconfirmed.
    #[instrument(skip(self, cancel), fields(network = %network, reference = %reference))]
    pub async fn await_payment(
        &self,
        network: &str,
        reference: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<TransactionRecord, AppError> {
        let mut wait = self.confirmation_wait();
        if let Some(cancel) = cancel {
            wait = wait.with_cancel(cancel);
        }
        self.track(network, reference, &wait).await
    }

    async fn track(
        &self,
        network: &str,
        reference: &str,
        wait: &ConfirmationWait,
    ) -> Result<TransactionRecord, AppError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ValidationError::MissingField("reference".to_string()).into());
        }
        let adapter = self.adapter(network)?;
        metrics::counter!(STATUS_QUERIES, "network" => adapter.network().to_string())
            .increment(1);

        let outcome = adapter.await_confirmation(reference, wait).await?;
        let record = self.tracker.record(adapter.network(), reference, &outcome, |tx| {
            adapter.parse_completion_event(tx)
        })?;
        if let Some(note) = &record.note {
            warn!(note = %note, "Settled amount could not be extracted");
        }
        Ok(record)
    }

    #[instrument(skip(self), fields(network = %network))]
    pub async fn get_limits(&self, network: &str, address: &str) -> Result<UserLimits, AppError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ValidationError::MissingField("address".to_string()).into());
        }
        self.adapter(network)?.query_user_limits(address).await
    }

    /// Commit hash for the given parties; without a network the Move layout is used.
    pub fn compute_commit_hash(&self, request: &ComputeHashRequest) -> Result<CommitHash, AppError> {
        request.validate()?;

        let (kind, encoding) = match request.network.as_deref().map(str::trim) {
            Some(network) if !network.is_empty() => {
                let adapter = self.adapter(network)?;
                (adapter.kind(), adapter.otp_encoding())
            }
            _ => (LedgerKind::Move, OtpEncoding::for_ledger(LedgerKind::Move)),
        };

        let secret = encode_one_time_secret(&request.opt, encoding);
        Ok(compute_commit_hash(
            kind,
            request.payer.trim(),
            request.recipient.trim(),
            request.amount,
            &secret,
        )?)
    }

    /// Checks a network/currency pair without touching the chain.
    pub fn validate_network_currency(
        &self,
        network: &str,
        currency: &str,
    ) -> Result<CurrencyValidationResponse, AppError> {
        let symbol = self.registry.validate_combination(network, currency)?;
        let descriptor = self.registry.network(network)?;
        let asset = descriptor
            .assets
            .get(&symbol)
            .cloned()
            .unwrap_or_else(AssetId::native);
        Ok(CurrencyValidationResponse {
            network: descriptor.name.clone(),
            native: descriptor.native_symbol == symbol,
            currency: symbol,
            asset,
        })
    }

    /// Records a commit hash on chain with the merchant account and waits for inclusion.
    #[instrument(skip(self, commit_hash), fields(network = %network))]
    pub async fn precommit(
        &self,
        network: &str,
        commit_hash: &str,
    ) -> Result<PrecommitResponse, AppError> {
        let hash = CommitHash::from_hex(commit_hash)?;
        let adapter = self.adapter(network)?;

        let reference = {
            let lock = self.submission_lock(adapter.as_ref());
            let _guard = lock.lock().await;
            adapter.precommit(&hash).await?
        };

        // sequence numbers are taken at submission, so waiting needs no lock
        match adapter
            .await_confirmation(&reference, &self.confirmation_wait())
            .await?
        {
            ConfirmationOutcome::Included(confirmed) if !confirmed.success => {
                return Err(BlockchainError::SubmissionFailed(
                    confirmed
                        .vm_status
                        .unwrap_or_else(|| "precommit failed".to_string()),
                )
                .into());
            }
            ConfirmationOutcome::Included(_) => {}
            _ => {
                return Err(BlockchainError::Timeout(format!(
                    "precommit {reference} not yet included"
                ))
                .into());
            }
        }
        info!(reference = %reference, "Commit hash recorded");

        Ok(PrecommitResponse {
            transaction_ref: reference,
            network: adapter.network().to_string(),
        })
    }

    pub fn networks(&self) -> Vec<NetworkSummary> {
        self.registry
            .descriptors()
            .filter_map(|descriptor| {
                let adapter = self.adapters.get(&descriptor.name)?;
                Some(NetworkSummary {
                    name: descriptor.name.clone(),
                    kind: descriptor.kind,
                    native_symbol: descriptor.native_symbol.clone(),
                    currencies: descriptor.supported_symbols(),
                    signer: adapter.signer_address(),
                })
            })
            .collect()
    }

    /// Probes every ledger's RPC endpoint.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let mut networks = BTreeMap::new();
        for (name, adapter) in &self.adapters {
            let status = match adapter.health_check().await {
                Ok(()) => HealthStatus::Healthy,
                Err(e) => {
                    warn!(network = %name, error = %e, "Ledger health check failed");
                    HealthStatus::Unhealthy
                }
            };
            networks.insert(name.clone(), status);
        }
        HealthResponse::new(networks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::{
        CompletionEvidence, ConfirmationOutcome, ConfirmedTransaction, SimulationResult,
        commit_hash_for,
    };
    use crate::test_utils::{
        EVM_NETWORK, EVM_USDC, MOVE_NETWORK, MockChainAdapter, SOLANA_NETWORK, sample_parties,
        sample_registry,
    };

    const OPT: &str = "0123456789abcdef0123456789abcdef";

    fn service(mocks: &[Arc<MockChainAdapter>]) -> PaymentService {
        let adapters = mocks
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn ChainAdapter>)
            .collect();
        PaymentService::new(
            Arc::new(sample_registry()),
            adapters,
            ConfirmationSettings::default(),
        )
        .unwrap()
    }

    fn intent(kind: LedgerKind, amount: u64, currency: &str) -> PaymentIntent {
        let (payer, recipient) = sample_parties(kind);
        PaymentIntent::new(payer, recipient, amount, currency, OPT).unwrap()
    }

    #[tokio::test]
    async fn test_submit_payment_success() {
        let mock = Arc::new(MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move));
        let service = service(&[mock.clone()]);
        let intent = intent(LedgerKind::Move, 500_000, "apt");

        let submission = service
            .submit_payment(MOVE_NETWORK, &intent, None)
            .await
            .unwrap();

        assert_eq!(submission.network, MOVE_NETWORK);
        assert_eq!(submission.signer, "aptos-testnet-signer");
        assert_eq!(mock.submit_count(), 1);

        let expected =
            commit_hash_for(LedgerKind::Move, intent.payer(), intent.recipient(), 500_000, OPT)
                .unwrap();
        assert_eq!(submission.commit_hash, Some(expected));
        assert_eq!(mock.builds()[0].commit_hash, Some(expected));
        assert_eq!(
            mock.builds()[0].asset,
            LedgerKind::Move.default_native_asset()
        );
    }

    #[tokio::test]
    async fn test_failed_simulation_never_submits() {
        let mock = Arc::new(
            MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm)
                .with_simulation(SimulationResult::failed("execution reverted: invalid opt")),
        );
        let service = service(&[mock.clone()]);

        let err = service
            .submit_payment(EVM_NETWORK, &intent(LedgerKind::Evm, 10, "ETH"), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::SimulationFailed(ref msg))
                if msg == "execution reverted: invalid opt"
        ));
        assert_eq!(mock.build_count(), 1);
        assert_eq!(mock.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_submission_failure_is_surfaced_once() {
        let mock = Arc::new(
            MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm).with_submit_error("nonce too low"),
        );
        let service = service(&[mock.clone()]);

        let err = service
            .submit_payment(EVM_NETWORK, &intent(LedgerKind::Evm, 10, "ETH"), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::SubmissionFailed(_))
        ));
        assert_eq!(mock.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_hash_skipped_when_adapter_does_not_require_it() {
        let mock = Arc::new(
            MockChainAdapter::new(SOLANA_NETWORK, LedgerKind::Solana)
                .with_commit_hash_required(false),
        );
        let service = service(&[mock.clone()]);

        let submission = service
            .submit_payment(SOLANA_NETWORK, &intent(LedgerKind::Solana, 7, "SOL"), None)
            .await
            .unwrap();

        assert_eq!(submission.commit_hash, None);
        assert_eq!(mock.builds()[0].commit_hash, None);
    }

    #[tokio::test]
    async fn test_validation_errors_precede_network_calls() {
        let mock = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm));
        let service = service(&[mock.clone()]);
        let eth = intent(LedgerKind::Evm, 10, "DOGE");

        let err = service.submit_payment(EVM_NETWORK, &eth, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::UnsupportedCurrency { ref supported, .. })
                if supported == &vec!["ETH".to_string(), "USDC".to_string()]
        ));

        let err = service.submit_payment("bitcoin", &eth, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::UnsupportedNetwork { .. })
        ));

        assert_eq!(mock.build_count(), 0);
    }

    #[tokio::test]
    async fn test_token_address_mismatch_is_rejected() {
        let mock = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm));
        let service = service(&[mock.clone()]);
        let usdc = intent(LedgerKind::Evm, 10, "USDC");

        let err = service
            .submit_payment(EVM_NETWORK, &usdc, Some("0x0000000000000000000000000000000000000bad"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::TokenAddressMismatch { .. })
        ));
        assert_eq!(mock.build_count(), 0);

        // casing of the claimed address does not matter
        service
            .submit_payment(EVM_NETWORK, &usdc, Some(&EVM_USDC.to_uppercase().replace("0X", "0x")))
            .await
            .unwrap();
        assert_eq!(mock.builds()[0].asset.as_str(), EVM_USDC);
    }

    #[tokio::test]
    async fn test_unregistered_network_without_adapter_is_unsupported() {
        let mock = Arc::new(MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move));
        let service = service(&[mock]);

        let err = service
            .get_status(SOLANA_NETWORK, "sig")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::UnsupportedNetwork { ref supported, .. })
                if supported == &vec![MOVE_NETWORK.to_string()]
        ));
    }

    #[tokio::test]
    async fn test_submissions_from_one_signer_are_serialized() {
        let mock = Arc::new(
            MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move)
                .with_latency(Duration::from_millis(20)),
        );
        let service = Arc::new(service(&[mock.clone()]));

        let handles: Vec<_> = (1..=5u64)
            .map(|amount| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let intent = intent(LedgerKind::Move, amount, "APT");
                    service.submit_payment(MOVE_NETWORK, &intent, None).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(mock.submit_count(), 5);
        assert_eq!(mock.max_concurrent_builds(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_native_payment() {
        let mock = Arc::new(
            MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move)
                .with_completion(500_000, LedgerKind::Move.default_native_asset()),
        );
        let service = service(&[mock.clone()]);

        let submission = service
            .submit_payment(MOVE_NETWORK, &intent(LedgerKind::Move, 500_000, "APT"), None)
            .await
            .unwrap();
        let record = service
            .get_status(MOVE_NETWORK, &submission.transaction_ref)
            .await
            .unwrap();

        assert!(record.confirmed);
        assert!(record.success);
        assert_eq!(record.amount, 500_000);
        assert_eq!(record.currency, "APT");
        assert_eq!(record.reference, submission.transaction_ref);
    }

    #[tokio::test]
    async fn test_status_query_is_idempotent() {
        let mock = Arc::new(
            MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm)
                .with_completion(42, crate::domain::AssetId::new(EVM_USDC)),
        );
        let service = service(&[mock.clone()]);

        let first = service.get_status(EVM_NETWORK, "0xabc").await.unwrap();
        let second = service.get_status(EVM_NETWORK, "0xabc").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.currency, "USDC");
        assert_eq!(mock.confirmation_calls(), 2);
        assert_eq!(mock.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_asset_reports_unknown_currency() {
        let mock = Arc::new(
            MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm)
                .with_completion(5, crate::domain::AssetId::new("0x00000000000000000000000000000000000000ff")),
        );
        let service = service(&[mock]);

        let record = service.get_status(EVM_NETWORK, "0xabc").await.unwrap();
        assert!(record.confirmed);
        assert_eq!(record.amount, 5);
        assert_eq!(record.currency, "UNKNOWN");
    }

    #[tokio::test]
    async fn test_malformed_evidence_keeps_confirmation() {
        let mock = Arc::new(
            MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move).with_completion_error(
                BlockchainError::DeserializationFailed("amount is not a number".to_string()),
            ),
        );
        let service = service(&[mock]);

        let record = service.get_status(MOVE_NETWORK, "0xabc").await.unwrap();
        assert!(record.confirmed);
        assert!(record.success);
        assert_eq!(record.amount, 0);
        assert!(record.note.unwrap().contains("amount is not a number"));
    }

    #[tokio::test]
    async fn test_status_of_failed_and_missing_transactions() {
        let failed = Arc::new(MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move).with_outcome(
            ConfirmationOutcome::Included(ConfirmedTransaction {
                reference: String::new(),
                success: false,
                vm_status: Some("Move abort: E_INVALID_OPT".to_string()),
                evidence: CompletionEvidence::Events(Vec::new()),
                undecodable: Vec::new(),
            }),
        ));
        let missing = Arc::new(
            MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm)
                .with_outcome(ConfirmationOutcome::NotFound),
        );
        let service = service(&[failed, missing]);

        let record = service.get_status(MOVE_NETWORK, "0x1").await.unwrap();
        assert!(record.confirmed);
        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("Move abort: E_INVALID_OPT"));

        let err = service.get_status(EVM_NETWORK, "0x2").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_payment_after_cancelled_wait() {
        let mock = Arc::new(
            MockChainAdapter::new(SOLANA_NETWORK, LedgerKind::Solana)
                .with_outcome(ConfirmationOutcome::Pending),
        );
        let service = service(&[mock]);
        let (_tx, rx) = watch::channel(true);

        let record = service
            .await_payment(SOLANA_NETWORK, "sig", Some(rx))
            .await
            .unwrap();
        assert!(!record.confirmed);
        assert_eq!(record.amount, 0);
    }

    #[tokio::test]
    async fn test_get_limits_delegates() {
        let limits = UserLimits {
            payment_limit: 1_000,
            tail_update_count: 2,
            max_tail_updates: 10,
        };
        let mock = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm).with_limits(limits));
        let service = service(&[mock]);

        assert_eq!(service.get_limits(EVM_NETWORK, "0x1").await.unwrap(), limits);
        assert!(matches!(
            service.get_limits(EVM_NETWORK, " ").await,
            Err(AppError::Validation(ValidationError::MissingField(_)))
        ));
    }

    #[test]
    fn test_compute_commit_hash_uses_network_layout() {
        let mock = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm));
        let service = service(&[mock]);
        let (payer, recipient) = sample_parties(LedgerKind::Evm);

        let request = ComputeHashRequest {
            network: Some(EVM_NETWORK.to_string()),
            payer: payer.clone(),
            recipient: recipient.clone(),
            amount: 1_000_000,
            opt: OPT.to_string(),
        };
        let hash = service.compute_commit_hash(&request).unwrap();
        assert_eq!(
            hash,
            commit_hash_for(LedgerKind::Evm, &payer, &recipient, 1_000_000, OPT).unwrap()
        );

        // short addresses are zero-padded into the Move layout
        let without_network = ComputeHashRequest {
            network: None,
            ..request
        };
        let move_hash = service.compute_commit_hash(&without_network).unwrap();
        assert_eq!(
            move_hash,
            commit_hash_for(LedgerKind::Move, &payer, &recipient, 1_000_000, OPT).unwrap()
        );
        assert_ne!(move_hash, hash);
    }

    #[test]
    fn test_validate_network_currency() {
        let mock = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm));
        let service = service(&[mock]);

        let native = service.validate_network_currency(EVM_NETWORK, "eth").unwrap();
        assert!(native.native);
        assert_eq!(native.currency, "ETH");

        let usdc = service.validate_network_currency(EVM_NETWORK, "USDC").unwrap();
        assert!(!usdc.native);
        assert_eq!(usdc.asset.as_str(), EVM_USDC);

        assert!(service.validate_network_currency(EVM_NETWORK, "SOL").is_err());
    }

    #[tokio::test]
    async fn test_precommit_only_on_move() {
        let aptos = Arc::new(MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move));
        let sepolia = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm));
        let service = service(&[aptos.clone(), sepolia]);
        let hash = "ab".repeat(32);

        let response = service.precommit(MOVE_NETWORK, &hash).await.unwrap();
        assert_eq!(response.network, MOVE_NETWORK);
        assert_eq!(aptos.precommits()[0].to_hex(), hash);

        assert!(matches!(
            service.precommit(EVM_NETWORK, &hash).await,
            Err(AppError::NotSupported(_))
        ));
        assert!(matches!(
            service.precommit(MOVE_NETWORK, "abcd").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_precommit_confirmation_does_not_hold_signer_lock() {
        let aptos = Arc::new(
            MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move)
                .with_confirmation_delay(Duration::from_millis(500)),
        );
        let service = Arc::new(service(&[aptos.clone()]));

        let precommit = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.precommit(MOVE_NETWORK, &"ab".repeat(32)).await })
        };
        while aptos.precommits().is_empty() {
            tokio::task::yield_now().await;
        }

        let intent = intent(LedgerKind::Move, 10, "APT");
        tokio::time::timeout(
            Duration::from_millis(200),
            service.submit_payment(MOVE_NETWORK, &intent, None),
        )
        .await
        .expect("payment waited for the precommit confirmation")
        .unwrap();
        assert!(!precommit.is_finished());

        precommit.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_precommit_reports_failed_and_missing_inclusion() {
        let failed = Arc::new(MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move).with_outcome(
            ConfirmationOutcome::Included(ConfirmedTransaction {
                reference: String::new(),
                success: false,
                vm_status: Some("Move abort: E_USED_HASH".to_string()),
                evidence: CompletionEvidence::Events(Vec::new()),
                undecodable: Vec::new(),
            }),
        ));
        let service_failed = service(&[failed]);
        assert!(matches!(
            service_failed.precommit(MOVE_NETWORK, &"ab".repeat(32)).await,
            Err(AppError::Blockchain(BlockchainError::SubmissionFailed(ref msg)))
                if msg == "Move abort: E_USED_HASH"
        ));

        let pending = Arc::new(
            MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move)
                .with_outcome(ConfirmationOutcome::Pending),
        );
        let service_pending = service(&[pending]);
        assert!(matches!(
            service_pending.precommit(MOVE_NETWORK, &"ab".repeat(32)).await,
            Err(AppError::Blockchain(BlockchainError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_health_check_aggregates_networks() {
        let aptos = Arc::new(MockChainAdapter::new(MOVE_NETWORK, LedgerKind::Move));
        let sepolia = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm));
        let service = service(&[aptos.clone(), sepolia]);

        assert_eq!(service.health_check().await.status, HealthStatus::Healthy);

        aptos.set_healthy(false);
        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.networks[MOVE_NETWORK], HealthStatus::Unhealthy);
    }

    #[test]
    fn test_networks_lists_configured_adapters() {
        let sepolia = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Evm));
        let service = service(&[sepolia]);

        let networks = service.networks();
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].name, EVM_NETWORK);
        assert_eq!(networks[0].currencies, vec!["ETH", "USDC"]);
        assert_eq!(networks[0].signer, "eth-sepolia-signer");
    }

    #[test]
    fn test_new_rejects_mismatched_adapter() {
        let wrong = Arc::new(MockChainAdapter::new(EVM_NETWORK, LedgerKind::Solana));
        let result = PaymentService::new(
            Arc::new(sample_registry()),
            vec![wrong as Arc<dyn ChainAdapter>],
            ConfirmationSettings::default(),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
