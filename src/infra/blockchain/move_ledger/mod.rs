//! Move ledger adapter: BCS entry-function transactions, simulate-then-submit.

pub mod bcs;
pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

use crate::domain::encoding::parse_move_address;
use crate::domain::{
    AppError, AssetId, BlockchainError, ChainAdapter, ChainTxRef, CommitHash, CompletionAmount,
    CompletionEvidence, CompletionRule, ConfirmationOutcome, ConfirmationWait,
    ConfirmedTransaction, LedgerKind, MoveEventRule, PaymentIntent, SimulationResult,
    UnsignedTransaction, UserLimits, ValidationError, encode_one_time_secret,
};
use crate::infra::blockchain::poll::poll_confirmation;
use crate::infra::blockchain::signer::{Ed25519Signer, SignerSet};

use self::bcs::{EntryFunctionCall, RawTransaction, StructTag};
pub use self::client::{LedgerInfo, MoveNodeApi, MoveRestClient, MoveSimulation, MoveTransaction};

#[derive(Debug, Clone)]
pub struct MoveLedgerConfig {
    pub network: String,
    pub contract_address: String,
    pub module_name: String,
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub expiration_secs: u64,
    pub native_asset: AssetId,
}

impl MoveLedgerConfig {
    pub fn new(network: &str, contract_address: &str) -> Self {
        Self {
            network: network.to_string(),
            contract_address: contract_address.to_string(),
            module_name: "tinypay".to_string(),
            max_gas_amount: 100_000,
            gas_unit_price: 100,
            expiration_secs: 60,
            native_asset: LedgerKind::Move.default_native_asset(),
        }
    }
}

pub struct MoveLedgerAdapter {
    config: MoveLedgerConfig,
    contract: [u8; 32],
    node: Arc<dyn MoveNodeApi>,
    signers: SignerSet<Ed25519Signer>,
    rule: MoveEventRule,
}

impl MoveLedgerAdapter {
    pub fn new(
        config: MoveLedgerConfig,
        node: Arc<dyn MoveNodeApi>,
        signers: SignerSet<Ed25519Signer>,
    ) -> Result<Self, AppError> {
        let contract = parse_move_address("contract_address", &config.contract_address)?;
        let rule = MoveEventRule::new(config.native_asset.clone());
        Ok(Self {
            config,
            contract,
            node,
            signers,
            rule,
        })
    }

    fn function_id(&self, function: &str) -> String {
        format!(
            "0x{}::{}::{}",
            hex::encode(self.contract),
            self.config.module_name,
            function
        )
    }

    fn signer_for(&self, address: &str) -> Result<&Ed25519Signer, AppError> {
        let (_, resolved) = self.signers.resolve();
        [Some(resolved), self.signers.merchant()]
            .into_iter()
            .flatten()
            .find(|s| s.move_address_hex() == address)
            .ok_or_else(|| {
                AppError::Blockchain(BlockchainError::InvalidSignature(format!(
                    "no configured key for {address}"
                )))
            })
    }

    async fn build_entry(
        &self,
        signer: &Ed25519Signer,
        function: &str,
        type_args: Vec<StructTag>,
        args: Vec<Vec<u8>>,
    ) -> Result<UnsignedTransaction, AppError> {
        let sender = signer.move_address_hex();
        let sequence_number = self
            .node
            .sequence_number(&sender)
            .await?
            .ok_or_else(|| BlockchainError::AccountNotFound(sender.clone()))?;
        let ledger = self.node.ledger_info().await?;

        let raw = RawTransaction {
            sender: signer.move_address(),
            sequence_number,
            payload: EntryFunctionCall {
                module_address: self.contract,
                module_name: self.config.module_name.clone(),
                function: function.to_string(),
                type_args,
                args,
            },
            max_gas_amount: self.config.max_gas_amount,
            gas_unit_price: self.config.gas_unit_price,
            expiration_timestamp_secs: ledger.ledger_timestamp_secs + self.config.expiration_secs,
            chain_id: ledger.chain_id,
        };

        Ok(UnsignedTransaction {
            network: self.config.network.clone(),
            ledger: LedgerKind::Move,
            signer: sender,
            payload: raw.to_bcs(),
        })
    }

    async fn probe(&self, reference: &str) -> Result<ConfirmationOutcome, AppError> {
        Ok(match self.node.transaction_by_hash(reference).await? {
            // the node may not have indexed a fresh submission yet
            None | Some(MoveTransaction::Pending) => ConfirmationOutcome::Pending,
            Some(MoveTransaction::Committed {
                success,
                vm_status,
                events,
                undecodable,
            }) => ConfirmationOutcome::Included(ConfirmedTransaction {
                reference: reference.to_string(),
                success,
                vm_status: (!success).then_some(vm_status),
                evidence: CompletionEvidence::Events(events),
                undecodable,
            }),
        })
    }
}

fn view_u64(value: Option<&Value>, field: &str) -> Result<u64, BlockchainError> {
    let parsed = match value {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        BlockchainError::DeserializationFailed(format!("get_user_limits: unreadable {field}"))
    })
}

#[async_trait]
impl ChainAdapter for MoveLedgerAdapter {
    fn network(&self) -> &str {
        &self.config.network
    }

    fn kind(&self) -> LedgerKind {
        LedgerKind::Move
    }

    fn signer_address(&self) -> String {
        self.signers.resolve().1.move_address_hex()
    }

    fn requires_commit_hash(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(network = %self.config.network))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.node.ledger_info().await.map(|_| ())
    }

    #[instrument(skip(self, intent, asset, commit_hash), fields(network = %self.config.network, asset = %asset))]
    async fn build_payment_transaction(
        &self,
        intent: &PaymentIntent,
        asset: &AssetId,
        commit_hash: Option<&CommitHash>,
    ) -> Result<UnsignedTransaction, AppError> {
        let commit_hash = commit_hash
            .ok_or_else(|| ValidationError::MissingField("commit_hash".to_string()))?;

        let payer = parse_move_address("payer", intent.payer())?;
        let recipient = parse_move_address("recipient", intent.recipient())?;
        let opt = encode_one_time_secret(intent.opt(), self.otp_encoding());

        let mut args = vec![
            bcs::encode_bytes(&opt),
            bcs::encode_address(&payer),
            bcs::encode_address(&recipient),
            bcs::encode_u64(intent.amount()),
            bcs::encode_bytes(commit_hash.as_bytes()),
        ];

        let (function, type_args) = if *asset == self.config.native_asset || asset.is_empty() {
            ("complete_payment", vec![])
        } else if asset.as_str().contains("::") {
            ("complete_coin_payment", vec![StructTag::parse(asset.as_str())?])
        } else {
            let metadata = parse_move_address("token_address", asset.as_str())?;
            args.insert(0, bcs::encode_address(&metadata));
            ("complete_fa_payment", vec![])
        };

        let (role, signer) = self.signers.resolve();
        info!(?role, function, "Building Move payment transaction");
        self.build_entry(signer, function, type_args, args).await
    }

    #[instrument(skip(self, tx), fields(network = %self.config.network, signer = %tx.signer))]
    async fn simulate(&self, tx: &UnsignedTransaction) -> Result<SimulationResult, AppError> {
        let signer = self.signer_for(&tx.signer)?;
        // the node rejects simulations that carry a valid signature
        let signed = bcs::signed_transaction(&tx.payload, signer.public_key(), &[0u8; 64]);
        let simulation = self.node.simulate(signed).await?;

        Ok(SimulationResult {
            success: simulation.success,
            gas_estimate: simulation.gas_used,
            vm_error: (!simulation.success).then_some(simulation.vm_status),
        })
    }

    #[instrument(skip(self, tx), fields(network = %self.config.network, signer = %tx.signer))]
    async fn sign_and_submit(&self, tx: &UnsignedTransaction) -> Result<ChainTxRef, AppError> {
        let signer = self.signer_for(&tx.signer)?;
        let signature = signer.sign(&bcs::signing_message(&tx.payload))?;
        let signed = bcs::signed_transaction(&tx.payload, signer.public_key(), &signature);

        let hash = self.node.submit(signed).await?;
        info!(hash = %hash, "Move transaction submitted");
        Ok(hash)
    }

    #[instrument(skip(self, wait), fields(network = %self.config.network))]
    async fn await_confirmation(
        &self,
        reference: &str,
        wait: &ConfirmationWait,
    ) -> Result<ConfirmationOutcome, AppError> {
        poll_confirmation(wait, || self.probe(reference)).await
    }

    #[instrument(skip(self), fields(network = %self.config.network))]
    async fn query_user_limits(&self, address: &str) -> Result<UserLimits, AppError> {
        let account = format!("0x{}", hex::encode(parse_move_address("address", address)?));
        if self.node.sequence_number(&account).await?.is_none() {
            return Err(BlockchainError::AccountNotFound(account).into());
        }

        let values = self
            .node
            .view(
                &self.function_id("get_user_limits"),
                &[],
                vec![Value::String(account)],
            )
            .await?;

        Ok(UserLimits {
            payment_limit: view_u64(values.first(), "payment_limit")?,
            tail_update_count: view_u64(values.get(1), "tail_update_count")?,
            max_tail_updates: view_u64(values.get(2), "max_tail_updates")?,
        })
    }

    fn parse_completion_event(
        &self,
        tx: &ConfirmedTransaction,
    ) -> Result<Option<CompletionAmount>, BlockchainError> {
        self.rule.extract(&tx.evidence)
    }

    #[instrument(skip(self), fields(network = %self.config.network))]
    async fn precommit(&self, commit_hash: &CommitHash) -> Result<ChainTxRef, AppError> {
        let merchant = self.signers.merchant().ok_or_else(|| {
            AppError::Blockchain(BlockchainError::InvalidSignature(
                "merchant precommit requires a merchant key".to_string(),
            ))
        })?;

        let tx = self
            .build_entry(
                merchant,
                "merchant_precommit",
                vec![],
                vec![bcs::encode_bytes(commit_hash.as_bytes())],
            )
            .await?;

        let simulation = self.simulate(&tx).await?;
        if !simulation.success {
            return Err(BlockchainError::SimulationFailed(
                simulation.vm_error.unwrap_or_default(),
            )
            .into());
        }

        self.sign_and_submit(&tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::infra::blockchain::signer::Ed25519KeyFormat;

    const CONTRACT: &str = "0xcafe";

    #[derive(Default)]
    struct MockMoveNode {
        missing_accounts: Mutex<Vec<String>>,
        simulation: Mutex<Option<MoveSimulation>>,
        submitted: Mutex<Vec<Vec<u8>>>,
        simulated: Mutex<Vec<Vec<u8>>>,
        transaction: Mutex<Option<MoveTransaction>>,
        view_result: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl MoveNodeApi for MockMoveNode {
        async fn ledger_info(&self) -> Result<LedgerInfo, AppError> {
            Ok(LedgerInfo {
                chain_id: 2,
                ledger_timestamp_secs: 1_700_000_000,
            })
        }

        async fn sequence_number(&self, address: &str) -> Result<Option<u64>, AppError> {
            if self.missing_accounts.lock().unwrap().iter().any(|a| a == address) {
                Ok(None)
            } else {
                Ok(Some(7))
            }
        }

        async fn simulate(&self, signed_txn: Vec<u8>) -> Result<MoveSimulation, AppError> {
            self.simulated.lock().unwrap().push(signed_txn);
            Ok(self.simulation.lock().unwrap().clone().unwrap_or(MoveSimulation {
                success: true,
                vm_status: "Executed successfully".to_string(),
                gas_used: 42,
            }))
        }

        async fn submit(&self, signed_txn: Vec<u8>) -> Result<String, AppError> {
            self.submitted.lock().unwrap().push(signed_txn);
            Ok("0xhash".to_string())
        }

        async fn transaction_by_hash(&self, _hash: &str) -> Result<Option<MoveTransaction>, AppError> {
            Ok(self.transaction.lock().unwrap().clone())
        }

        async fn view(
            &self,
            _function: &str,
            _type_arguments: &[String],
            _arguments: Vec<Value>,
        ) -> Result<Vec<Value>, AppError> {
            Ok(self.view_result.lock().unwrap().clone())
        }
    }

    fn signer(seed: u8) -> Ed25519Signer {
        let secret = SecretString::from(hex::encode([seed; 32]));
        Ed25519Signer::new(secret, Ed25519KeyFormat::Hex).unwrap()
    }

    fn adapter(node: Arc<MockMoveNode>, paymaster: bool) -> MoveLedgerAdapter {
        let signers = SignerSet::new(Some(signer(1)), paymaster.then(|| signer(2))).unwrap();
        MoveLedgerAdapter::new(
            MoveLedgerConfig::new("aptos-testnet", CONTRACT),
            node,
            signers,
        )
        .unwrap()
    }

    fn intent() -> PaymentIntent {
        PaymentIntent::new("0x11", "0x22", 500_000, "APT", "0xABCD").unwrap()
    }

    fn commit() -> CommitHash {
        CommitHash::from_bytes([9u8; 32])
    }

    #[tokio::test]
    async fn test_build_native_payment() {
        let node = Arc::new(MockMoveNode::default());
        let adapter = adapter(node, false);
        let native = LedgerKind::Move.default_native_asset();

        let tx = adapter
            .build_payment_transaction(&intent(), &native, Some(&commit()))
            .await
            .unwrap();

        assert_eq!(tx.ledger, LedgerKind::Move);
        assert_eq!(tx.signer, signer(1).move_address_hex());
        // sender followed by the sequence number
        assert_eq!(&tx.payload[..32], &signer(1).move_address());
        assert_eq!(&tx.payload[32..40], &7u64.to_le_bytes());

        let function = b"complete_payment";
        assert!(tx.payload.windows(function.len()).any(|w| w == function));
        // opt goes on chain as its lower-cased ASCII characters
        assert!(tx.payload.windows(5).any(|w| w == [4, b'a', b'b', b'c', b'd']));
    }

    #[tokio::test]
    async fn test_build_prefers_paymaster() {
        let node = Arc::new(MockMoveNode::default());
        let adapter = adapter(node, true);
        assert_eq!(adapter.signer_address(), signer(2).move_address_hex());

        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), Some(&commit()))
            .await
            .unwrap();
        assert_eq!(tx.signer, signer(2).move_address_hex());
    }

    #[tokio::test]
    async fn test_build_fungible_asset_payment() {
        let node = Arc::new(MockMoveNode::default());
        let adapter = adapter(node, false);
        let metadata = AssetId::new("0x69091fbab5f7d635ee7ac5098cf0c1efbe31d68fec0f2cd565e8d168daf52832");

        let tx = adapter
            .build_payment_transaction(&intent(), &metadata, Some(&commit()))
            .await
            .unwrap();
        let function = b"complete_fa_payment";
        assert!(tx.payload.windows(function.len()).any(|w| w == function));
    }

    #[tokio::test]
    async fn test_build_requires_commit_hash() {
        let node = Arc::new(MockMoveNode::default());
        let adapter = adapter(node, false);
        let result = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), None)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_build_fails_for_missing_signer_account() {
        let node = Arc::new(MockMoveNode::default());
        node.missing_accounts
            .lock()
            .unwrap()
            .push(signer(1).move_address_hex());
        let adapter = adapter(node, false);

        let result = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), Some(&commit()))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::AccountNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_simulation_failure_is_reported() {
        let node = Arc::new(MockMoveNode::default());
        *node.simulation.lock().unwrap() = Some(MoveSimulation {
            success: false,
            vm_status: "Move abort: E_INVALID_OPT".to_string(),
            gas_used: 0,
        });
        let adapter = adapter(Arc::clone(&node), false);
        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), Some(&commit()))
            .await
            .unwrap();

        let result = adapter.simulate(&tx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.vm_error.as_deref(), Some("Move abort: E_INVALID_OPT"));

        let simulated = node.simulated.lock().unwrap();
        // zero signature after the public key
        assert!(simulated[0].ends_with(&[0u8; 64]));
    }

    #[tokio::test]
    async fn test_sign_and_submit_attaches_valid_signature() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let node = Arc::new(MockMoveNode::default());
        let adapter = adapter(Arc::clone(&node), false);
        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), Some(&commit()))
            .await
            .unwrap();

        let hash = adapter.sign_and_submit(&tx).await.unwrap();
        assert_eq!(hash, "0xhash");

        let submitted = node.submitted.lock().unwrap();
        let signed = &submitted[0];
        let sig_bytes: [u8; 64] = signed[signed.len() - 64..].try_into().unwrap();
        let key = VerifyingKey::from_bytes(signer(1).public_key()).unwrap();
        assert!(
            key.verify(&bcs::signing_message(&tx.payload), &Signature::from_bytes(&sig_bytes))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_await_confirmation_reports_events() {
        let node = Arc::new(MockMoveNode::default());
        *node.transaction.lock().unwrap() = Some(MoveTransaction::Committed {
            success: true,
            vm_status: "Executed successfully".to_string(),
            events: vec![crate::domain::LedgerEvent {
                type_name: "0xcafe::tinypay::PaymentCompleted".to_string(),
                data: json!({"amount": "500000"}),
            }],
            undecodable: vec![],
        });
        let adapter = adapter(node, false);

        let outcome = adapter
            .await_confirmation("0xhash", &ConfirmationWait::probe())
            .await
            .unwrap();
        let ConfirmationOutcome::Included(confirmed) = outcome else {
            panic!("expected inclusion");
        };
        assert!(confirmed.success);
        assert_eq!(confirmed.vm_status, None);

        let completion = adapter.parse_completion_event(&confirmed).unwrap().unwrap();
        assert_eq!(completion.amount, 500_000);
        assert_eq!(completion.asset, LedgerKind::Move.default_native_asset());
    }

    #[tokio::test]
    async fn test_await_confirmation_times_out_as_pending() {
        let node = Arc::new(MockMoveNode::default());
        let adapter = adapter(node, false);
        let wait = ConfirmationWait::new(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(5));

        let outcome = adapter.await_confirmation("0xunknown", &wait).await.unwrap();
        assert_eq!(outcome, ConfirmationOutcome::Pending);
    }

    #[tokio::test]
    async fn test_query_user_limits() {
        let node = Arc::new(MockMoveNode::default());
        *node.view_result.lock().unwrap() = vec![json!("1000"), json!("3"), json!(10)];
        let adapter = adapter(node, false);

        let limits = adapter.query_user_limits("0x11").await.unwrap();
        assert_eq!(
            limits,
            UserLimits {
                payment_limit: 1000,
                tail_update_count: 3,
                max_tail_updates: 10,
            }
        );
    }

    #[tokio::test]
    async fn test_query_user_limits_missing_account() {
        let node = Arc::new(MockMoveNode::default());
        node.missing_accounts.lock().unwrap().push(format!("0x{}", "0".repeat(62) + "11"));
        let adapter = adapter(node, false);

        let result = adapter.query_user_limits("0x11").await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::AccountNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_query_user_limits_malformed_view() {
        let node = Arc::new(MockMoveNode::default());
        *node.view_result.lock().unwrap() = vec![json!("1000")];
        let adapter = adapter(node, false);

        let result = adapter.query_user_limits("0x11").await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::DeserializationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_precommit_signs_with_merchant() {
        let node = Arc::new(MockMoveNode::default());
        let adapter = adapter(Arc::clone(&node), true);

        let hash = adapter.precommit(&commit()).await.unwrap();
        assert_eq!(hash, "0xhash");

        let submitted = node.submitted.lock().unwrap();
        assert_eq!(&submitted[0][..32], &signer(1).move_address());
    }
}
