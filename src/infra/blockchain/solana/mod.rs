//! Solana ledger adapter for the Anchor payment program.
//!
//! Payments are a single program instruction whose data carries the opt and
//! the amount; the commit hash rides along only when no paymaster signs,
//! since the paymaster path is trusted to have validated the commitment
//! off chain.

pub mod client;
pub mod message;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::domain::encoding::parse_solana_pubkey;
use crate::domain::{
    AppError, AssetId, BlockchainError, ChainAdapter, ChainTxRef, CommitHash, CompletionAmount,
    CompletionEvidence, CompletionRule, ConfirmationOutcome, ConfirmationWait,
    ConfirmedTransaction, LedgerKind, PaymentIntent, SimulationResult, SolanaInstructionRule,
    UnsignedTransaction, UserLimits, ValidationError, encode_one_time_secret,
};
use crate::infra::blockchain::poll::poll_confirmation;
use crate::infra::blockchain::signer::{Ed25519Signer, SignerSet};

pub use self::client::{
    SignatureStatus, SolanaRpcApi, SolanaRpcClient, SolanaSimulation, SolanaTransaction,
};
use self::message::{
    AccountMeta, Instruction, Message, Pubkey, SYSTEM_PROGRAM_ID, find_program_address,
    parse_user_limits, payment_instruction_data, required_signatures, signed_transaction,
};

const NATIVE_INSTRUCTION: &str = "complete_payment";
const TOKEN_INSTRUCTION: &str = "complete_token_payment";

#[derive(Debug, Clone)]
pub struct SolanaLedgerConfig {
    pub network: String,
    pub program_id: String,
}

impl SolanaLedgerConfig {
    pub fn new(network: &str, program_id: &str) -> Self {
        Self {
            network: network.to_string(),
            program_id: program_id.to_string(),
        }
    }
}

pub struct SolanaLedgerAdapter {
    config: SolanaLedgerConfig,
    program_id: Pubkey,
    node: Arc<dyn SolanaRpcApi>,
    signers: SignerSet<Ed25519Signer>,
    rule: SolanaInstructionRule,
}

impl SolanaLedgerAdapter {
    pub fn new(
        config: SolanaLedgerConfig,
        node: Arc<dyn SolanaRpcApi>,
        signers: SignerSet<Ed25519Signer>,
    ) -> Result<Self, AppError> {
        let program_id = parse_solana_pubkey("contract_address", &config.program_id)?;
        Ok(Self {
            config,
            program_id,
            node,
            signers,
            rule: SolanaInstructionRule::new(),
        })
    }

    fn signer_for(&self, address: &str) -> Result<&Ed25519Signer, AppError> {
        let (_, resolved) = self.signers.resolve();
        [Some(resolved), self.signers.merchant()]
            .into_iter()
            .flatten()
            .find(|s| s.solana_address() == address)
            .ok_or_else(|| {
                AppError::Blockchain(BlockchainError::InvalidSignature(format!(
                    "no configured key for {address}"
                )))
            })
    }

    fn pda(&self, seeds: &[&[u8]]) -> Result<Pubkey, AppError> {
        Ok(find_program_address(seeds, &self.program_id)?.0)
    }

    fn user_account(&self, owner: &Pubkey) -> Result<Pubkey, AppError> {
        self.pda(&[b"user".as_slice(), owner.as_slice()])
    }

    async fn probe(&self, reference: &str) -> Result<ConfirmationOutcome, AppError> {
        let Some(status) = self.node.signature_status(reference).await? else {
            return Ok(ConfirmationOutcome::Pending);
        };
        if !status.is_confirmed() {
            debug!(status = ?status.confirmation_status, "Signature not yet confirmed");
            return Ok(ConfirmationOutcome::Pending);
        }
        let Some(tx) = self.node.transaction(reference).await? else {
            return Ok(ConfirmationOutcome::Pending);
        };

        Ok(ConfirmationOutcome::Included(ConfirmedTransaction {
            reference: reference.to_string(),
            success: tx.error.is_none(),
            vm_status: tx.error,
            evidence: CompletionEvidence::Instructions(tx.instructions),
            undecodable: tx.undecodable,
        }))
    }
}

#[async_trait]
impl ChainAdapter for SolanaLedgerAdapter {
    fn network(&self) -> &str {
        &self.config.network
    }

    fn kind(&self) -> LedgerKind {
        LedgerKind::Solana
    }

    fn signer_address(&self) -> String {
        self.signers.resolve().1.solana_address()
    }

    fn requires_commit_hash(&self) -> bool {
        !self.signers.has_paymaster()
    }

    #[instrument(skip(self), fields(network = %self.config.network))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.node.slot().await.map(|_| ())
    }

    #[instrument(skip(self, intent, asset, commit_hash), fields(network = %self.config.network, asset = %asset))]
    async fn build_payment_transaction(
        &self,
        intent: &PaymentIntent,
        asset: &AssetId,
        commit_hash: Option<&CommitHash>,
    ) -> Result<UnsignedTransaction, AppError> {
        let commit_hash = if self.requires_commit_hash() {
            let hash = commit_hash
                .ok_or_else(|| ValidationError::MissingField("commit_hash".to_string()))?;
            Some(hash.as_bytes())
        } else {
            None
        };

        let payer = parse_solana_pubkey("payer", intent.payer())?;
        let recipient = parse_solana_pubkey("recipient", intent.recipient())?;
        let mint = if asset.is_empty() {
            None
        } else {
            Some(parse_solana_pubkey("token_address", asset.as_str())?)
        };
        let opt = encode_one_time_secret(intent.opt(), self.otp_encoding());

        let (role, signer) = self.signers.resolve();
        let fee_payer = *signer.public_key();

        let mut accounts = vec![
            AccountMeta::writable(self.user_account(&payer)?),
            AccountMeta::writable(self.pda(&[b"state".as_slice()])?),
            AccountMeta::writable(self.pda(&[b"vault".as_slice()])?),
            AccountMeta::writable(recipient),
            AccountMeta::signer(fee_payer),
            AccountMeta::readonly(SYSTEM_PROGRAM_ID),
        ];
        let instruction_name = match mint {
            Some(mint) => {
                accounts.push(AccountMeta::readonly(mint));
                TOKEN_INSTRUCTION
            }
            None => NATIVE_INSTRUCTION,
        };

        let instruction = Instruction {
            program_id: self.program_id,
            accounts,
            data: payment_instruction_data(instruction_name, &opt, commit_hash, intent.amount()),
        };
        let blockhash = self.node.latest_blockhash().await?;
        let message = Message::compile(&fee_payer, &[instruction], blockhash)?;
        info!(?role, instruction = instruction_name, "Building Solana payment transaction");

        Ok(UnsignedTransaction {
            network: self.config.network.clone(),
            ledger: LedgerKind::Solana,
            signer: signer.solana_address(),
            payload: message.serialize(),
        })
    }

    #[instrument(skip(self, tx), fields(network = %self.config.network, signer = %tx.signer))]
    async fn simulate(&self, tx: &UnsignedTransaction) -> Result<SimulationResult, AppError> {
        let placeholders = vec![[0u8; 64]; required_signatures(&tx.payload)?];
        let simulation = self
            .node
            .simulate_transaction(&signed_transaction(&tx.payload, &placeholders))
            .await?;

        Ok(match simulation.error {
            Some(error) => {
                debug!(logs = ?simulation.logs, "Simulation failed");
                SimulationResult::failed(error)
            }
            None => SimulationResult::succeeded(simulation.units_consumed),
        })
    }

    #[instrument(skip(self, tx), fields(network = %self.config.network, signer = %tx.signer))]
    async fn sign_and_submit(&self, tx: &UnsignedTransaction) -> Result<ChainTxRef, AppError> {
        let signer = self.signer_for(&tx.signer)?;
        if required_signatures(&tx.payload)? != 1 {
            return Err(BlockchainError::InvalidSignature(
                "message expects signatures from more than the fee payer".to_string(),
            )
            .into());
        }
        let signature = signer.sign(&tx.payload)?;
        let wire = signed_transaction(&tx.payload, &[signature]);

        let reference = self.node.send_transaction(&wire).await?;
        info!(signature = %reference, "Solana transaction submitted");
        Ok(reference)
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
        let owner = parse_solana_pubkey("address", address)?;
        let user_account = bs58::encode(self.user_account(&owner)?).into_string();
        let data = self
            .node
            .account_data(&user_account)
            .await?
            .ok_or_else(|| BlockchainError::AccountNotFound(address.to_string()))?;
        Ok(parse_user_limits(&data)?)
    }

    fn parse_completion_event(
        &self,
        tx: &ConfirmedTransaction,
    ) -> Result<Option<CompletionAmount>, BlockchainError> {
        self.rule.extract(&tx.evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::sync::Mutex;

    use crate::domain::SolanaInstruction;
    use crate::domain::encoding::anchor_discriminator;
    use crate::infra::blockchain::signer::Ed25519KeyFormat;
    use crate::infra::blockchain::solana::message::USER_ACCOUNT_LEN;

    fn program() -> String {
        bs58::encode([42u8; 32]).into_string()
    }

    #[derive(Default)]
    struct MockSolanaNode {
        simulation_error: Mutex<Option<String>>,
        simulated: Mutex<Vec<Vec<u8>>>,
        sent: Mutex<Vec<Vec<u8>>>,
        status: Mutex<Option<SignatureStatus>>,
        transaction: Mutex<Option<SolanaTransaction>>,
        accounts: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl SolanaRpcApi for MockSolanaNode {
        async fn slot(&self) -> Result<u64, AppError> {
            Ok(1)
        }

        async fn latest_blockhash(&self) -> Result<[u8; 32], AppError> {
            Ok([8u8; 32])
        }

        async fn simulate_transaction(&self, wire: &[u8]) -> Result<SolanaSimulation, AppError> {
            self.simulated.lock().unwrap().push(wire.to_vec());
            Ok(SolanaSimulation {
                error: self.simulation_error.lock().unwrap().clone(),
                units_consumed: 5_000,
                logs: vec![],
            })
        }

        async fn send_transaction(&self, wire: &[u8]) -> Result<String, AppError> {
            self.sent.lock().unwrap().push(wire.to_vec());
            Ok(bs58::encode(&wire[1..65]).into_string())
        }

        async fn signature_status(
            &self,
            _signature: &str,
        ) -> Result<Option<SignatureStatus>, AppError> {
            Ok(self.status.lock().unwrap().clone())
        }

        async fn transaction(&self, _signature: &str) -> Result<Option<SolanaTransaction>, AppError> {
            Ok(self.transaction.lock().unwrap().clone())
        }

        async fn account_data(&self, address: &str) -> Result<Option<Vec<u8>>, AppError> {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .iter()
                .find(|(a, _)| a == address)
                .map(|(_, data)| data.clone()))
        }
    }

    fn signer(seed: u8) -> Ed25519Signer {
        let secret = SecretString::from(bs58::encode([seed; 32]).into_string());
        Ed25519Signer::new(secret, Ed25519KeyFormat::Base58).unwrap()
    }

    fn adapter(node: Arc<MockSolanaNode>, paymaster: bool) -> SolanaLedgerAdapter {
        let signers = if paymaster {
            SignerSet::new(None, Some(signer(2))).unwrap()
        } else {
            SignerSet::new(Some(signer(1)), None).unwrap()
        };
        SolanaLedgerAdapter::new(SolanaLedgerConfig::new("solana-devnet", &program()), node, signers)
            .unwrap()
    }

    fn intent() -> PaymentIntent {
        PaymentIntent::new(
            signer(10).solana_address(),
            signer(11).solana_address(),
            250_000,
            "SOL",
            "otp-secret",
        )
        .unwrap()
    }

    fn instruction_data(payload: &[u8], len: usize) -> Vec<u8> {
        payload[payload.len() - len..].to_vec()
    }

    #[tokio::test]
    async fn test_commit_policy_follows_paymaster() {
        let node = Arc::new(MockSolanaNode::default());
        assert!(adapter(Arc::clone(&node), false).requires_commit_hash());
        assert!(!adapter(node, true).requires_commit_hash());
    }

    #[tokio::test]
    async fn test_build_with_paymaster_omits_commit_hash() {
        let node = Arc::new(MockSolanaNode::default());
        let adapter = adapter(node, true);
        let commit = CommitHash::from_bytes([4u8; 32]);

        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), Some(&commit))
            .await
            .unwrap();
        assert_eq!(tx.signer, signer(2).solana_address());

        let expected = payment_instruction_data(NATIVE_INSTRUCTION, b"otp-secret", None, 250_000);
        assert_eq!(instruction_data(&tx.payload, expected.len()), expected);
    }

    #[tokio::test]
    async fn test_build_without_paymaster_requires_commit_hash() {
        let node = Arc::new(MockSolanaNode::default());
        let adapter = adapter(node, false);

        let missing = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), None)
            .await;
        assert!(matches!(missing, Err(AppError::Validation(_))));

        let commit = CommitHash::from_bytes([4u8; 32]);
        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), Some(&commit))
            .await
            .unwrap();
        let expected =
            payment_instruction_data(NATIVE_INSTRUCTION, b"otp-secret", Some(&[4u8; 32]), 250_000);
        assert_eq!(instruction_data(&tx.payload, expected.len()), expected);
    }

    #[tokio::test]
    async fn test_build_token_payment_appends_mint() {
        let node = Arc::new(MockSolanaNode::default());
        let adapter = adapter(node, true);
        let mint = signer(20).solana_address();

        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::new(&mint), None)
            .await
            .unwrap();
        let expected = payment_instruction_data(TOKEN_INSTRUCTION, b"otp-secret", None, 250_000);
        assert_eq!(instruction_data(&tx.payload, expected.len()), expected);
        let mint_bytes = parse_solana_pubkey("mint", &mint).unwrap();
        assert!(tx.payload.windows(32).any(|w| w == mint_bytes));
    }

    #[tokio::test]
    async fn test_simulate_uses_placeholder_signature() {
        let node = Arc::new(MockSolanaNode::default());
        *node.simulation_error.lock().unwrap() = Some("{\"Custom\":6001}".to_string());
        let adapter = adapter(Arc::clone(&node), true);
        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), None)
            .await
            .unwrap();

        let result = adapter.simulate(&tx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.vm_error.as_deref(), Some("{\"Custom\":6001}"));

        let simulated = node.simulated.lock().unwrap();
        assert_eq!(simulated[0][0], 1);
        assert_eq!(&simulated[0][1..65], &[0u8; 64]);
        assert_eq!(&simulated[0][65..], tx.payload.as_slice());
    }

    #[tokio::test]
    async fn test_sign_and_submit_signs_message() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let node = Arc::new(MockSolanaNode::default());
        let adapter = adapter(Arc::clone(&node), true);
        let tx = adapter
            .build_payment_transaction(&intent(), &AssetId::native(), None)
            .await
            .unwrap();

        let reference = adapter.sign_and_submit(&tx).await.unwrap();
        let sent = node.sent.lock().unwrap();
        let sig_bytes: [u8; 64] = sent[0][1..65].try_into().unwrap();
        assert_eq!(reference, bs58::encode(sig_bytes).into_string());

        let key = VerifyingKey::from_bytes(signer(2).public_key()).unwrap();
        assert!(key.verify(&tx.payload, &Signature::from_bytes(&sig_bytes)).is_ok());
    }

    #[tokio::test]
    async fn test_confirmation_requires_confirmed_commitment() {
        let node = Arc::new(MockSolanaNode::default());
        let adapter = adapter(Arc::clone(&node), true);
        let probe = ConfirmationWait::probe();

        assert_eq!(
            adapter.await_confirmation("sig", &probe).await.unwrap(),
            ConfirmationOutcome::Pending
        );

        *node.status.lock().unwrap() = Some(SignatureStatus {
            confirmation_status: Some("processed".to_string()),
            error: None,
        });
        *node.transaction.lock().unwrap() = Some(SolanaTransaction {
            error: None,
            instructions: vec![],
            undecodable: vec![],
        });
        assert_eq!(
            adapter.await_confirmation("sig", &probe).await.unwrap(),
            ConfirmationOutcome::Pending
        );

        *node.status.lock().unwrap() = Some(SignatureStatus {
            confirmation_status: Some("finalized".to_string()),
            error: None,
        });
        assert!(matches!(
            adapter.await_confirmation("sig", &probe).await.unwrap(),
            ConfirmationOutcome::Included(_)
        ));
    }

    #[tokio::test]
    async fn test_completion_amount_from_instruction() {
        let node = Arc::new(MockSolanaNode::default());
        *node.status.lock().unwrap() = Some(SignatureStatus {
            confirmation_status: Some("confirmed".to_string()),
            error: None,
        });
        let mut data = anchor_discriminator(NATIVE_INSTRUCTION).to_vec();
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(b"abcd");
        data.extend_from_slice(&777u64.to_le_bytes());
        *node.transaction.lock().unwrap() = Some(SolanaTransaction {
            error: None,
            instructions: vec![SolanaInstruction {
                program_id: program(),
                accounts: vec![],
                data,
            }],
            undecodable: vec![],
        });
        let adapter = adapter(node, true);

        let ConfirmationOutcome::Included(confirmed) = adapter
            .await_confirmation("sig", &ConfirmationWait::probe())
            .await
            .unwrap()
        else {
            panic!("expected inclusion");
        };
        let completion = adapter.parse_completion_event(&confirmed).unwrap().unwrap();
        assert_eq!(completion.amount, 777);
        assert!(completion.asset.is_empty());
    }

    #[tokio::test]
    async fn test_query_user_limits() {
        let node = Arc::new(MockSolanaNode::default());
        let adapter = adapter(Arc::clone(&node), true);
        let owner = signer(10).solana_address();
        let pda = adapter
            .user_account(&parse_solana_pubkey("owner", &owner).unwrap())
            .unwrap();

        let mut data = vec![0u8; USER_ACCOUNT_LEN];
        data[112..120].copy_from_slice(&9_000u64.to_le_bytes());
        data[128..136].copy_from_slice(&5u64.to_le_bytes());
        node.accounts
            .lock()
            .unwrap()
            .push((bs58::encode(pda).into_string(), data));

        let limits = adapter.query_user_limits(&owner).await.unwrap();
        assert_eq!(limits.payment_limit, 9_000);
        assert_eq!(limits.tail_update_count, 0);
        assert_eq!(limits.max_tail_updates, 5);

        let missing = adapter.query_user_limits(&signer(12).solana_address()).await;
        assert!(matches!(
            missing,
            Err(AppError::Blockchain(BlockchainError::AccountNotFound(_)))
        ));
    }
}
