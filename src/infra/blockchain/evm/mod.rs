//! EVM ledger adapter: legacy EIP-155 transactions against the payment contract.

pub mod abi;
pub mod client;
pub mod transaction;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::domain::encoding::parse_evm_address;
use crate::domain::{
    AppError, AssetId, BlockchainError, ChainAdapter, ChainTxRef, CommitHash, CompletionAmount,
    CompletionEvidence, CompletionRule, ConfirmationOutcome, ConfirmationWait,
    ConfirmedTransaction, EvmLogRule, LedgerKind, PaymentIntent, SimulationResult,
    UnsignedTransaction, UserLimits, ValidationError, encode_one_time_secret,
};
use crate::infra::blockchain::poll::poll_confirmation;
use crate::infra::blockchain::signer::{Secp256k1Signer, SignerSet};

pub use self::client::{EvmCall, EvmJsonRpcClient, EvmReceipt, EvmRpcApi, Execution};
use self::transaction::{LegacyTransaction, transaction_hash};

/// Gas limit used when estimation reverts; the simulation step reports the revert.
const FALLBACK_GAS_LIMIT: u64 = 300_000;

#[derive(Debug, Clone)]
pub struct EvmLedgerConfig {
    pub network: String,
    pub contract_address: String,
    pub chain_id: u64,
    /// Fixed gas limit; estimated with 20% headroom when unset
    pub gas_limit: Option<u64>,
    /// Fixed gas price in wei; taken from the node when unset
    pub gas_price: Option<u128>,
}

impl EvmLedgerConfig {
    pub fn new(network: &str, contract_address: &str, chain_id: u64) -> Self {
        Self {
            network: network.to_string(),
            contract_address: contract_address.to_string(),
            chain_id,
            gas_limit: None,
            gas_price: None,
        }
    }
}

pub struct EvmLedgerAdapter {
    config: EvmLedgerConfig,
    contract: [u8; 20],
    node: Arc<dyn EvmRpcApi>,
    signers: SignerSet<Secp256k1Signer>,
    rule: EvmLogRule,
}

impl EvmLedgerAdapter {
    pub fn new(
        config: EvmLedgerConfig,
        node: Arc<dyn EvmRpcApi>,
        signers: SignerSet<Secp256k1Signer>,
    ) -> Result<Self, AppError> {
        let contract = parse_evm_address("contract_address", &config.contract_address)?;
        let rule = EvmLogRule::new(&config.contract_address);
        Ok(Self {
            config,
            contract,
            node,
            signers,
            rule,
        })
    }

    fn signer_for(&self, address: &str) -> Result<&Secp256k1Signer, AppError> {
        let (_, resolved) = self.signers.resolve();
        [Some(resolved), self.signers.merchant()]
            .into_iter()
            .flatten()
            .find(|s| s.address_hex() == address)
            .ok_or_else(|| {
                AppError::Blockchain(BlockchainError::InvalidSignature(format!(
                    "no configured key for {address}"
                )))
            })
    }

    fn decode(&self, tx: &UnsignedTransaction) -> Result<(LegacyTransaction, [u8; 20]), AppError> {
        let legacy = LegacyTransaction::from_signing_payload(&tx.payload)?;
        let from = parse_evm_address("signer", &tx.signer)?;
        Ok((legacy, from))
    }

    async fn gas_limit(&self, call: &EvmCall) -> Result<u64, AppError> {
        if let Some(limit) = self.config.gas_limit {
            return Ok(limit);
        }
        match self.node.estimate_gas(call).await? {
            Execution::Success(gas) => Ok(gas.saturating_add(gas / 5)),
            Execution::Reverted(reason) => {
                warn!(reason = %reason, "Gas estimation reverted, using fallback limit");
                Ok(FALLBACK_GAS_LIMIT)
            }
        }
    }

    async fn view(&self, data: Vec<u8>) -> Result<Vec<u8>, AppError> {
        let call = EvmCall {
            from: [0u8; 20],
            to: self.contract,
            data,
            gas: None,
        };
        match self.node.call(&call).await? {
            Execution::Success(output) => Ok(output),
            Execution::Reverted(reason) => Err(BlockchainError::RpcError(reason).into()),
        }
    }

    async fn probe(&self, reference: &str) -> Result<ConfirmationOutcome, AppError> {
        match self.node.transaction_pending(reference).await? {
            None => return Ok(ConfirmationOutcome::NotFound),
            Some(true) => return Ok(ConfirmationOutcome::Pending),
            Some(false) => {}
        }
        // mined but the receipt is not indexed yet
        let Some(receipt) = self.node.receipt(reference).await? else {
            return Ok(ConfirmationOutcome::Pending);
        };

        Ok(ConfirmationOutcome::Included(ConfirmedTransaction {
            reference: reference.to_string(),
            success: receipt.status,
            vm_status: (!receipt.status).then(|| "execution reverted".to_string()),
            evidence: CompletionEvidence::Logs(receipt.logs),
            undecodable: receipt.undecodable,
        }))
    }
}

#[async_trait]
impl ChainAdapter for EvmLedgerAdapter {
    fn network(&self) -> &str {
        &self.config.network
    }

    fn kind(&self) -> LedgerKind {
        LedgerKind::Evm
    }

    fn signer_address(&self) -> String {
        self.signers.resolve().1.address_hex()
    }

    fn requires_commit_hash(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(network = %self.config.network))]
    async fn health_check(&self) -> Result<(), AppError> {
        let chain_id = self.node.chain_id().await?;
        if chain_id != self.config.chain_id {
            return Err(BlockchainError::Connection(format!(
                "node reports chain id {chain_id}, expected {}",
                self.config.chain_id
            ))
            .into());
        }
        Ok(())
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

        let payer = parse_evm_address("payer", intent.payer())?;
        let recipient = parse_evm_address("recipient", intent.recipient())?;
        // the zero address selects the native coin
        let token = if asset.is_empty() {
            [0u8; 20]
        } else {
            parse_evm_address("token_address", asset.as_str())?
        };
        let opt = encode_one_time_secret(intent.opt(), self.otp_encoding());
        let data = abi::encode_complete_payment(
            &token,
            &opt,
            &payer,
            &recipient,
            intent.amount(),
            commit_hash.as_bytes(),
        );

        let (role, signer) = self.signers.resolve();
        let from = signer.address();
        let call = EvmCall {
            from,
            to: self.contract,
            data,
            gas: None,
        };

        let nonce = self.node.pending_nonce(&from).await?;
        let gas_price = match self.config.gas_price {
            Some(price) => price,
            None => self.node.gas_price().await?,
        };
        let gas_limit = self.gas_limit(&call).await?;
        info!(?role, nonce, gas_limit, "Building EVM payment transaction");

        let legacy = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: self.contract,
            value: 0,
            data: call.data,
            chain_id: self.config.chain_id,
        };

        Ok(UnsignedTransaction {
            network: self.config.network.clone(),
            ledger: LedgerKind::Evm,
            signer: signer.address_hex(),
            payload: legacy.signing_payload(),
        })
    }

    #[instrument(skip(self, tx), fields(network = %self.config.network, signer = %tx.signer))]
    async fn simulate(&self, tx: &UnsignedTransaction) -> Result<SimulationResult, AppError> {
        let (legacy, from) = self.decode(tx)?;
        let call = EvmCall {
            from,
            to: legacy.to,
            data: legacy.data,
            gas: Some(legacy.gas_limit),
        };

        if let Execution::Reverted(reason) = self.node.call(&call).await? {
            return Ok(SimulationResult::failed(reason));
        }
        Ok(match self.node.estimate_gas(&call).await? {
            Execution::Success(gas) => SimulationResult::succeeded(gas),
            Execution::Reverted(reason) => SimulationResult::failed(reason),
        })
    }

    #[instrument(skip(self, tx), fields(network = %self.config.network, signer = %tx.signer))]
    async fn sign_and_submit(&self, tx: &UnsignedTransaction) -> Result<ChainTxRef, AppError> {
        let signer = self.signer_for(&tx.signer)?;
        let (legacy, _) = self.decode(tx)?;
        let signature = signer.sign_prehash(&legacy.signing_hash())?;
        let raw = legacy.encode_signed(&signature);

        let hash = self.node.send_raw_transaction(&raw).await?;
        let expected = transaction_hash(&raw);
        if !hash.eq_ignore_ascii_case(&expected) {
            warn!(node_hash = %hash, local_hash = %expected, "Node returned unexpected transaction hash");
        }
        info!(hash = %hash, "EVM transaction submitted");
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
        let user = parse_evm_address("address", address)?;

        let initialized = self
            .view(abi::encode_address_call(abi::IS_ACCOUNT_INITIALIZED, &user))
            .await?;
        if !abi::decode_bool(&initialized)? {
            return Err(BlockchainError::AccountNotFound(address.to_string()).into());
        }

        let output = self
            .view(abi::encode_address_call(abi::GET_USER_LIMITS, &user))
            .await?;
        let words = abi::decode_u64_words(&output, 3)?;
        Ok(UserLimits {
            payment_limit: words[0],
            tail_update_count: words[1],
            max_tail_updates: words[2],
        })
    }

    fn parse_completion_event(
        &self,
        tx: &ConfirmedTransaction,
    ) -> Result<Option<CompletionAmount>, BlockchainError> {
        self.rule.extract(&tx.evidence)
    }
}
