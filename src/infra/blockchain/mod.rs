//! Blockchain client implementations.
//!
//! One [`ChainAdapter`] per configured network, each paired with the RPC
//! client of its ledger.

pub mod evm;
pub mod move_ledger;
pub mod poll;
pub mod rpc;
pub mod signer;
pub mod solana;

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::config::{LedgerSettings, NetworkConfig};
use crate::domain::{AppError, AssetId, ChainAdapter, ConfigError};

pub use evm::{EvmJsonRpcClient, EvmLedgerAdapter, EvmLedgerConfig};
pub use move_ledger::{MoveLedgerAdapter, MoveLedgerConfig, MoveRestClient};
pub use rpc::RpcClientConfig;
pub use signer::{Ed25519KeyFormat, Ed25519Signer, Secp256k1Signer, SignerRole, SignerSet};
pub use solana::{SolanaLedgerAdapter, SolanaLedgerConfig, SolanaRpcClient};

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

fn signer_set<S, F>(network: &NetworkConfig, make: F) -> Result<SignerSet<S>, AppError>
where
    F: Fn(SecretString) -> Result<S, crate::domain::BlockchainError>,
{
    let merchant = network
        .merchant_private_key
        .as_ref()
        .map(|k| make(copy_secret(k)))
        .transpose()?;
    let paymaster = network
        .paymaster_private_key
        .as_ref()
        .map(|k| make(copy_secret(k)))
        .transpose()?;
    Ok(SignerSet::new(merchant, paymaster)?)
}

/// Builds the adapter for one configured network.
pub fn build_adapter(
    network: &NetworkConfig,
    rpc: &RpcClientConfig,
) -> Result<Arc<dyn ChainAdapter>, AppError> {
    let adapter: Arc<dyn ChainAdapter> = match &network.ledger {
        LedgerSettings::Move {
            module_name,
            max_gas_amount,
            gas_unit_price,
        } => {
            let mut config = MoveLedgerConfig::new(&network.name, &network.contract_address);
            config.module_name = module_name.clone();
            config.max_gas_amount = *max_gas_amount;
            config.gas_unit_price = *gas_unit_price;
            if let Some(asset) = &network.native_asset {
                config.native_asset = AssetId::new(asset);
            }
            let node = Arc::new(MoveRestClient::new(&network.rpc_url, rpc.clone())?);
            let signers = signer_set(network, |k| Ed25519Signer::new(k, Ed25519KeyFormat::Hex))?;
            Arc::new(MoveLedgerAdapter::new(config, node, signers)?)
        }
        LedgerSettings::Evm {
            chain_id,
            gas_limit,
            gas_price,
        } => {
            let mut config =
                EvmLedgerConfig::new(&network.name, &network.contract_address, *chain_id);
            config.gas_limit = *gas_limit;
            config.gas_price = *gas_price;
            let node = Arc::new(EvmJsonRpcClient::new(&network.rpc_url, rpc.clone())?);
            let signers = signer_set(network, Secp256k1Signer::new)?;
            Arc::new(EvmLedgerAdapter::new(config, node, signers)?)
        }
        LedgerSettings::Solana => {
            let config = SolanaLedgerConfig::new(&network.name, &network.contract_address);
            let node = Arc::new(SolanaRpcClient::new(&network.rpc_url, rpc.clone())?);
            let signers =
                signer_set(network, |k| Ed25519Signer::new(k, Ed25519KeyFormat::Base58))?;
            Arc::new(SolanaLedgerAdapter::new(config, node, signers)?)
        }
    };

    info!(
        network = %adapter.network(),
        kind = %adapter.kind(),
        signer = %adapter.signer_address(),
        "Chain adapter ready"
    );
    Ok(adapter)
}

/// Builds every configured adapter; the first failure names its network.
pub fn build_adapters(
    networks: &[NetworkConfig],
    rpc: &RpcClientConfig,
) -> Result<Vec<Arc<dyn ChainAdapter>>, AppError> {
    networks
        .iter()
        .map(|network| {
            build_adapter(network, rpc).map_err(|e| {
                AppError::Config(ConfigError::InvalidValue {
                    key: format!("networks.{}", network.name),
                    message: e.to_string(),
                })
            })
        })
        .collect()
}
