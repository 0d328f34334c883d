//! Process configuration.
//!
//! Read once at startup from a TOML file and handed to every component as an
//! immutable value. Signer keys may come from the file or from
//! `<NETWORK>_MERCHANT_PRIVATE_KEY` / `<NETWORK>_PAYMASTER_PRIVATE_KEY`, where
//! the network name is upper-cased and `-` becomes `_`.

use std::collections::HashSet;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::domain::types::normalize_symbol;
use crate::domain::{ConfigError, CurrencyRegistry, LedgerKind, NetworkDescriptor};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "TINYPAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitSettings,
    pub confirmation: ConfirmationSettings,
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Guards POST routes when set
    pub api_key: Option<SecretString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub rps: u32,
    pub burst: u32,
}

/// Bounds on how long the gateway waits for a ledger to include a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Zero makes a status query a single probe
    pub status_timeout: Duration,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            status_timeout: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    pub symbol: String,
    pub asset: String,
}

/// Settings that only apply to one ledger kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerSettings {
    Move {
        module_name: String,
        max_gas_amount: u64,
        gas_unit_price: u64,
    },
    Evm {
        chain_id: u64,
        gas_limit: Option<u64>,
        gas_price: Option<u128>,
    },
    Solana,
}

#[derive(Debug)]
pub struct NetworkConfig {
    pub name: String,
    pub kind: LedgerKind,
    pub rpc_url: String,
    /// Move module address, EVM contract or Solana program id
    pub contract_address: String,
    pub native_symbol: String,
    pub native_asset: Option<String>,
    pub tokens: Vec<TokenConfig>,
    pub merchant_private_key: Option<SecretString>,
    pub paymaster_private_key: Option<SecretString>,
    pub ledger: LedgerSettings,
}

const DEFAULT_PORT: u16 = 9090;
const DEFAULT_RPS: u32 = 10;
const DEFAULT_BURST: u32 = 20;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_MODULE_NAME: &str = "tinypay";
const DEFAULT_MAX_GAS_AMOUNT: u64 = 100_000;
const DEFAULT_GAS_UNIT_PRICE: u64 = 100;

// File shape. Kept private so raw key strings never reach a Debug impl.
#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    server: RawServer,
    rate_limit: RawRateLimit,
    confirmation: RawConfirmation,
    networks: Vec<RawNetwork>,
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawServer {
    port: u16,
    api_key: Option<String>,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            api_key: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRateLimit {
    rps: u32,
    burst: u32,
}

impl Default for RawRateLimit {
    fn default() -> Self {
        Self {
            rps: DEFAULT_RPS,
            burst: DEFAULT_BURST,
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfirmation {
    timeout_secs: u64,
    poll_interval_ms: u64,
    status_timeout_secs: u64,
}

impl Default for RawConfirmation {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            status_timeout_secs: 0,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNetwork {
    name: String,
    kind: LedgerKind,
    #[serde(default)]
    rpc_url: String,
    #[serde(default)]
    contract_address: String,
    native_symbol: String,
    #[serde(default)]
    native_asset: Option<String>,
    #[serde(default)]
    tokens: Vec<RawToken>,
    #[serde(default)]
    merchant_private_key: Option<String>,
    #[serde(default)]
    paymaster_private_key: Option<String>,
    #[serde(default)]
    module_name: Option<String>,
    #[serde(default)]
    max_gas_amount: Option<u64>,
    #[serde(default)]
    gas_unit_price: Option<u64>,
    #[serde(default)]
    chain_id: Option<u64>,
    #[serde(default)]
    gas_limit: Option<u64>,
    #[serde(default)]
    gas_price: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawToken {
    symbol: String,
    asset: String,
}

fn invalid(key: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        message: message.into(),
    }
}

/// `aptos-testnet` becomes `APTOS_TESTNET`.
pub fn env_prefix(network: &str) -> String {
    network.trim().to_uppercase().replace('-', "_")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Loads the file named by `TINYPAY_CONFIG` (default `config.toml`),
    /// letting process environment variables override signer keys.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::ParseError(format!("cannot read {path}: {e}")))?;
        Self::from_toml_str(&contents, |key| std::env::var(key).ok())
    }

    /// Parses and validates a configuration document. `env` resolves key overrides.
    pub fn from_toml_str<F>(contents: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(contents)?;

        if raw.rate_limit.rps == 0 {
            return Err(invalid("rate_limit.rps", "must be greater than 0"));
        }
        if raw.rate_limit.burst == 0 {
            return Err(invalid("rate_limit.burst", "must be greater than 0"));
        }
        if raw.confirmation.poll_interval_ms == 0 {
            return Err(invalid(
                "confirmation.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if raw.networks.is_empty() {
            return Err(invalid("networks", "at least one network is required"));
        }

        let mut seen = HashSet::new();
        let networks = raw
            .networks
            .into_iter()
            .enumerate()
            .map(|(index, network)| {
                let parsed = parse_network(index, network, &env)?;
                if !seen.insert(parsed.name.clone()) {
                    return Err(invalid(
                        format!("networks[{index}].name"),
                        format!("duplicate network '{}'", parsed.name),
                    ));
                }
                Ok(parsed)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            server: ServerConfig {
                port: raw.server.port,
                api_key: non_empty(raw.server.api_key).map(SecretString::from),
            },
            rate_limit: RateLimitSettings {
                rps: raw.rate_limit.rps,
                burst: raw.rate_limit.burst,
            },
            confirmation: ConfirmationSettings {
                timeout: Duration::from_secs(raw.confirmation.timeout_secs),
                poll_interval: Duration::from_millis(raw.confirmation.poll_interval_ms),
                status_timeout: Duration::from_secs(raw.confirmation.status_timeout_secs),
            },
            networks,
        })
    }

    /// Read-only currency tables for every configured network.
    pub fn registry(&self) -> CurrencyRegistry {
        CurrencyRegistry::new(self.networks.iter().map(NetworkConfig::descriptor))
    }
}

impl NetworkConfig {
    pub fn descriptor(&self) -> NetworkDescriptor {
        let mut descriptor = NetworkDescriptor::new(&self.name, self.kind, &self.native_symbol);
        if let Some(asset) = &self.native_asset {
            descriptor = descriptor.with_native_asset(asset);
        }
        self.tokens.iter().fold(descriptor, |d, token| {
            d.with_asset(&token.symbol, &token.asset)
        })
    }
}

fn parse_network<F>(index: usize, raw: RawNetwork, env: &F) -> Result<NetworkConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = |field: &str| format!("networks[{index}].{field}");

    let name = raw.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(invalid(key("name"), "must not be empty"));
    }
    if raw.rpc_url.trim().is_empty() {
        return Err(invalid(key("rpc_url"), "must not be empty"));
    }
    if raw.contract_address.trim().is_empty() {
        return Err(invalid(key("contract_address"), "must not be empty"));
    }
    let native_symbol = normalize_symbol(&raw.native_symbol);
    if native_symbol.is_empty() {
        return Err(invalid(key("native_symbol"), "must not be empty"));
    }

    let mut symbols = HashSet::from([native_symbol.clone()]);
    let mut tokens = Vec::with_capacity(raw.tokens.len());
    for (token_index, token) in raw.tokens.into_iter().enumerate() {
        let symbol = normalize_symbol(&token.symbol);
        let token_key = key(&format!("tokens[{token_index}]"));
        if symbol.is_empty() || token.asset.trim().is_empty() {
            return Err(invalid(token_key, "symbol and asset must not be empty"));
        }
        if !symbols.insert(symbol.clone()) {
            return Err(invalid(token_key, format!("duplicate symbol '{symbol}'")));
        }
        tokens.push(TokenConfig {
            symbol,
            asset: token.asset.trim().to_string(),
        });
    }

    let prefix = env_prefix(&name);
    let merchant_private_key = non_empty(env(&format!("{prefix}_MERCHANT_PRIVATE_KEY")))
        .or_else(|| non_empty(raw.merchant_private_key))
        .map(SecretString::from);
    let paymaster_private_key = non_empty(env(&format!("{prefix}_PAYMASTER_PRIVATE_KEY")))
        .or_else(|| non_empty(raw.paymaster_private_key))
        .map(SecretString::from);
    if merchant_private_key.is_none() && paymaster_private_key.is_none() {
        return Err(invalid(
            key("merchant_private_key"),
            format!("no signer key; set it in the file or {prefix}_MERCHANT_PRIVATE_KEY"),
        ));
    }

    let ledger = match raw.kind {
        LedgerKind::Move => LedgerSettings::Move {
            module_name: non_empty(raw.module_name)
                .unwrap_or_else(|| DEFAULT_MODULE_NAME.to_string()),
            max_gas_amount: raw.max_gas_amount.unwrap_or(DEFAULT_MAX_GAS_AMOUNT),
            gas_unit_price: raw.gas_unit_price.unwrap_or(DEFAULT_GAS_UNIT_PRICE),
        },
        LedgerKind::Evm => {
            let chain_id = raw.chain_id.unwrap_or_default();
            if chain_id == 0 {
                return Err(invalid(key("chain_id"), "must be greater than 0"));
            }
            LedgerSettings::Evm {
                chain_id,
                gas_limit: raw.gas_limit,
                gas_price: raw.gas_price.map(u128::from),
            }
        }
        LedgerKind::Solana => LedgerSettings::Solana,
    };

    Ok(NetworkConfig {
        name,
        kind: raw.kind,
        rpc_url: raw.rpc_url.trim().to_string(),
        contract_address: raw.contract_address.trim().to_string(),
        native_symbol,
        native_asset: non_empty(raw.native_asset),
        tokens,
        merchant_private_key,
        paymaster_private_key,
        ledger,
    })
}
