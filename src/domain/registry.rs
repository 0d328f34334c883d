//! Network and currency lookups.
//!
//! Built once at startup from configuration and shared read-only afterwards.

use std::collections::BTreeMap;

use super::error::ValidationError;
use super::types::{AssetId, NetworkDescriptor, Symbol, UNKNOWN_CURRENCY, normalize_symbol};

#[derive(Debug, Clone, Default)]
pub struct CurrencyRegistry {
    networks: BTreeMap<String, NetworkDescriptor>,
}

impl CurrencyRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = NetworkDescriptor>) -> Self {
        let networks = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self { networks }
    }

    pub fn network_names(&self) -> Vec<String> {
        self.networks.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &NetworkDescriptor> {
        self.networks.values()
    }

    pub fn network(&self, network: &str) -> Result<&NetworkDescriptor, ValidationError> {
        self.networks
            .get(&network.trim().to_lowercase())
            .ok_or_else(|| ValidationError::UnsupportedNetwork {
                network: network.to_string(),
                supported: self.network_names(),
            })
    }

    /// Checks that `network` exists and offers `currency`; returns the normalized symbol.
    ///
    /// An empty currency stands for the network's native symbol.
    pub fn validate_combination(
        &self,
        network: &str,
        currency: &str,
    ) -> Result<Symbol, ValidationError> {
        let descriptor = self.network(network)?;
        let symbol = effective_symbol(descriptor, currency);
        if descriptor.assets.contains_key(&symbol) {
            Ok(symbol)
        } else {
            Err(ValidationError::UnsupportedCurrency {
                network: descriptor.name.clone(),
                currency: currency.to_string(),
                supported: descriptor.supported_symbols(),
            })
        }
    }

    pub fn resolve_asset(&self, network: &str, currency: &str) -> Result<AssetId, ValidationError> {
        let symbol = self.validate_combination(network, currency)?;
        let descriptor = self.network(network)?;
        descriptor
            .assets
            .get(&symbol)
            .cloned()
            .ok_or_else(|| ValidationError::UnsupportedCurrency {
                network: descriptor.name.clone(),
                currency: currency.to_string(),
                supported: descriptor.supported_symbols(),
            })
    }

    /// Reverse lookup; [`UNKNOWN_CURRENCY`] when nothing on the network matches.
    pub fn resolve_currency(&self, network: &str, asset: &AssetId) -> Symbol {
        let Ok(descriptor) = self.network(network) else {
            return UNKNOWN_CURRENCY.to_string();
        };
        let needle = AssetId::new(asset.as_str());
        descriptor
            .assets
            .iter()
            .find(|(_, id)| **id == needle)
            .map(|(symbol, _)| symbol.clone())
            .unwrap_or_else(|| UNKNOWN_CURRENCY.to_string())
    }

    pub fn is_native_currency(&self, network: &str, currency: &str) -> bool {
        self.network(network)
            .map(|d| d.native_symbol == normalize_symbol(currency))
            .unwrap_or(false)
    }

    /// Verifies that a caller-supplied asset id matches the registered one for `currency`.
    pub fn verify_asset(
        &self,
        network: &str,
        currency: &str,
        claimed: &str,
    ) -> Result<AssetId, ValidationError> {
        let expected = self.resolve_asset(network, currency)?;
        let claimed = AssetId::new(claimed);
        if claimed == expected {
            Ok(expected)
        } else {
            let descriptor = self.network(network)?;
            Err(ValidationError::TokenAddressMismatch {
                currency: effective_symbol(descriptor, currency),
                expected: expected.to_string(),
                actual: claimed.to_string(),
            })
        }
    }
}

fn effective_symbol(descriptor: &NetworkDescriptor, currency: &str) -> Symbol {
    let symbol = normalize_symbol(currency);
    if symbol.is_empty() {
        descriptor.native_symbol.clone()
    } else {
        symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::LedgerKind;

    const USDC_EVM: &str = "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238";
    const USDC_MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

    fn registry() -> CurrencyRegistry {
        CurrencyRegistry::new(vec![
            NetworkDescriptor::new("aptos-testnet", LedgerKind::Move, "APT").with_asset(
                "USDC",
                "0x69091fbab5f7d635ee7ac5098cf0c1efbe31d68fec0f2cd565e8d168daf52832",
            ),
            NetworkDescriptor::new("eth-sepolia", LedgerKind::Evm, "ETH")
                .with_asset("USDC", "0x1C7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
            NetworkDescriptor::new("solana-devnet", LedgerKind::Solana, "SOL")
                .with_asset("USDC", USDC_MINT),
        ])
    }

    #[test]
    fn test_resolve_asset_defaults_to_native() {
        let registry = registry();
        assert_eq!(
            registry.resolve_asset("eth-sepolia", "").unwrap().as_str(),
            "0x0000000000000000000000000000000000000000"
        );
        assert!(registry.resolve_asset("solana-devnet", "sol").unwrap().is_empty());
    }

    #[test]
    fn test_symbol_lookup_is_case_insensitive() {
        let registry = registry();
        assert_eq!(
            registry.resolve_asset("eth-sepolia", "usdc").unwrap().as_str(),
            USDC_EVM
        );
        assert_eq!(
            registry.resolve_asset("ETH-Sepolia", "UsDc").unwrap().as_str(),
            USDC_EVM
        );
    }

    #[test]
    fn test_unsupported_network_lists_networks() {
        let err = registry().validate_combination("bitcoin", "BTC").unwrap_err();
        match err {
            ValidationError::UnsupportedNetwork { network, supported } => {
                assert_eq!(network, "bitcoin");
                assert_eq!(supported, vec!["aptos-testnet", "eth-sepolia", "solana-devnet"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_currency_lists_only_that_network() {
        let err = registry().validate_combination("solana-devnet", "ETH").unwrap_err();
        match err {
            ValidationError::UnsupportedCurrency { supported, .. } => {
                assert_eq!(supported, vec!["SOL", "USDC"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_native_symbol_valid_everywhere() {
        let registry = registry();
        for descriptor in registry.descriptors() {
            assert!(
                registry
                    .validate_combination(&descriptor.name, &descriptor.native_symbol)
                    .is_ok()
            );
        }
    }

    #[test]
    fn test_round_trip_for_every_registered_asset() {
        let registry = registry();
        for descriptor in registry.descriptors() {
            for (symbol, asset) in &descriptor.assets {
                let resolved = registry.resolve_currency(&descriptor.name, asset);
                assert_eq!(&resolved, symbol);
                assert_eq!(
                    &registry.resolve_asset(&descriptor.name, &resolved).unwrap(),
                    asset
                );
            }
        }
    }

    #[test]
    fn test_resolve_currency_normalizes_hex_case() {
        let registry = registry();
        let upper = AssetId::new("0x1C7D4B196CB0C7B01D743FBC6116A902379C7238");
        assert_eq!(registry.resolve_currency("eth-sepolia", &upper), "USDC");
    }

    #[test]
    fn test_resolve_currency_unknown() {
        let registry = registry();
        let stranger = AssetId::new("0xdeadbeef00000000000000000000000000000000");
        assert_eq!(registry.resolve_currency("eth-sepolia", &stranger), UNKNOWN_CURRENCY);
        assert_eq!(
            registry.resolve_currency("nowhere", &AssetId::native()),
            UNKNOWN_CURRENCY
        );
    }

    #[test]
    fn test_is_native_currency() {
        let registry = registry();
        assert!(registry.is_native_currency("aptos-testnet", "apt"));
        assert!(!registry.is_native_currency("aptos-testnet", "USDC"));
        assert!(!registry.is_native_currency("nowhere", "APT"));
    }

    #[test]
    fn test_verify_asset_detects_mismatch() {
        let registry = registry();
        assert!(
            registry
                .verify_asset("eth-sepolia", "USDC", "0x1C7D4B196Cb0C7B01d743Fbc6116a902379C7238")
                .is_ok()
        );

        let err = registry
            .verify_asset("eth-sepolia", "USDC", "0x0000000000000000000000000000000000000001")
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::TokenAddressMismatch { currency, expected, .. }
                if currency == "USDC" && expected == USDC_EVM
        ));
    }
}
