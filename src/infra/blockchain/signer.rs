//! Local transaction signers.
//!
//! Secrets stay wrapped in [`SecretString`] and are parsed only for the
//! duration of a signing call; signers keep the derived public material.

use ed25519_dalek::{Signer, SigningKey};
use k256::ecdsa::SigningKey as EcdsaSigningKey;
use secrecy::{ExposeSecret, SecretString};
use sha3::{Digest, Sha3_256};

use crate::domain::BlockchainError;
use crate::domain::encoding::{format_evm_address, format_move_address, keccak256};

/// Which configured account a signer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerRole {
    Merchant,
    Paymaster,
}

/// Merchant account plus optional paymaster for one adapter.
#[derive(Debug)]
pub enum SignerSet<S> {
    Merchant(S),
    Paymaster(S),
    Both { merchant: S, paymaster: S },
}

impl<S> SignerSet<S> {
    pub fn new(merchant: Option<S>, paymaster: Option<S>) -> Result<Self, BlockchainError> {
        match (merchant, paymaster) {
            (Some(merchant), Some(paymaster)) => Ok(SignerSet::Both {
                merchant,
                paymaster,
            }),
            (Some(merchant), None) => Ok(SignerSet::Merchant(merchant)),
            (None, Some(paymaster)) => Ok(SignerSet::Paymaster(paymaster)),
            (None, None) => Err(BlockchainError::InvalidSignature(
                "no merchant or paymaster key configured".to_string(),
            )),
        }
    }

    /// The account that signs payments: paymaster when configured, else merchant.
    pub fn resolve(&self) -> (SignerRole, &S) {
        match self {
            SignerSet::Merchant(merchant) => (SignerRole::Merchant, merchant),
            SignerSet::Paymaster(paymaster) | SignerSet::Both { paymaster, .. } => {
                (SignerRole::Paymaster, paymaster)
            }
        }
    }

    pub fn merchant(&self) -> Option<&S> {
        match self {
            SignerSet::Merchant(merchant) | SignerSet::Both { merchant, .. } => Some(merchant),
            SignerSet::Paymaster(_) => None,
        }
    }

    pub fn has_paymaster(&self) -> bool {
        !matches!(self, SignerSet::Merchant(_))
    }
}

/// Ed25519 key encodings accepted from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ed25519KeyFormat {
    /// `0x`-prefixed or bare hex seed, optionally tagged `ed25519-priv-` (Move tooling)
    Hex,
    /// Base58 seed or 64-byte keypair (Solana tooling)
    Base58,
}

fn ed25519_key_from_secret(
    secret: &SecretString,
    format: Ed25519KeyFormat,
) -> Result<SigningKey, BlockchainError> {
    let raw = secret.expose_secret().trim();
    let key_bytes = match format {
        Ed25519KeyFormat::Hex => {
            let untagged = raw.strip_prefix("ed25519-priv-").unwrap_or(raw);
            let digits = untagged.strip_prefix("0x").unwrap_or(untagged);
            hex::decode(digits).map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?
        }
        Ed25519KeyFormat::Base58 => bs58::decode(raw)
            .into_vec()
            .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?,
    };

    let key_array: [u8; 32] = match key_bytes.len() {
        // keypair format: first 32 bytes are the secret key
        64 | 32 => key_bytes[..32].try_into().map_err(|_| {
            BlockchainError::InvalidSignature("Invalid keypair format".to_string())
        })?,
        other => {
            return Err(BlockchainError::InvalidSignature(format!(
                "Key must be 32 or 64 bytes, got {other}"
            )));
        }
    };

    Ok(SigningKey::from_bytes(&key_array))
}

/// Ed25519 account used on Move and Solana ledgers.
pub struct Ed25519Signer {
    secret: SecretString,
    format: Ed25519KeyFormat,
    public_key: [u8; 32],
}

impl Ed25519Signer {
    pub fn new(secret: SecretString, format: Ed25519KeyFormat) -> Result<Self, BlockchainError> {
        let signing_key = ed25519_key_from_secret(&secret, format)?;
        let public_key = signing_key.verifying_key().to_bytes();
        Ok(Self {
            secret,
            format,
            public_key,
        })
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Single-key account address: `sha3_256(pubkey || 0x00)`.
    pub fn move_address(&self) -> [u8; 32] {
        let mut hasher = Sha3_256::new();
        hasher.update(self.public_key);
        hasher.update([0u8]);
        hasher.finalize().into()
    }

    pub fn move_address_hex(&self) -> String {
        format_move_address(&self.move_address())
    }

    pub fn solana_address(&self) -> String {
        bs58::encode(self.public_key).into_string()
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64], BlockchainError> {
        let signing_key = ed25519_key_from_secret(&self.secret, self.format)?;
        Ok(signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Recoverable secp256k1 signature split into its wire parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

fn ecdsa_key_from_secret(secret: &SecretString) -> Result<EcdsaSigningKey, BlockchainError> {
    let raw = secret.expose_secret().trim();
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(digits).map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;
    EcdsaSigningKey::from_slice(&bytes)
        .map_err(|e| BlockchainError::InvalidSignature(format!("invalid secp256k1 key: {e}")))
}

/// secp256k1 account used on EVM ledgers.
pub struct Secp256k1Signer {
    secret: SecretString,
    address: [u8; 20],
}

impl Secp256k1Signer {
    pub fn new(secret: SecretString) -> Result<Self, BlockchainError> {
        let signing_key = ecdsa_key_from_secret(&secret)?;
        let public = signing_key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&public.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        Ok(Self { secret, address })
    }

    pub fn address(&self) -> [u8; 20] {
        self.address
    }

    pub fn address_hex(&self) -> String {
        format_evm_address(&self.address)
    }

    /// Signs a 32-byte digest, returning low-s `r`, `s` and the recovery id.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, BlockchainError> {
        let signing_key = ecdsa_key_from_secret(&self.secret)?;
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| BlockchainError::InvalidSignature(e.to_string()))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl std::fmt::Debug for Secp256k1Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1Signer")
            .field("address", &self.address_hex())
            .finish_non_exhaustive()
    }
}
