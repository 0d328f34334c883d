//! Commit-reveal hashing.
//!
//! A payment is authorized by revealing a one-time secret whose binding to
//! `(payer, recipient, amount)` was committed on chain earlier. Each ledger's
//! contract recomputes the digest with its own native encoding, so the byte
//! layout below must match the deployed programs exactly:
//!
//! | ledger | layout hashed with SHA-256 |
//! |--------|----------------------------|
//! | Move   | `addr32 ‖ addr32 ‖ u64le ‖ uleb128(len) ‖ opt` |
//! | EVM    | `addr20 ‖ addr20 ‖ u64le ‖ opt` |
//! | Solana | `pubkey32 ‖ pubkey32 ‖ u64le ‖ opt` |

use sha2::{Digest, Sha256};

use super::encoding::{parse_evm_address, parse_move_address, parse_solana_pubkey, write_uleb128};
use super::error::ValidationError;
use super::types::{CommitHash, LedgerKind};

/// How the exchanged one-time secret string becomes contract bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpEncoding {
    /// The literal ASCII of the hex-looking string, lower-cased and without `0x`.
    /// The Move contract hashes these characters; it never hex-decodes them.
    AsciiHex,
    /// The UTF-8 bytes of the string exactly as received.
    Raw,
}

impl OtpEncoding {
    pub fn for_ledger(kind: LedgerKind) -> Self {
        match kind {
            LedgerKind::Move => OtpEncoding::AsciiHex,
            LedgerKind::Evm | LedgerKind::Solana => OtpEncoding::Raw,
        }
    }
}

/// Converts the exchanged one-time secret into the bytes a contract expects.
pub fn encode_one_time_secret(opt: &str, encoding: OtpEncoding) -> Vec<u8> {
    match encoding {
        OtpEncoding::AsciiHex => {
            let lowered = opt.trim().to_lowercase();
            let stripped = lowered.strip_prefix("0x").unwrap_or(&lowered);
            stripped.as_bytes().to_vec()
        }
        OtpEncoding::Raw => opt.as_bytes().to_vec(),
    }
}

/// Computes the commit hash for `kind` from already-encoded secret bytes.
pub fn compute_commit_hash(
    kind: LedgerKind,
    payer: &str,
    recipient: &str,
    amount: u64,
    opt: &[u8],
) -> Result<CommitHash, ValidationError> {
    let mut preimage = Vec::with_capacity(80 + opt.len());

    match kind {
        LedgerKind::Move => {
            preimage.extend_from_slice(&parse_move_address("payer", payer)?);
            preimage.extend_from_slice(&parse_move_address("recipient", recipient)?);
            preimage.extend_from_slice(&amount.to_le_bytes());
            write_uleb128(&mut preimage, opt.len() as u64);
        }
        LedgerKind::Evm => {
            preimage.extend_from_slice(&parse_evm_address("payer", payer)?);
            preimage.extend_from_slice(&parse_evm_address("recipient", recipient)?);
            preimage.extend_from_slice(&amount.to_le_bytes());
        }
        LedgerKind::Solana => {
            preimage.extend_from_slice(&parse_solana_pubkey("payer", payer)?);
            preimage.extend_from_slice(&parse_solana_pubkey("recipient", recipient)?);
            preimage.extend_from_slice(&amount.to_le_bytes());
        }
    }
    preimage.extend_from_slice(opt);

    Ok(CommitHash::from_bytes(Sha256::digest(&preimage).into()))
}

/// Encodes the secret the way `kind` expects and hashes it.
pub fn commit_hash_for(
    kind: LedgerKind,
    payer: &str,
    recipient: &str,
    amount: u64,
    opt: &str,
) -> Result<CommitHash, ValidationError> {
    let secret = encode_one_time_secret(opt, OtpEncoding::for_ledger(kind));
    compute_commit_hash(kind, payer, recipient, amount, &secret)
}
