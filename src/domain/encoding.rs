//! Address parsing and small wire encodings shared by the commitment
//! protocol and the ledger adapters.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

use super::error::ValidationError;

fn strip_hex_prefix(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
}

/// Parses a Move account address into its 32-byte form.
///
/// Short forms such as `0x1` are left-padded with zeros.
pub fn parse_move_address(field: &str, value: &str) -> Result<[u8; 32], ValidationError> {
    let hex_part = strip_hex_prefix(value);
    if hex_part.is_empty() || hex_part.len() > 64 {
        return Err(ValidationError::invalid_field(
            field,
            format!("'{value}' is not a Move address"),
        ));
    }
    let padded = format!("{hex_part:0>64}");
    let bytes = hex::decode(&padded).map_err(|e| {
        ValidationError::invalid_field(field, format!("'{value}' is not valid hex: {e}"))
    })?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parses a 20-byte EVM address.
pub fn parse_evm_address(field: &str, value: &str) -> Result<[u8; 20], ValidationError> {
    let hex_part = strip_hex_prefix(value);
    if hex_part.len() != 40 {
        return Err(ValidationError::invalid_field(
            field,
            format!("'{value}' must be 20 bytes of hex"),
        ));
    }
    let bytes = hex::decode(hex_part).map_err(|e| {
        ValidationError::invalid_field(field, format!("'{value}' is not valid hex: {e}"))
    })?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parses a base58 Solana public key.
pub fn parse_solana_pubkey(field: &str, value: &str) -> Result<[u8; 32], ValidationError> {
    let bytes = bs58::decode(value.trim()).into_vec().map_err(|e| {
        ValidationError::invalid_field(field, format!("'{value}' is not valid base58: {e}"))
    })?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        ValidationError::invalid_field(
            field,
            format!("public key must be 32 bytes, got {}", v.len()),
        )
    })
}

pub fn format_move_address(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn format_evm_address(bytes: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Appends `value` as unsigned LEB128.
pub fn write_uleb128(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// First eight bytes of `sha256("global:<name>")`, the Anchor instruction tag.
pub fn anchor_discriminator(instruction: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{instruction}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}
