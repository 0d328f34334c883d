//! Solidity ABI encoding for the payment contract's calls.

use crate::domain::BlockchainError;
use crate::domain::encoding::keccak256;

pub const COMPLETE_PAYMENT: &str = "completePayment(address,bytes,address,address,uint256,bytes32)";
pub const GET_USER_LIMITS: &str = "getUserLimits(address)";
pub const IS_ACCOUNT_INITIALIZED: &str = "isAccountInitialized(address)";

/// `Error(string)`
const REVERT_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn address_word(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn encode_complete_payment(
    token: &[u8; 20],
    opt: &[u8],
    payer: &[u8; 20],
    recipient: &[u8; 20],
    amount: u64,
    commit_hash: &[u8; 32],
) -> Vec<u8> {
    const HEAD_WORDS: u64 = 6;

    let mut out = selector(COMPLETE_PAYMENT).to_vec();
    out.extend_from_slice(&address_word(token));
    out.extend_from_slice(&uint_word(HEAD_WORDS * 32));
    out.extend_from_slice(&address_word(payer));
    out.extend_from_slice(&address_word(recipient));
    out.extend_from_slice(&uint_word(amount));
    out.extend_from_slice(commit_hash);

    out.extend_from_slice(&uint_word(opt.len() as u64));
    out.extend_from_slice(opt);
    let padding = (32 - opt.len() % 32) % 32;
    out.extend(std::iter::repeat_n(0u8, padding));
    out
}

pub fn encode_address_call(signature: &str, address: &[u8; 20]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&address_word(address));
    out
}

fn word(data: &[u8], index: usize) -> Result<&[u8], BlockchainError> {
    data.get(index * 32..(index + 1) * 32).ok_or_else(|| {
        BlockchainError::DeserializationFailed(format!(
            "return data has {} bytes, word {index} missing",
            data.len()
        ))
    })
}

pub fn decode_bool(data: &[u8]) -> Result<bool, BlockchainError> {
    let w = word(data, 0)?;
    match w[31] {
        0 | 1 if w[..31].iter().all(|b| *b == 0) => Ok(w[31] == 1),
        _ => Err(BlockchainError::DeserializationFailed(
            "return value is not a bool".to_string(),
        )),
    }
}

pub fn decode_u64_words(data: &[u8], count: usize) -> Result<Vec<u64>, BlockchainError> {
    (0..count)
        .map(|i| {
            let w = word(data, i)?;
            if w[..24].iter().any(|b| *b != 0) {
                return Err(BlockchainError::DeserializationFailed(format!(
                    "word {i} exceeds u64"
                )));
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&w[24..]);
            Ok(u64::from_be_bytes(bytes))
        })
        .collect()
}

/// Reason string of an `Error(string)` revert payload.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&REVERT_SELECTOR)?;
    let len = decode_u64_words(word(body, 1).ok()?, 1).ok()?[0] as usize;
    let text = body.get(64..64 + len)?;
    String::from_utf8(text.to_vec()).ok()
}
