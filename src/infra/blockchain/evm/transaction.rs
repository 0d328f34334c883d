//! Legacy EIP-155 transactions.

use rlp::{DecoderError, Rlp, RlpStream};

use crate::domain::BlockchainError;
use crate::domain::encoding::keccak256;
use crate::infra::blockchain::signer::RecoverableSignature;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// Big-endian bytes without leading zeros, the RLP form of an unsigned integer.
fn trimmed(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn rlp_error(field: &str, e: DecoderError) -> BlockchainError {
    BlockchainError::DeserializationFailed(format!("rlp decode error for {field}: {e:?}"))
}

fn decode_u64(rlp: &Rlp, index: usize, field: &str) -> Result<u64, BlockchainError> {
    rlp.at(index)
        .and_then(|r| r.as_val())
        .map_err(|e| rlp_error(field, e))
}

fn decode_bytes(rlp: &Rlp, index: usize, field: &str) -> Result<Vec<u8>, BlockchainError> {
    rlp.at(index)
        .and_then(|r| r.as_val::<Vec<u8>>())
        .map_err(|e| rlp_error(field, e))
}

fn decode_u128(rlp: &Rlp, index: usize, field: &str) -> Result<u128, BlockchainError> {
    let bytes = decode_bytes(rlp, index, field)?;
    if bytes.len() > 16 {
        return Err(BlockchainError::DeserializationFailed(format!(
            "{field} too large: {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

impl LegacyTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&trimmed(&self.gas_price.to_be_bytes()));
        stream.append(&self.gas_limit);
        stream.append(&self.to.to_vec());
        stream.append(&trimmed(&self.value.to_be_bytes()));
        stream.append(&self.data);
    }

    /// `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    pub fn from_signing_payload(payload: &[u8]) -> Result<Self, BlockchainError> {
        let rlp = Rlp::new(payload);
        if !rlp.is_list() {
            return Err(BlockchainError::DeserializationFailed(
                "transaction must be an rlp list".to_string(),
            ));
        }
        let info = rlp.payload_info().map_err(|e| rlp_error("list header", e))?;
        if info.header_len.checked_add(info.value_len) != Some(payload.len()) {
            return Err(BlockchainError::DeserializationFailed(format!(
                "rlp list length does not match input of {} bytes",
                payload.len()
            )));
        }

        let item_count = rlp.item_count().map_err(|e| rlp_error("item count", e))?;
        if item_count != 9 {
            return Err(BlockchainError::DeserializationFailed(format!(
                "expected 9 transaction fields, got {item_count}"
            )));
        }

        let to: [u8; 20] = decode_bytes(&rlp, 3, "to")?
            .as_slice()
            .try_into()
            .map_err(|_| {
                BlockchainError::DeserializationFailed("recipient must be 20 bytes".to_string())
            })?;

        Ok(Self {
            nonce: decode_u64(&rlp, 0, "nonce")?,
            gas_price: decode_u128(&rlp, 1, "gasPrice")?,
            gas_limit: decode_u64(&rlp, 2, "gas")?,
            to,
            value: decode_u128(&rlp, 4, "value")?,
            data: decode_bytes(&rlp, 5, "data")?,
            chain_id: decode_u64(&rlp, 6, "chainId")?,
        })
    }

    /// Raw transaction for `eth_sendRawTransaction` with `v = recovery_id + 35 + 2 * chainId`.
    pub fn encode_signed(&self, signature: &RecoverableSignature) -> Vec<u8> {
        let v = u64::from(signature.recovery_id) + 35 + 2 * self.chain_id;
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&trimmed(&signature.r));
        stream.append(&trimmed(&signature.s));
        stream.out().to_vec()
    }
}

/// Transaction hash of an encoded signed transaction.
pub fn transaction_hash(raw: &[u8]) -> String {
    format!("0x{}", hex::encode(keccak256(raw)))
}
