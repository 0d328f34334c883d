//! Minimal BCS encoding of Move user transactions.

use sha3::{Digest, Sha3_256};

use crate::domain::ValidationError;
use crate::domain::encoding::{parse_move_address, write_uleb128};

/// `TransactionPayload::EntryFunction`
const PAYLOAD_ENTRY_FUNCTION: u8 = 2;
/// `TypeTag::Struct`
const TYPE_TAG_STRUCT: u8 = 7;
/// `TransactionAuthenticator::Ed25519`
const AUTHENTICATOR_ED25519: u8 = 0;

const RAW_TRANSACTION_SALT: &[u8] = b"APTOS::RawTransaction";

#[derive(Debug, Default)]
pub struct BcsWriter {
    buf: Vec<u8>,
}

impl BcsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn uleb128(&mut self, value: usize) -> &mut Self {
        write_uleb128(&mut self.buf, value as u64);
        self
    }

    /// Fixed-width bytes, no length prefix
    pub fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Length-prefixed byte vector
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.uleb128(bytes.len());
        self.fixed(bytes)
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

pub fn encode_address(address: &[u8; 32]) -> Vec<u8> {
    address.to_vec()
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    BcsWriter::new().bytes(bytes).finish()
}

/// `address::module::Name` without generic parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructTag {
    pub address: [u8; 32],
    pub module: String,
    pub name: String,
}

impl StructTag {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let parts: Vec<&str> = value.trim().split("::").collect();
        let [address, module, name] = parts.as_slice() else {
            return Err(ValidationError::invalid_field(
                "coin_type",
                format!("'{value}' is not of the form address::module::Name"),
            ));
        };
        if module.is_empty() || name.is_empty() || name.contains('<') {
            return Err(ValidationError::invalid_field(
                "coin_type",
                format!("'{value}' is not a plain struct tag"),
            ));
        }
        Ok(Self {
            address: parse_move_address("coin_type", address)?,
            module: (*module).to_string(),
            name: (*name).to_string(),
        })
    }

    fn write_type_tag(&self, writer: &mut BcsWriter) {
        writer
            .u8(TYPE_TAG_STRUCT)
            .fixed(&self.address)
            .str(&self.module)
            .str(&self.name)
            .uleb128(0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFunctionCall {
    pub module_address: [u8; 32],
    pub module_name: String,
    pub function: String,
    pub type_args: Vec<StructTag>,
    /// Each argument already BCS-encoded
    pub args: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub sender: [u8; 32],
    pub sequence_number: u64,
    pub payload: EntryFunctionCall,
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub expiration_timestamp_secs: u64,
    pub chain_id: u8,
}

impl RawTransaction {
    pub fn to_bcs(&self) -> Vec<u8> {
        let mut writer = BcsWriter::new();
        writer.fixed(&self.sender).u64(self.sequence_number);

        let call = &self.payload;
        writer
            .u8(PAYLOAD_ENTRY_FUNCTION)
            .fixed(&call.module_address)
            .str(&call.module_name)
            .str(&call.function)
            .uleb128(call.type_args.len());
        for tag in &call.type_args {
            tag.write_type_tag(&mut writer);
        }
        writer.uleb128(call.args.len());
        for arg in &call.args {
            writer.bytes(arg);
        }

        writer
            .u64(self.max_gas_amount)
            .u64(self.gas_unit_price)
            .u64(self.expiration_timestamp_secs)
            .u8(self.chain_id);
        writer.finish()
    }
}

/// Bytes an Ed25519 key signs for a raw transaction.
pub fn signing_message(raw_txn: &[u8]) -> Vec<u8> {
    let prefix = Sha3_256::digest(RAW_TRANSACTION_SALT);
    let mut message = Vec::with_capacity(prefix.len() + raw_txn.len());
    message.extend_from_slice(&prefix);
    message.extend_from_slice(raw_txn);
    message
}

/// Raw transaction followed by a single-key Ed25519 authenticator.
pub fn signed_transaction(raw_txn: &[u8], public_key: &[u8; 32], signature: &[u8; 64]) -> Vec<u8> {
    let mut writer = BcsWriter::new();
    writer
        .fixed(raw_txn)
        .u8(AUTHENTICATOR_ED25519)
        .bytes(public_key)
        .bytes(signature);
    writer.finish()
}
