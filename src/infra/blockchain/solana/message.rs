//! Legacy Solana transaction messages, program-derived addresses and the
//! payment program's account layout.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha256};

use crate::domain::encoding::{anchor_discriminator, write_uleb128};
use crate::domain::{BlockchainError, UserLimits};

pub type Pubkey = [u8; 32];

/// `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = [0u8; 32];

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

fn is_on_curve(bytes: &Pubkey) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

/// Finds the first off-curve address for `seeds`, trying bumps from 255 down.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), BlockchainError> {
    for bump in (0..=u8::MAX).rev() {
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update([bump]);
        hasher.update(program_id);
        hasher.update(PDA_MARKER);
        let candidate: Pubkey = hasher.finalize().into();
        if !is_on_curve(&candidate) {
            return Ok((candidate, bump));
        }
    }
    Err(BlockchainError::DeserializationFailed(
        "no viable program address bump".to_string(),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: false,
        }
    }

    pub fn signer(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: true,
            is_writable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CompiledInstruction {
    program_index: u8,
    accounts: Vec<u8>,
    data: Vec<u8>,
}

/// A compiled legacy message; its serialization is what signers sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    num_required_signatures: u8,
    num_readonly_signed: u8,
    num_readonly_unsigned: u8,
    account_keys: Vec<Pubkey>,
    recent_blockhash: [u8; 32],
    instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// Orders keys as fee payer, other signers, writable accounts, then
    /// read-only accounts, merging duplicate metas.
    pub fn compile(
        fee_payer: &Pubkey,
        instructions: &[Instruction],
        recent_blockhash: [u8; 32],
    ) -> Result<Self, BlockchainError> {
        let mut metas: Vec<AccountMeta> = vec![AccountMeta::signer(*fee_payer)];
        let mut merge = |meta: AccountMeta| {
            match metas.iter_mut().find(|m| m.pubkey == meta.pubkey) {
                Some(existing) => {
                    existing.is_signer |= meta.is_signer;
                    existing.is_writable |= meta.is_writable;
                }
                None => metas.push(meta),
            }
        };
        for ix in instructions {
            for meta in &ix.accounts {
                merge(meta.clone());
            }
            merge(AccountMeta::readonly(ix.program_id));
        }

        let rank = |m: &AccountMeta| match (m.is_signer, m.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        // stable sort keeps the fee payer first
        metas.sort_by_key(|m| (m.pubkey != *fee_payer, rank(m)));

        let count = |signer: bool, writable: bool| {
            metas
                .iter()
                .filter(|m| m.is_signer == signer && m.is_writable == writable)
                .count() as u8
        };
        let account_keys: Vec<Pubkey> = metas.iter().map(|m| m.pubkey).collect();
        let index_of = |key: &Pubkey| -> Result<u8, BlockchainError> {
            account_keys
                .iter()
                .position(|k| k == key)
                .and_then(|i| u8::try_from(i).ok())
                .ok_or_else(|| {
                    BlockchainError::DeserializationFailed("account index out of range".into())
                })
        };

        let compiled = instructions
            .iter()
            .map(|ix| {
                Ok(CompiledInstruction {
                    program_index: index_of(&ix.program_id)?,
                    accounts: ix
                        .accounts
                        .iter()
                        .map(|m| index_of(&m.pubkey))
                        .collect::<Result<_, _>>()?,
                    data: ix.data.clone(),
                })
            })
            .collect::<Result<Vec<_>, BlockchainError>>()?;

        Ok(Self {
            num_required_signatures: count(true, true) + count(true, false),
            num_readonly_signed: count(true, false),
            num_readonly_unsigned: count(false, false),
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    pub fn account_keys(&self) -> &[Pubkey] {
        &self.account_keys
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![
            self.num_required_signatures,
            self.num_readonly_signed,
            self.num_readonly_unsigned,
        ];
        write_uleb128(&mut out, self.account_keys.len() as u64);
        for key in &self.account_keys {
            out.extend_from_slice(key);
        }
        out.extend_from_slice(&self.recent_blockhash);
        write_uleb128(&mut out, self.instructions.len() as u64);
        for ix in &self.instructions {
            out.push(ix.program_index);
            write_uleb128(&mut out, ix.accounts.len() as u64);
            out.extend_from_slice(&ix.accounts);
            write_uleb128(&mut out, ix.data.len() as u64);
            out.extend_from_slice(&ix.data);
        }
        out
    }
}

/// Wire transaction: signature count, signatures, then the message bytes.
pub fn signed_transaction(message: &[u8], signatures: &[[u8; 64]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + signatures.len() * 64 + message.len());
    write_uleb128(&mut out, signatures.len() as u64);
    for signature in signatures {
        out.extend_from_slice(signature);
    }
    out.extend_from_slice(message);
    out
}

/// Signatures a serialized message expects, read from its header.
pub fn required_signatures(message: &[u8]) -> Result<usize, BlockchainError> {
    message
        .first()
        .map(|n| *n as usize)
        .ok_or_else(|| BlockchainError::DeserializationFailed("empty message".to_string()))
}

/// `disc(8) || u32le(len) || opt [|| commit(32)] || u64le(amount)`
pub fn payment_instruction_data(
    instruction: &str,
    opt: &[u8],
    commit_hash: Option<&[u8; 32]>,
    amount: u64,
) -> Vec<u8> {
    let mut data = anchor_discriminator(instruction).to_vec();
    data.extend_from_slice(&(opt.len() as u32).to_le_bytes());
    data.extend_from_slice(opt);
    if let Some(commit_hash) = commit_hash {
        data.extend_from_slice(commit_hash);
    }
    data.extend_from_slice(&amount.to_le_bytes());
    data
}

/// Anchor discriminator plus the serialized user account.
pub const USER_ACCOUNT_LEN: usize = 145;

const PAYMENT_LIMIT_OFFSET: usize = 8 + 32 + 8 + 64;

/// Reads the limit counters out of a payer's user account.
pub fn parse_user_limits(data: &[u8]) -> Result<UserLimits, BlockchainError> {
    if data.len() < USER_ACCOUNT_LEN {
        return Err(BlockchainError::DeserializationFailed(format!(
            "invalid account data length: {}",
            data.len()
        )));
    }
    let read = |offset: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    };
    Ok(UserLimits {
        payment_limit: read(PAYMENT_LIMIT_OFFSET),
        tail_update_count: read(PAYMENT_LIMIT_OFFSET + 8),
        max_tail_updates: read(PAYMENT_LIMIT_OFFSET + 16),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn test_program_address_is_off_curve_and_stable() {
        let program = [7u8; 32];
        let payer = [9u8; 32];
        let (address, bump) = find_program_address(&[b"user".as_slice(), payer.as_slice()], &program).unwrap();
        assert!(!is_on_curve(&address));
        assert_eq!(
            find_program_address(&[b"user".as_slice(), payer.as_slice()], &program).unwrap(),
            (address, bump)
        );

        let (state, _) = find_program_address(&[b"state".as_slice()], &program).unwrap();
        assert_ne!(state, address);
    }

    #[test]
    fn test_real_public_keys_are_on_curve() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        assert!(is_on_curve(&key.verifying_key().to_bytes()));
    }

    #[test]
    fn test_compile_orders_accounts() {
        let payer = [1u8; 32];
        let program = [2u8; 32];
        let writable = [3u8; 32];
        let readonly = [4u8; 32];
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::readonly(readonly),
                AccountMeta::writable(writable),
                AccountMeta::signer(payer),
            ],
            data: vec![0xaa],
        };

        let message = Message::compile(&payer, &[ix], [5u8; 32]).unwrap();
        assert_eq!(message.account_keys(), &[payer, writable, readonly, program]);

        let bytes = message.serialize();
        assert_eq!(&bytes[..3], &[1, 0, 2]);
        assert_eq!(bytes[3], 4);
        assert_eq!(&bytes[4..36], &payer);
        assert_eq!(&bytes[132..164], &[5u8; 32]);
        // one instruction: program index 3, accounts [2, 1, 0], data [0xaa]
        assert_eq!(&bytes[164..], &[1, 3, 3, 2, 1, 0, 1, 0xaa]);
        assert_eq!(required_signatures(&bytes).unwrap(), 1);
    }

    #[test]
    fn test_signed_transaction_layout() {
        let wire = signed_transaction(&[1, 2, 3], &[[9u8; 64]]);
        assert_eq!(wire[0], 1);
        assert_eq!(&wire[1..65], &[9u8; 64]);
        assert_eq!(&wire[65..], &[1, 2, 3]);
    }

    #[test]
    fn test_payment_instruction_data() {
        let data = payment_instruction_data("complete_payment", b"otp", None, 1_000);
        assert_eq!(&data[..8], &anchor_discriminator("complete_payment"));
        assert_eq!(&data[8..12], &3u32.to_le_bytes());
        assert_eq!(&data[12..15], b"otp");
        assert_eq!(&data[15..], &1_000u64.to_le_bytes());

        let with_commit =
            payment_instruction_data("complete_payment", b"otp", Some(&[6u8; 32]), 1_000);
        assert_eq!(with_commit.len(), data.len() + 32);
        assert_eq!(&with_commit[15..47], &[6u8; 32]);
        assert_eq!(&with_commit[with_commit.len() - 8..], &1_000u64.to_le_bytes());
    }

    #[test]
    fn test_parse_user_limits() {
        let mut data = vec![0u8; USER_ACCOUNT_LEN];
        data[112..120].copy_from_slice(&5_000u64.to_le_bytes());
        data[120..128].copy_from_slice(&2u64.to_le_bytes());
        data[128..136].copy_from_slice(&10u64.to_le_bytes());

        let limits = parse_user_limits(&data).unwrap();
        assert_eq!(limits.payment_limit, 5_000);
        assert_eq!(limits.tail_update_count, 2);
        assert_eq!(limits.max_tail_updates, 10);

        assert!(matches!(
            parse_user_limits(&data[..144]),
            Err(BlockchainError::DeserializationFailed(_))
        ));
    }
}
