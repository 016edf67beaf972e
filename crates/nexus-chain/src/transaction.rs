//! Instruction compilation and the ledger's transaction wire format.
//!
//! A transaction is `compact-u16 signature count | 64-byte signatures |
//! message`. Messages come in the legacy layout and the versioned `v0`
//! layout, which is prefixed with `0x80` and followed by address-table
//! lookups.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};

use crate::{ChainError, Hash, Pubkey, Signature, PUBKEY_LEN};

const VERSION_PREFIX: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `AccountMeta` used across Nexus components.
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One program invocation before account indexes are assigned.
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn new(program_id: Pubkey, data: Vec<u8>, accounts: Vec<AccountMeta>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Public struct `MessageHeader` used across Nexus components.
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `CompiledInstruction` used across Nexus components.
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `AddressTableLookup` used across Nexus components.
pub struct AddressTableLookup {
    pub account_key: Pubkey,
    pub writable_indexes: Vec<u8>,
    pub readonly_indexes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Enumerates supported `MessageVersion` values.
pub enum MessageVersion {
    #[default]
    Legacy,
    V0,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The signed portion of a transaction.
pub struct Message {
    pub version: MessageVersion,
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
    /// Always empty for legacy messages.
    pub address_table_lookups: Vec<AddressTableLookup>,
}

#[derive(Clone, Copy)]
struct KeyEntry {
    pubkey: Pubkey,
    is_signer: bool,
    is_writable: bool,
}

impl Message {
    /// Compiles instructions into a legacy message with `payer` as the fee payer.
    ///
    /// Keys are ordered writable signers, readonly signers, writable
    /// non-signers, readonly non-signers; the payer is always index 0.
    pub fn compile(
        payer: &Pubkey,
        instructions: &[Instruction],
        recent_blockhash: Hash,
    ) -> Result<Self, ChainError> {
        let mut entries: Vec<KeyEntry> = vec![KeyEntry {
            pubkey: *payer,
            is_signer: true,
            is_writable: true,
        }];
        let mut upsert = |pubkey: Pubkey, is_signer: bool, is_writable: bool| {
            if let Some(entry) = entries.iter_mut().find(|entry| entry.pubkey == pubkey) {
                entry.is_signer |= is_signer;
                entry.is_writable |= is_writable;
            } else {
                entries.push(KeyEntry {
                    pubkey,
                    is_signer,
                    is_writable,
                });
            }
        };
        for instruction in instructions {
            for meta in &instruction.accounts {
                upsert(meta.pubkey, meta.is_signer, meta.is_writable);
            }
            upsert(instruction.program_id, false, false);
        }
        entries.sort_by_key(|entry| (!entry.is_signer, !entry.is_writable));

        if entries.len() > usize::from(u8::MAX) + 1 {
            return Err(ChainError::TooManyAccounts);
        }
        let count = |predicate: fn(&KeyEntry) -> bool| -> Result<u8, ChainError> {
            u8::try_from(entries.iter().filter(|entry| predicate(entry)).count())
                .map_err(|_| ChainError::TooManyAccounts)
        };
        let header = MessageHeader {
            num_required_signatures: count(|entry| entry.is_signer)?,
            num_readonly_signed_accounts: count(|entry| entry.is_signer && !entry.is_writable)?,
            num_readonly_unsigned_accounts: count(|entry| {
                !entry.is_signer && !entry.is_writable
            })?,
        };
        let account_keys: Vec<Pubkey> = entries.iter().map(|entry| entry.pubkey).collect();

        let index_of = |pubkey: &Pubkey| -> Result<u8, ChainError> {
            account_keys
                .iter()
                .position(|key| key == pubkey)
                .and_then(|index| u8::try_from(index).ok())
                .ok_or(ChainError::TooManyAccounts)
        };
        let instructions = instructions
            .iter()
            .map(|instruction| {
                Ok(CompiledInstruction {
                    program_id_index: index_of(&instruction.program_id)?,
                    accounts: instruction
                        .accounts
                        .iter()
                        .map(|meta| index_of(&meta.pubkey))
                        .collect::<Result<Vec<_>, _>>()?,
                    data: instruction.data.clone(),
                })
            })
            .collect::<Result<Vec<_>, ChainError>>()?;

        Ok(Self {
            version: MessageVersion::Legacy,
            header,
            account_keys,
            recent_blockhash,
            instructions,
            address_table_lookups: Vec::new(),
        })
    }

    /// Same key layout as [`Message::compile`], emitted in the `v0` format
    /// without address-table lookups.
    pub fn compile_v0(
        payer: &Pubkey,
        instructions: &[Instruction],
        recent_blockhash: Hash,
    ) -> Result<Self, ChainError> {
        let mut message = Self::compile(payer, instructions, recent_blockhash)?;
        message.version = MessageVersion::V0;
        Ok(message)
    }

    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.account_keys.first()
    }

    pub fn signer_keys(&self) -> &[Pubkey] {
        let signers = usize::from(self.header.num_required_signatures).min(self.account_keys.len());
        &self.account_keys[..signers]
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signers = usize::from(self.header.num_required_signatures);
        if index < signers {
            return index < signers - usize::from(self.header.num_readonly_signed_accounts);
        }
        let unsigned_writable = self
            .account_keys
            .len()
            .saturating_sub(signers)
            .saturating_sub(usize::from(self.header.num_readonly_unsigned_accounts));
        index < signers + unsigned_writable
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ChainError> {
        let mut out = Vec::with_capacity(256);
        if self.version == MessageVersion::V0 {
            out.push(VERSION_PREFIX);
        }
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed_accounts);
        out.push(self.header.num_readonly_unsigned_accounts);

        write_compact_len(&mut out, self.account_keys.len())?;
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(self.recent_blockhash.as_bytes());

        write_compact_len(&mut out, self.instructions.len())?;
        for instruction in &self.instructions {
            out.push(instruction.program_id_index);
            write_compact_bytes(&mut out, &instruction.accounts)?;
            write_compact_bytes(&mut out, &instruction.data)?;
        }

        if self.version == MessageVersion::V0 {
            write_compact_len(&mut out, self.address_table_lookups.len())?;
            for lookup in &self.address_table_lookups {
                out.extend_from_slice(lookup.account_key.as_bytes());
                write_compact_bytes(&mut out, &lookup.writable_indexes)?;
                write_compact_bytes(&mut out, &lookup.readonly_indexes)?;
            }
        } else if !self.address_table_lookups.is_empty() {
            return Err(ChainError::MalformedTransaction(
                "legacy messages cannot carry address table lookups".to_string(),
            ));
        }
        Ok(out)
    }

    fn read(reader: &mut WireReader<'_>) -> Result<Self, ChainError> {
        let first = reader.u8()?;
        let (version, num_required_signatures) = if first & VERSION_PREFIX != 0 {
            let version = first & !VERSION_PREFIX;
            if version != 0 {
                return Err(ChainError::UnsupportedMessageVersion(version));
            }
            (MessageVersion::V0, reader.u8()?)
        } else {
            (MessageVersion::Legacy, first)
        };
        let header = MessageHeader {
            num_required_signatures,
            num_readonly_signed_accounts: reader.u8()?,
            num_readonly_unsigned_accounts: reader.u8()?,
        };

        let key_count = reader.compact_len()?;
        let mut account_keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            account_keys.push(reader.pubkey()?);
        }
        let recent_blockhash = Hash::new_from_array(reader.array32()?);

        let instruction_count = reader.compact_len()?;
        let mut instructions = Vec::with_capacity(instruction_count);
        for _ in 0..instruction_count {
            instructions.push(CompiledInstruction {
                program_id_index: reader.u8()?,
                accounts: reader.compact_bytes()?,
                data: reader.compact_bytes()?,
            });
        }

        let mut address_table_lookups = Vec::new();
        if version == MessageVersion::V0 {
            let lookup_count = reader.compact_len()?;
            for _ in 0..lookup_count {
                address_table_lookups.push(AddressTableLookup {
                    account_key: reader.pubkey()?,
                    writable_indexes: reader.compact_bytes()?,
                    readonly_indexes: reader.compact_bytes()?,
                });
            }
        }

        Ok(Self {
            version,
            header,
            account_keys,
            recent_blockhash,
            instructions,
            address_table_lookups,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A message plus one signature slot per required signer.
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    pub fn new_unsigned(message: Message) -> Self {
        let slots = usize::from(message.header.num_required_signatures);
        Self {
            signatures: vec![Signature::default(); slots],
            message,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let mut reader = WireReader::new(bytes);
        let signature_count = reader.compact_len()?;
        let mut signatures = Vec::with_capacity(signature_count);
        for _ in 0..signature_count {
            let raw: [u8; Signature::LEN] = reader
                .take(Signature::LEN)?
                .try_into()
                .map_err(|_| ChainError::MalformedTransaction("short signature".to_string()))?;
            signatures.push(Signature::new_from_array(raw));
        }
        let message = Message::read(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(ChainError::MalformedTransaction(format!(
                "{} trailing bytes after message",
                reader.remaining()
            )));
        }
        if signatures.len() != usize::from(message.header.num_required_signatures) {
            return Err(ChainError::MalformedTransaction(format!(
                "{} signature slots for {} required signers",
                signatures.len(),
                message.header.num_required_signatures
            )));
        }
        Ok(Self {
            signatures,
            message,
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, ChainError> {
        let bytes = BASE64.decode(encoded.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ChainError> {
        let message = self.message.serialize()?;
        let mut out = Vec::with_capacity(1 + self.signatures.len() * Signature::LEN + message.len());
        write_compact_len(&mut out, self.signatures.len())?;
        for signature in &self.signatures {
            out.extend_from_slice(signature.as_bytes());
        }
        out.extend_from_slice(&message);
        Ok(out)
    }

    pub fn to_base64(&self) -> Result<String, ChainError> {
        Ok(BASE64.encode(self.to_bytes()?))
    }

    pub fn message_bytes(&self) -> Result<Vec<u8>, ChainError> {
        self.message.serialize()
    }

    /// Places `signature` in the slot belonging to `signer`.
    pub fn set_signature(&mut self, signer: &Pubkey, signature: Signature) -> Result<(), ChainError> {
        let index = self
            .message
            .signer_keys()
            .iter()
            .position(|key| key == signer)
            .ok_or_else(|| {
                ChainError::MalformedTransaction(format!("{signer} is not a required signer"))
            })?;
        let slot = self.signatures.get_mut(index).ok_or_else(|| {
            ChainError::MalformedTransaction(format!("missing signature slot {index}"))
        })?;
        *slot = signature;
        Ok(())
    }

    pub fn is_fully_signed(&self) -> bool {
        !self.signatures.is_empty() && self.signatures.iter().all(|slot| !slot.is_empty_slot())
    }

    /// The fee payer's signature, which doubles as the transaction id.
    pub fn primary_signature(&self) -> Option<Signature> {
        self.signatures
            .first()
            .copied()
            .filter(|signature| !signature.is_empty_slot())
    }

    /// Checks every filled slot against its signer key.
    pub fn verify_signatures(&self) -> Result<bool, ChainError> {
        let message = self.message_bytes()?;
        for (signature, key) in self.signatures.iter().zip(self.message.signer_keys()) {
            if signature.is_empty_slot() {
                return Ok(false);
            }
            let Ok(verifying_key) = VerifyingKey::from_bytes(key.as_bytes()) else {
                return Ok(false);
            };
            let signature = DalekSignature::from_bytes(signature.as_bytes());
            if verifying_key.verify(&message, &signature).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn write_compact_len(out: &mut Vec<u8>, len: usize) -> Result<(), ChainError> {
    let mut value = u16::try_from(len).map_err(|_| {
        ChainError::MalformedTransaction(format!("length {len} exceeds compact-u16"))
    })?;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            return Ok(());
        }
    }
}

fn write_compact_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ChainError> {
    write_compact_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

struct WireReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ChainError> {
        if self.remaining() < len {
            return Err(ChainError::MalformedTransaction(format!(
                "needed {len} bytes at offset {}, {} left",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ChainError> {
        Ok(self.take(1)?[0])
    }

    fn array32(&mut self) -> Result<[u8; PUBKEY_LEN], ChainError> {
        self.take(PUBKEY_LEN)?
            .try_into()
            .map_err(|_| ChainError::MalformedTransaction("short key".to_string()))
    }

    fn pubkey(&mut self) -> Result<Pubkey, ChainError> {
        Ok(Pubkey::new_from_array(self.array32()?))
    }

    fn compact_len(&mut self) -> Result<usize, ChainError> {
        let mut value: u32 = 0;
        for position in 0..3 {
            let byte = self.u8()?;
            value |= u32::from(byte & 0x7f) << (7 * position);
            if byte & 0x80 == 0 {
                return u16::try_from(value).map(usize::from).map_err(|_| {
                    ChainError::MalformedTransaction("compact-u16 overflow".to_string())
                });
            }
        }
        Err(ChainError::MalformedTransaction(
            "compact-u16 longer than 3 bytes".to_string(),
        ))
    }

    fn compact_bytes(&mut self) -> Result<Vec<u8>, ChainError> {
        let len = self.compact_len()?;
        Ok(self.take(len)?.to_vec())
    }
}
