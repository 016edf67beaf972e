use std::sync::Arc;

use nexus_chain::{
    account_discriminator, find_program_address, instruction_selector, AccountMeta,
    BroadcastError, Broadcaster, ChainError, Hash, Instruction, LedgerClient, Message, Pubkey,
    SignerError, SigningContext, Transaction, TransactionSigner, PUBKEY_LEN, SELECTOR_LEN,
    SYSTEM_PROGRAM_ID,
};
use thiserror::Error;

use crate::{decode_policy_payload, encode_policy_payload, PolicyCodecError, PolicyRecord};

pub const PROFILE_SEED: &[u8] = b"profile";
pub const POLICY_VAULT_SEED: &[u8] = b"policy_vault";
pub const INITIALIZE_PROFILE_INSTRUCTION: &str = "initialize_profile";
pub const UPDATE_POLICY_INSTRUCTION: &str = "update_policy";
pub const POLICY_VAULT_ACCOUNT: &str = "PolicyVault";

#[derive(Debug, Error)]
/// Enumerates supported `PolicyVaultError` values.
pub enum PolicyVaultError {
    #[error("PolicyVault program is not configured. Set NEXUS_POLICY_PROGRAM_ID once the program is deployed.")]
    NotConfigured,
    #[error("invalid PolicyVault program id: {0}")]
    InvalidProgramId(ChainError),
    #[error("Wallet not connected")]
    NoIdentity,
    #[error("policy vault account data does not carry the PolicyVault discriminator")]
    DiscriminatorMismatch,
    #[error("policy vault account data is too short: {0} bytes")]
    AccountTooShort(usize),
    #[error(transparent)]
    Codec(#[from] PolicyCodecError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Decoded contents of a policy vault account.
pub struct PolicyVaultAccount {
    pub owner: Pubkey,
    pub policy: PolicyRecord,
}

const ACCOUNT_HEADER_LEN: usize = SELECTOR_LEN + PUBKEY_LEN;

/// Account data is `discriminator | owner | policy payload`.
pub fn decode_vault_account(data: &[u8]) -> Result<PolicyVaultAccount, PolicyVaultError> {
    if data.len() < ACCOUNT_HEADER_LEN {
        return Err(PolicyVaultError::AccountTooShort(data.len()));
    }
    if data[..SELECTOR_LEN] != account_discriminator(POLICY_VAULT_ACCOUNT) {
        return Err(PolicyVaultError::DiscriminatorMismatch);
    }
    let owner = Pubkey::try_from_slice(&data[SELECTOR_LEN..ACCOUNT_HEADER_LEN])?;
    let policy = decode_policy_payload(&data[ACCOUNT_HEADER_LEN..])?;
    Ok(PolicyVaultAccount { owner, policy })
}

pub fn encode_vault_account(account: &PolicyVaultAccount) -> Vec<u8> {
    let mut data = account_discriminator(POLICY_VAULT_ACCOUNT).to_vec();
    data.extend_from_slice(account.owner.as_bytes());
    data.extend_from_slice(&encode_policy_payload(&account.policy));
    data
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Derived accounts a policy update touches.
pub struct PolicyAddresses {
    pub profile: Pubkey,
    pub profile_bump: u8,
    pub vault: Pubkey,
    pub vault_bump: u8,
}

pub fn derive_policy_addresses(
    program_id: &Pubkey,
    owner: &Pubkey,
) -> Result<PolicyAddresses, ChainError> {
    let (profile, profile_bump) =
        find_program_address(&[PROFILE_SEED, owner.as_bytes()], program_id)?;
    let (vault, vault_bump) =
        find_program_address(&[POLICY_VAULT_SEED, owner.as_bytes()], program_id)?;
    Ok(PolicyAddresses {
        profile,
        profile_bump,
        vault,
        vault_bump,
    })
}

pub fn initialize_profile_instruction(
    program_id: &Pubkey,
    owner: &Pubkey,
    addresses: &PolicyAddresses,
) -> Instruction {
    Instruction::new(
        *program_id,
        instruction_selector(INITIALIZE_PROFILE_INSTRUCTION).to_vec(),
        vec![
            AccountMeta::new(*owner, true),
            AccountMeta::new(addresses.profile, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
    )
}

pub fn update_policy_instruction(
    program_id: &Pubkey,
    owner: &Pubkey,
    addresses: &PolicyAddresses,
    policy: &PolicyRecord,
) -> Instruction {
    let mut data = instruction_selector(UPDATE_POLICY_INSTRUCTION).to_vec();
    data.extend_from_slice(&encode_policy_payload(policy));
    Instruction::new(
        *program_id,
        data,
        vec![
            AccountMeta::new(*owner, true),
            AccountMeta::new_readonly(addresses.profile, false),
            AccountMeta::new(addresses.vault, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
    )
}

/// Instruction list for a policy update, prefixed with profile creation when
/// the profile account does not exist yet.
pub fn assemble_policy_update(
    program_id: &Pubkey,
    owner: &Pubkey,
    addresses: &PolicyAddresses,
    profile_exists: bool,
    policy: &PolicyRecord,
) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(2);
    if !profile_exists {
        instructions.push(initialize_profile_instruction(program_id, owner, addresses));
    }
    instructions.push(update_policy_instruction(program_id, owner, addresses, policy));
    instructions
}

#[derive(Debug, Clone)]
/// Unsigned policy update, ready for the signer.
pub struct PolicyUpdatePlan {
    pub transaction: Transaction,
    pub addresses: PolicyAddresses,
    pub initializes_profile: bool,
    pub recent_blockhash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `PolicySyncResult` used across Nexus components.
pub struct PolicySyncResult {
    pub signature: String,
    pub vault: Pubkey,
}

/// Reads and writes the on-chain policy vault.
#[derive(Clone)]
pub struct PolicyVaultClient {
    program_id: Option<Pubkey>,
    ledger: Arc<dyn LedgerClient>,
}

impl std::fmt::Debug for PolicyVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyVaultClient")
            .field("program_id", &self.program_id)
            .finish_non_exhaustive()
    }
}

impl PolicyVaultClient {
    /// A blank or missing program id yields a client whose every operation
    /// fails with [`PolicyVaultError::NotConfigured`].
    pub fn new(
        program_id: Option<&str>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Result<Self, PolicyVaultError> {
        let program_id = match program_id.map(str::trim).filter(|value| !value.is_empty()) {
            Some(raw) => Some(
                raw.parse::<Pubkey>()
                    .map_err(PolicyVaultError::InvalidProgramId)?,
            ),
            None => None,
        };
        Ok(Self { program_id, ledger })
    }

    pub fn program_id(&self) -> Result<Pubkey, PolicyVaultError> {
        self.program_id.ok_or(PolicyVaultError::NotConfigured)
    }

    pub fn is_configured(&self) -> bool {
        self.program_id.is_some()
    }

    pub fn addresses_for(&self, owner: &Pubkey) -> Result<PolicyAddresses, PolicyVaultError> {
        Ok(derive_policy_addresses(&self.program_id()?, owner)?)
    }

    pub async fn fetch_policy(
        &self,
        owner: &Pubkey,
    ) -> Result<Option<PolicyVaultAccount>, PolicyVaultError> {
        let addresses = self.addresses_for(owner)?;
        match self.ledger.get_account_data(&addresses.vault).await? {
            Some(data) => Ok(Some(decode_vault_account(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn build_update_transaction(
        &self,
        owner: &Pubkey,
        policy: &PolicyRecord,
    ) -> Result<PolicyUpdatePlan, PolicyVaultError> {
        let program_id = self.program_id()?;
        let addresses = derive_policy_addresses(&program_id, owner)?;
        let profile_exists = self
            .ledger
            .get_account_data(&addresses.profile)
            .await?
            .is_some();
        let recent_blockhash = self.ledger.latest_blockhash().await?;

        let instructions =
            assemble_policy_update(&program_id, owner, &addresses, profile_exists, policy);
        let message = Message::compile(owner, &instructions, recent_blockhash)?;
        tracing::debug!(
            owner = %owner,
            vault = %addresses.vault,
            initializes_profile = !profile_exists,
            "policy update transaction assembled"
        );
        Ok(PolicyUpdatePlan {
            transaction: Transaction::new_unsigned(message),
            addresses,
            initializes_profile: !profile_exists,
            recent_blockhash,
        })
    }

    /// Builds, signs and broadcasts a policy update for the signer's wallet.
    pub async fn upsert_policy(
        &self,
        policy: &PolicyRecord,
        signer: &dyn TransactionSigner,
        broadcaster: &dyn Broadcaster,
    ) -> Result<PolicySyncResult, PolicyVaultError> {
        self.program_id()?;
        let owner = signer.public_key().ok_or(PolicyVaultError::NoIdentity)?;
        let plan = self.build_update_transaction(&owner, policy).await?;
        let signed = signer
            .sign_transaction(plan.transaction, SigningContext::default())
            .await?;
        let signature = broadcaster.broadcast(&signed.to_bytes()?).await?;
        tracing::info!(
            signature = %signature,
            route = broadcaster.route(),
            vault = %plan.addresses.vault,
            "policy vault updated"
        );
        Ok(PolicySyncResult {
            signature,
            vault: plan.addresses.vault,
        })
    }
}
