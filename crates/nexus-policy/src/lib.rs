//! Spending policy for Nexus: the evaluator that gates agent runs, the local
//! policy store, and the on-chain policy vault codec and client.

mod intent_parser;
mod policy_engine;
mod policy_service;
mod policy_storage;
mod vault_client;
mod vault_codec;

pub use intent_parser::{parse_swap_intent, ParsedSwapIntent};
pub use policy_engine::{
    evaluate_policy, lamports_to_sol, sol_to_lamports, PolicyAction, PolicyEvaluation,
    PolicyRecord, Protocol, DEFAULT_DAILY_LIMIT_LAMPORTS, LAMPORTS_PER_SOL,
};
pub use policy_service::{
    normalize_policy, PolicyManager, PolicySync, SavePolicyInput, SavePolicyOutcome,
    VaultPolicySync,
};
pub use policy_storage::{
    coerce_policy, load_policy, save_policy, FileKeyValueStore, InMemoryKeyValueStore,
    KeyValueStore, POLICY_STORAGE_KEY,
};
pub use vault_client::{
    assemble_policy_update, decode_vault_account, derive_policy_addresses, encode_vault_account,
    initialize_profile_instruction, update_policy_instruction, PolicyAddresses,
    PolicySyncResult, PolicyUpdatePlan, PolicyVaultAccount, PolicyVaultClient, PolicyVaultError,
    INITIALIZE_PROFILE_INSTRUCTION, POLICY_VAULT_ACCOUNT, POLICY_VAULT_SEED, PROFILE_SEED,
    UPDATE_POLICY_INSTRUCTION,
};
pub use vault_codec::{
    decode_policy_payload, encode_policy_payload, encode_policy_payload_versioned,
    PolicyCodecError, CODEC_VERSION_V1, CODEC_VERSION_V2, CURRENT_CODEC_VERSION, MIN_PAYLOAD_LEN,
    V1_PAYLOAD_LEN, V2_MIN_PAYLOAD_LEN,
};
