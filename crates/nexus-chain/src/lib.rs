//! Ledger primitives for Nexus: keys, instruction selectors, program-derived
//! addresses, the transaction wire format, signing and JSON-RPC access.

mod error;
mod ledger;
mod pubkey;
mod rpc;
mod selector;
mod signer;
mod transaction;

pub use error::{BroadcastError, ChainError, SignerError};
pub use ledger::{Broadcaster, LedgerClient};
pub use pubkey::{
    create_program_address, find_program_address, Hash, Pubkey, Signature, MAX_SEEDS,
    MAX_SEED_LEN, PUBKEY_LEN,
};
pub use rpc::{RpcClient, RpcClientConfig, SignatureStatus, DEFAULT_RPC_URL};
pub use selector::{account_discriminator, instruction_selector, selector_hex, SELECTOR_LEN};
pub use signer::{KeypairSigner, SigningContext, TransactionSigner};
pub use transaction::{
    AccountMeta, AddressTableLookup, CompiledInstruction, Instruction, Message, MessageHeader,
    MessageVersion, Transaction,
};

/// The system program, owner of plain wallet accounts.
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0; PUBKEY_LEN]);
