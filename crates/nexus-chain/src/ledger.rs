use async_trait::async_trait;

use crate::{BroadcastError, ChainError, Hash, Pubkey};

#[async_trait]
/// Read access to on-chain state.
pub trait LedgerClient: Send + Sync {
    /// Raw account data, or `None` when the account does not exist.
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ChainError>;

    async fn latest_blockhash(&self) -> Result<Hash, ChainError>;
}

#[async_trait]
/// Submits signed transaction bytes and waits for confirmation.
pub trait Broadcaster: Send + Sync {
    /// Configured route label for logs (`direct`, `relay`, `auto`, ...).
    ///
    /// Implementations that pick a route per call report their policy here
    /// and log the resolved route from `broadcast`.
    fn route(&self) -> &'static str;

    /// Returns the transaction signature once submitted and confirmed.
    async fn broadcast(&self, signed_transaction: &[u8]) -> Result<String, BroadcastError>;
}
