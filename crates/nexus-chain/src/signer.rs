use std::path::Path;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};

use crate::{Pubkey, Signature, SignerError, Transaction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Extra constraints passed along with a signing request.
pub struct SigningContext {
    /// Lowest ledger slot the signer may use when evaluating the transaction.
    pub min_context_slot: Option<u64>,
}

#[async_trait]
/// Opaque signing capability, typically backed by a wallet.
pub trait TransactionSigner: Send + Sync {
    /// Identity of the connected wallet, `None` while disconnected.
    fn public_key(&self) -> Option<Pubkey>;

    async fn sign_transaction(
        &self,
        transaction: Transaction,
        context: SigningContext,
    ) -> Result<Transaction, SignerError>;
}

/// Local ed25519 keypair, loaded from the 64-byte JSON array format used by
/// ledger tooling (secret half followed by public half).
pub struct KeypairSigner {
    signing_key: SigningKey,
    public_key: Pubkey,
}

impl KeypairSigner {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let public_key = Pubkey::new_from_array(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let keypair: [u8; 64] = bytes.try_into().map_err(|_| {
            SignerError::InvalidKeypair(format!("expected 64 bytes, got {}", bytes.len()))
        })?;
        let signing_key = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|error| SignerError::InvalidKeypair(error.to_string()))?;
        let public_key = Pubkey::new_from_array(signing_key.verifying_key().to_bytes());
        Ok(Self {
            signing_key,
            public_key,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, SignerError> {
        let bytes: Vec<u8> = serde_json::from_str(raw)
            .map_err(|error| SignerError::InvalidKeypair(error.to_string()))?;
        Self::from_keypair_bytes(&bytes)
    }

    pub fn load(path: &Path) -> Result<Self, SignerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SignerError::KeypairIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn to_json(&self) -> String {
        let bytes = self.signing_key.to_keypair_bytes();
        serde_json::Value::from(bytes.to_vec()).to_string()
    }

    pub fn pubkey(&self) -> Pubkey {
        self.public_key
    }

    pub fn sign_message(&self, message: &[u8]) -> Signature {
        Signature::new_from_array(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn public_key(&self) -> Option<Pubkey> {
        Some(self.public_key)
    }

    async fn sign_transaction(
        &self,
        mut transaction: Transaction,
        context: SigningContext,
    ) -> Result<Transaction, SignerError> {
        if !transaction.message.signer_keys().contains(&self.public_key) {
            return Err(SignerError::NotARequiredSigner(self.public_key.to_string()));
        }
        tracing::debug!(
            signer = %self.public_key,
            min_context_slot = ?context.min_context_slot,
            "signing transaction with local keypair"
        );
        let signature = self.sign_message(&transaction.message_bytes()?);
        transaction.set_signature(&self.public_key, signature)?;
        Ok(transaction)
    }
}
