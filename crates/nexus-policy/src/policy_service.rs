use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use nexus_chain::{Broadcaster, TransactionSigner};

use crate::{
    evaluate_policy, load_policy, save_policy, sol_to_lamports, KeyValueStore, PolicyAction,
    PolicyEvaluation, PolicyRecord, PolicySyncResult, PolicyVaultClient, PolicyVaultError,
    Protocol,
};

#[derive(Debug, Clone, PartialEq)]
/// User-edited fields of a policy save.
pub struct SavePolicyInput {
    pub daily_limit_sol: f64,
    pub allowed_protocols: Vec<Protocol>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Public struct `SavePolicyOutcome` used across Nexus components.
pub struct SavePolicyOutcome {
    pub ok: bool,
    pub synced: bool,
    pub error: Option<String>,
    pub signature: Option<String>,
}

#[async_trait]
/// Pushes a saved policy on-chain.
pub trait PolicySync: Send + Sync {
    async fn sync(&self, policy: &PolicyRecord) -> Result<PolicySyncResult, PolicyVaultError>;
}

/// [`PolicySync`] backed by the vault client, a signer and a broadcaster.
pub struct VaultPolicySync {
    client: PolicyVaultClient,
    signer: Arc<dyn TransactionSigner>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl VaultPolicySync {
    pub fn new(
        client: PolicyVaultClient,
        signer: Arc<dyn TransactionSigner>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            client,
            signer,
            broadcaster,
        }
    }
}

#[async_trait]
impl PolicySync for VaultPolicySync {
    async fn sync(&self, policy: &PolicyRecord) -> Result<PolicySyncResult, PolicyVaultError> {
        self.client
            .upsert_policy(policy, self.signer.as_ref(), self.broadcaster.as_ref())
            .await
    }
}

/// Limit is clamped at zero, spent is clamped into `[0, limit]`, protocols
/// are deduplicated in order.
pub fn normalize_policy(current: &PolicyRecord, input: &SavePolicyInput) -> PolicyRecord {
    let daily_limit_lamports = sol_to_lamports(input.daily_limit_sol);
    let mut allowed_protocols: Vec<Protocol> = Vec::with_capacity(input.allowed_protocols.len());
    for protocol in &input.allowed_protocols {
        if !allowed_protocols.contains(protocol) {
            allowed_protocols.push(*protocol);
        }
    }
    PolicyRecord {
        daily_limit_lamports,
        daily_spent_lamports: current.daily_spent_lamports.min(daily_limit_lamports),
        allowed_protocols,
        is_active: input.is_active,
    }
}

/// Local policy state: load, evaluate, save and sync.
pub struct PolicyManager {
    store: Arc<dyn KeyValueStore>,
    sync: Arc<dyn PolicySync>,
    policy: PolicyRecord,
    last_sync_signature: Option<String>,
}

impl PolicyManager {
    pub fn load(store: Arc<dyn KeyValueStore>, sync: Arc<dyn PolicySync>) -> Result<Self> {
        let policy = load_policy(store.as_ref())?;
        Ok(Self {
            store,
            sync,
            policy,
            last_sync_signature: None,
        })
    }

    pub fn policy(&self) -> &PolicyRecord {
        &self.policy
    }

    pub fn last_sync_signature(&self) -> Option<&str> {
        self.last_sync_signature.as_deref()
    }

    pub fn evaluate(&self, action: &PolicyAction) -> PolicyEvaluation {
        evaluate_policy(&self.policy, action)
    }

    /// Persists locally first; a failed on-chain sync keeps the local save and
    /// is reported in the outcome rather than as an error.
    pub async fn save(&mut self, input: &SavePolicyInput) -> Result<SavePolicyOutcome> {
        let normalized = normalize_policy(&self.policy, input);
        save_policy(self.store.as_ref(), &normalized)?;
        self.policy = normalized;

        match self.sync.sync(&self.policy).await {
            Ok(result) => {
                self.last_sync_signature = Some(result.signature.clone());
                Ok(SavePolicyOutcome {
                    ok: true,
                    synced: true,
                    error: None,
                    signature: Some(result.signature),
                })
            }
            Err(error) => {
                tracing::warn!(error = %error, "policy saved locally but on-chain sync failed");
                Ok(SavePolicyOutcome {
                    ok: false,
                    synced: false,
                    error: Some(error.to_string()),
                    signature: None,
                })
            }
        }
    }
}
