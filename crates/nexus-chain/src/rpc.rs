use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{BroadcastError, Broadcaster, ChainError, Hash, LedgerClient, Pubkey};

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

#[derive(Debug, Clone)]
/// Public struct `RpcClientConfig` used across Nexus components.
pub struct RpcClientConfig {
    pub endpoint: String,
    /// `processed`, `confirmed` or `finalized`.
    pub commitment: String,
    pub request_timeout_ms: u64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_interval_ms: u64,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RPC_URL.to_string(),
            commitment: "confirmed".to_string(),
            request_timeout_ms: 30_000,
            confirm_timeout_ms: 60_000,
            confirm_poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContextValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct AccountValue {
    data: (String, String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Public struct `SignatureStatus` used across Nexus components.
pub struct SignatureStatus {
    #[serde(default)]
    pub slot: u64,
    #[serde(default)]
    pub confirmation_status: Option<String>,
    #[serde(default)]
    pub err: Option<Value>,
}

/// JSON-RPC client for the ledger node.
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcClientConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, ChainError> {
        let endpoint = config.endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(ChainError::MissingEndpoint);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            config: RpcClientConfig { endpoint, ..config },
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;
        let status = response.status();
        tracing::debug!(method, id, status = status.as_u16(), "ledger rpc response");
        if !status.is_success() {
            return Err(ChainError::HttpStatus {
                method,
                status: status.as_u16(),
            });
        }
        let raw = response.text().await?;
        let envelope: RpcEnvelope<T> =
            serde_json::from_str(&raw).map_err(|error| ChainError::InvalidResponse {
                method,
                detail: error.to_string(),
            })?;
        if let Some(error) = envelope.error {
            return Err(ChainError::Rpc {
                method,
                code: error.code,
                message: error.message,
            });
        }
        envelope.result.ok_or(ChainError::InvalidResponse {
            method,
            detail: "missing result".to_string(),
        })
    }

    pub async fn get_health(&self) -> Result<(), ChainError> {
        let health: String = self.call("getHealth", json!([])).await?;
        if health == "ok" {
            Ok(())
        } else {
            Err(ChainError::InvalidResponse {
                method: "getHealth",
                detail: format!("node reported `{health}`"),
            })
        }
    }

    /// Reachability probe; failures are logged, not returned.
    pub async fn is_healthy(&self) -> bool {
        match self.get_health().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(endpoint = %self.config.endpoint, error = %error, "ledger node unhealthy");
                false
            }
        }
    }

    pub async fn send_transaction(&self, signed_transaction: &[u8]) -> Result<String, ChainError> {
        self.call(
            "sendTransaction",
            json!([
                BASE64.encode(signed_transaction),
                {
                    "encoding": "base64",
                    "preflightCommitment": self.config.commitment,
                }
            ]),
        )
        .await
    }

    pub async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, ChainError> {
        let statuses: ContextValue<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            )
            .await?;
        Ok(statuses.value.into_iter().next().flatten())
    }

    /// Polls the signature until it reaches the configured commitment.
    pub async fn confirm_signature(&self, signature: &str) -> Result<(), BroadcastError> {
        let timeout_ms = self.config.confirm_timeout_ms;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let poll = Duration::from_millis(self.config.confirm_poll_interval_ms.max(1));
        loop {
            if let Some(status) = self.get_signature_status(signature).await? {
                if let Some(error) = status.err.filter(|error| !error.is_null()) {
                    return Err(BroadcastError::TransactionFailed {
                        signature: signature.to_string(),
                        error: error.to_string(),
                    });
                }
                if commitment_reached(
                    status.confirmation_status.as_deref(),
                    &self.config.commitment,
                ) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BroadcastError::ConfirmationTimeout {
                    signature: signature.to_string(),
                    timeout_ms,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn commitment_rank(level: &str) -> u8 {
    match level {
        "finalized" => 2,
        "confirmed" => 1,
        _ => 0,
    }
}

fn commitment_reached(observed: Option<&str>, wanted: &str) -> bool {
    observed.is_some_and(|observed| commitment_rank(observed) >= commitment_rank(wanted))
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ChainError> {
        let info: ContextValue<Option<AccountValue>> = self
            .call(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": self.config.commitment }
                ]),
            )
            .await?;
        let Some(account) = info.value else {
            return Ok(None);
        };
        let (encoded, encoding) = account.data;
        if encoding != "base64" {
            return Err(ChainError::InvalidResponse {
                method: "getAccountInfo",
                detail: format!("unexpected data encoding `{encoding}`"),
            });
        }
        Ok(Some(BASE64.decode(encoded)?))
    }

    async fn latest_blockhash(&self) -> Result<Hash, ChainError> {
        let latest: ContextValue<BlockhashValue> = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": self.config.commitment }]),
            )
            .await?;
        latest.value.blockhash.parse()
    }
}

#[async_trait]
impl Broadcaster for RpcClient {
    fn route(&self) -> &'static str {
        "direct"
    }

    async fn broadcast(&self, signed_transaction: &[u8]) -> Result<String, BroadcastError> {
        let signature = self.send_transaction(signed_transaction).await?;
        tracing::info!(signature = %signature, "transaction submitted to ledger");
        self.confirm_signature(&signature).await?;
        Ok(signature)
    }
}
