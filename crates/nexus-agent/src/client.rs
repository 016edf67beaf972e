use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::events::normalize_step_value;
use crate::{
    AgentRunApi, NexusAgentError, OnboardResponse, PolicySnapshot, Receipt, StartRunResponse,
};

pub(crate) const API_KEY_HEADER: &str = "x-api-key";
const REQUEST_ID_HEADER: &str = "x-nexus-request-id";
const DEFAULT_API_BASE: &str = "http://127.0.0.1:3000/api";

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
/// Public struct `AgentApiConfig` used across Nexus components.
pub struct AgentApiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

impl Default for AgentApiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: String::new(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
/// HTTP client for the agent service's request/response endpoints.
pub struct AgentApiClient {
    client: reqwest::Client,
    config: AgentApiConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponseBody {
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    steps: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PolicyResponseBody {
    policy: PolicySnapshot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyUpdateResponseBody {
    unsigned_tx: String,
}

#[derive(Debug, Deserialize)]
struct ReceiptsResponseBody {
    #[serde(default)]
    receipts: Vec<Receipt>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponseBody {
    signature: String,
}

impl AgentApiClient {
    pub fn new(config: AgentApiConfig) -> Result<Self, NexusAgentError> {
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            return Err(NexusAgentError::MissingApiBase);
        }
        Url::parse(&api_base).map_err(|error| {
            NexusAgentError::InvalidEndpoint(format!("{api_base}: {error}"))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.api_key.trim().is_empty() {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(config.api_key.trim())
                    .map_err(|error| NexusAgentError::InvalidHeader(error.to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            client,
            config: AgentApiConfig { api_base, ..config },
        })
    }

    pub fn api_base(&self) -> &str {
        &self.config.api_base
    }

    /// URL of the per-run SSE feed.
    pub fn stream_url(&self, run_id: &str) -> Result<Url, NexusAgentError> {
        endpoint_url(&self.config.api_base, &["agent", run_id, "stream"])
    }

    pub async fn execute(
        &self,
        intent: &str,
        pubkey: &str,
    ) -> Result<StartRunResponse, NexusAgentError> {
        let url = endpoint_url(&self.config.api_base, &["agent", "execute"])?;
        let body: ExecuteResponseBody = self
            .send_json(
                "Agent execute",
                self.client
                    .post(url)
                    .json(&json!({ "intent": intent, "pubkey": pubkey })),
            )
            .await?;
        Ok(StartRunResponse {
            run_id: body.run_id.trim().to_string(),
            steps: body
                .steps
                .into_iter()
                .filter_map(normalize_step_value)
                .collect(),
        })
    }

    /// Relays a signed transaction through the service, which submits and confirms it.
    pub async fn relay_signed_transaction(
        &self,
        signed_tx_base64: &str,
    ) -> Result<String, NexusAgentError> {
        let url = endpoint_url(&self.config.api_base, &["agent", "broadcast"])?;
        let body: BroadcastResponseBody = self
            .send_json(
                "Broadcast relay",
                self.client
                    .post(url)
                    .json(&json!({ "signedTx": signed_tx_base64 })),
            )
            .await?;
        let signature = body.signature.trim().to_string();
        if signature.is_empty() {
            return Err(NexusAgentError::InvalidResponse(
                "broadcast relay returned an empty signature".to_string(),
            ));
        }
        Ok(signature)
    }

    pub async fn fetch_policy(&self, pubkey: &str) -> Result<PolicySnapshot, NexusAgentError> {
        let url = endpoint_url(&self.config.api_base, &["policy"])?;
        let body: PolicyResponseBody = self
            .send_json(
                "Policy fetch",
                self.client.get(url).query(&[("pubkey", pubkey)]),
            )
            .await?;
        Ok(body.policy)
    }

    /// Asks the service to build an unsigned policy update transaction.
    pub async fn request_policy_update(
        &self,
        pubkey: &str,
        daily_max_lamports: u64,
        allowed_protocols: &[String],
        is_active: bool,
    ) -> Result<String, NexusAgentError> {
        let url = endpoint_url(&self.config.api_base, &["policy", "update"])?;
        let body: PolicyUpdateResponseBody = self
            .send_json(
                "Policy update",
                self.client.post(url).json(&json!({
                    "pubkey": pubkey,
                    "dailyMaxLamports": daily_max_lamports,
                    "allowedProtocols": allowed_protocols,
                    "isActive": is_active,
                })),
            )
            .await?;
        Ok(body.unsigned_tx)
    }

    pub async fn fetch_receipts(&self, pubkey: &str) -> Result<Vec<Receipt>, NexusAgentError> {
        let url = endpoint_url(&self.config.api_base, &["receipts"])?;
        let body: ReceiptsResponseBody = self
            .send_json(
                "Receipts fetch",
                self.client.get(url).query(&[("pubkey", pubkey)]),
            )
            .await?;
        Ok(body.receipts)
    }

    pub async fn onboard(&self, pubkey: &str) -> Result<OnboardResponse, NexusAgentError> {
        let url = endpoint_url(&self.config.api_base, &["onboard"])?;
        self.send_json(
            "Onboard",
            self.client.post(url).json(&json!({ "pubkey": pubkey })),
        )
        .await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, NexusAgentError> {
        let request_id = new_request_id();
        let response = request
            .header(REQUEST_ID_HEADER, request_id.as_str())
            .send()
            .await?;
        let status = response.status();
        let raw = response.text().await?;
        tracing::debug!(
            operation,
            request_id = %request_id,
            status = status.as_u16(),
            "agent api response"
        );
        if !status.is_success() {
            return Err(NexusAgentError::HttpStatus {
                operation,
                status: status.as_u16(),
                body: raw,
            });
        }
        serde_json::from_str(&raw).map_err(|error| {
            NexusAgentError::InvalidResponse(format!("{operation} returned malformed JSON: {error}"))
        })
    }
}

#[async_trait]
impl AgentRunApi for AgentApiClient {
    async fn start_run(
        &self,
        intent: &str,
        identity: &str,
    ) -> Result<StartRunResponse, NexusAgentError> {
        self.execute(intent, identity).await
    }
}

/// Joins percent-encoded path segments onto a base URL.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, NexusAgentError> {
    let mut url = Url::parse(base.trim())
        .map_err(|error| NexusAgentError::InvalidEndpoint(format!("{base}: {error}")))?;
    url.path_segments_mut()
        .map_err(|_| NexusAgentError::InvalidEndpoint(format!("{base}: cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("nexus-{millis}-{count}")
}

#[cfg(test)]
mod tests {
    use super::{endpoint_url, new_request_id, AgentApiClient, AgentApiConfig};
    use crate::NexusAgentError;

    #[test]
    fn unit_endpoint_url_encodes_segments_and_tolerates_trailing_slash() {
        let url = endpoint_url("http://127.0.0.1:3000/api/", &["agent", "run 42", "stream"])
            .expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/api/agent/run%2042/stream");
    }

    #[test]
    fn unit_stream_url_is_built_from_api_base() {
        let client = AgentApiClient::new(AgentApiConfig {
            api_base: "http://localhost:3000/api".to_string(),
            ..AgentApiConfig::default()
        })
        .expect("client");
        assert_eq!(
            client.stream_url("run-42").expect("url").as_str(),
            "http://localhost:3000/api/agent/run-42/stream"
        );
    }

    #[test]
    fn regression_blank_api_base_is_rejected() {
        let error = AgentApiClient::new(AgentApiConfig {
            api_base: "  ".to_string(),
            ..AgentApiConfig::default()
        })
        .expect_err("blank base");
        assert!(matches!(error, NexusAgentError::MissingApiBase));
    }

    #[test]
    fn request_ids_are_unique() {
        let first = new_request_id();
        let second = new_request_id();
        assert_ne!(first, second);
        assert!(first.starts_with("nexus-"));
    }
}
