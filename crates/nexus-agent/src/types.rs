use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", from = "String")]
/// Enumerates supported `StepStatus` values.
pub enum StepStatus {
    #[default]
    Running,
    Success,
    Rejected,
}

impl From<String> for StepStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "done" => Self::Success,
            "rejected" | "failed" | "error" => Self::Rejected,
            _ => Self::Running,
        }
    }
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One visible plan step, always in the flat canonical shape.
pub struct StepRecord {
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl StepRecord {
    pub fn new(node: impl Into<String>, label: impl Into<String>, status: StepStatus) -> Self {
        Self {
            node: node.into(),
            label: label.into(),
            status,
            payload: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Server-side policy verdict attached to a terminal run result.
pub struct PolicyRejection {
    pub reason: String,
    #[serde(default)]
    pub policy_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Public struct `SimulationSummary` used across Nexus components.
pub struct SimulationSummary {
    #[serde(default)]
    pub fee: f64,
    #[serde(default)]
    pub out_amount: f64,
    #[serde(default)]
    pub price_impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
/// Terminal payload carried by a `complete` event.
pub struct AgentRunResult {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<PolicyRejection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationSummary>,
}

impl AgentRunResult {
    /// Returns the unsigned transaction when one is present and non-blank.
    pub fn pending_transaction(&self) -> Option<&str> {
        self.unsigned_tx
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Normalized event delivered by every stream transport.
pub enum AgentStreamEvent {
    Step(StepRecord),
    Heartbeat,
    Complete { result: Option<AgentRunResult> },
    Error { message: Option<String> },
}

impl AgentStreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Heartbeat => "heartbeat",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Response of the synchronous run start call.
pub struct StartRunResponse {
    pub run_id: String,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
/// Policy vault view served by the agent service, including housekeeping fields.
pub struct PolicySnapshot {
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub daily_max_lamports: u64,
    #[serde(default)]
    pub current_spend: u64,
    #[serde(default)]
    pub last_reset_ts: i64,
    #[serde(default)]
    pub allowed_protocols: Vec<String>,
    #[serde(default)]
    pub next_receipt_id: u64,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
/// Public struct `Receipt` used across Nexus components.
pub struct Receipt {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub agent_profile: String,
    #[serde(default)]
    pub seeker_id: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub amount_lamports: u64,
    #[serde(default)]
    pub tx_signature: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
/// Public struct `OnboardResponse` used across Nexus components.
pub struct OnboardResponse {
    #[serde(default)]
    pub already_onboarded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboard_tx: Option<String>,
}

#[derive(Debug, Error)]
/// Enumerates supported `NexusAgentError` values.
pub enum NexusAgentError {
    #[error("agent API base URL is not configured")]
    MissingApiBase,
    #[error("push stream transport selected but no websocket endpoint is configured")]
    MissingPushEndpoint,
    #[error("invalid agent endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid API key header: {0}")]
    InvalidHeader(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} failed: {status}")]
    HttpStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid SSE payload: {0}")]
    InvalidStreamPayload(String),
    #[error("Agent stream disconnected")]
    StreamDisconnected,
    #[error("Agent stream failed: {0}")]
    StreamStatus(u16),
    #[error("Agent stream websocket error: {0}")]
    WebSocket(String),
    #[error("stream transport requires an active Tokio runtime")]
    NoRuntime,
}

#[async_trait]
/// Trait contract for starting an agent run.
pub trait AgentRunApi: Send + Sync {
    async fn start_run(
        &self,
        intent: &str,
        identity: &str,
    ) -> Result<StartRunResponse, NexusAgentError>;
}
