use std::time::Duration;

use nexus_agent::{AgentRunResult, StepRecord, StepStatus};

pub const STILL_WORKING_NODE: &str = "heartbeat_status";
pub const STILL_WORKING_LABEL: &str = "Still working...";

pub const WALLET_NOT_CONNECTED_MESSAGE: &str = "Wallet not connected";
pub const RUN_TIMEOUT_MESSAGE: &str = "Agent run timed out. Please retry your intent.";
pub const STREAM_FAILED_MESSAGE: &str = "Agent stream failed. Please retry.";
pub const NO_RESULT_MESSAGE: &str = "Agent run completed without a result. Please retry.";
pub const NO_TRANSACTION_MESSAGE: &str =
    "Agent run completed without a transaction. Please retry.";
pub const START_FAILED_MESSAGE: &str = "Agent run could not be started";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Enumerates supported `RunPhase` values.
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    AwaitingApproval,
    Signing,
    Confirmed,
    Rejected,
    Error,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Signing => "signing",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }

    /// Phases after which the run needs a reset or a new intent.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected | Self::Error)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Observable state of the current run, published after every transition.
pub struct RunSnapshot {
    pub generation: u64,
    pub phase: RunPhase,
    pub run_id: Option<String>,
    pub steps: Vec<StepRecord>,
    pub result: Option<AgentRunResult>,
    pub error: Option<String>,
    pub confirmed_signature: Option<String>,
}

impl RunSnapshot {
    pub fn pending_transaction(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(AgentRunResult::pending_transaction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Timing knobs of the run watchdog.
pub struct RunOrchestratorConfig {
    pub heartbeat_interval: Duration,
    /// Silence after which the "still working" marker is shown.
    pub stall_warning_after: Duration,
    /// Silence after which the run is failed.
    pub timeout_after: Duration,
}

impl Default for RunOrchestratorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            stall_warning_after: Duration::from_secs(8),
            timeout_after: Duration::from_secs(20),
        }
    }
}

pub fn still_working_step() -> StepRecord {
    StepRecord::new(STILL_WORKING_NODE, STILL_WORKING_LABEL, StepStatus::Running)
}

pub fn is_still_working_step(step: &StepRecord) -> bool {
    step.node == STILL_WORKING_NODE && step.label == STILL_WORKING_LABEL
}

pub(crate) fn drop_still_working_steps(steps: &mut Vec<StepRecord>) {
    steps.retain(|step| !is_still_working_step(step));
}
