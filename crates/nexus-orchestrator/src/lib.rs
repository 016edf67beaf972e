//! Run lifecycle for Nexus agent runs.
//!
//! [`RunOrchestrator`] drives one intent at a time from start through the
//! progress stream to approval, signing and broadcast. Stale callbacks from
//! superseded runs are discarded by generation. [`RoutedBroadcaster`] picks
//! between direct ledger submission and the agent relay.
mod broadcast;
mod heartbeat;
mod orchestrator;
mod state;

pub use broadcast::{BroadcastRoute, RelayBroadcaster, RoutedBroadcaster};
pub use orchestrator::{ApprovalError, RunOrchestrator};
pub use state::{
    is_still_working_step, still_working_step, RunOrchestratorConfig, RunPhase, RunSnapshot,
    NO_RESULT_MESSAGE, NO_TRANSACTION_MESSAGE, RUN_TIMEOUT_MESSAGE, STILL_WORKING_LABEL,
    STILL_WORKING_NODE, STREAM_FAILED_MESSAGE, WALLET_NOT_CONNECTED_MESSAGE,
};
