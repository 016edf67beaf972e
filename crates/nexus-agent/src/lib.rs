//! Client side of the Nexus agent service.
//!
//! Covers the request/response contract (`/agent/execute`, policy, receipts,
//! onboarding, broadcast relay), the SSE frame parser, and the two stream
//! transports that deliver per-run progress events.
mod client;
mod events;
mod frame_parser;
mod subscription;
mod transport;
mod types;

pub use client::{AgentApiClient, AgentApiConfig};
pub use events::decode_stream_event;
pub use frame_parser::SseFrameParser;
pub use subscription::{
    StreamErrorHandler, StreamEventHandler, StreamGate, StreamHandlers, StreamSubscription,
};
pub use transport::{
    select_stream_transport, HttpStreamTransport, StreamTransport, StreamTransportConfig,
    StreamTransportKind, StreamTransportMode, WebSocketPushTransport,
};
pub use types::{
    AgentRunApi, AgentRunResult, AgentStreamEvent, NexusAgentError, OnboardResponse,
    PolicyRejection, PolicySnapshot, Receipt, SimulationSummary, StartRunResponse, StepRecord,
    StepStatus,
};
