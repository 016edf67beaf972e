use clap::ValueEnum;
use nexus_agent::StreamTransportMode;
use nexus_orchestrator::BroadcastRoute;
use nexus_policy::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliStreamTransport {
    Auto,
    Push,
    Polling,
}

impl From<CliStreamTransport> for StreamTransportMode {
    fn from(value: CliStreamTransport) -> Self {
        match value {
            CliStreamTransport::Auto => StreamTransportMode::Auto,
            CliStreamTransport::Push => StreamTransportMode::Push,
            CliStreamTransport::Polling => StreamTransportMode::Polling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliBroadcastRoute {
    Auto,
    Direct,
    Relay,
}

impl From<CliBroadcastRoute> for BroadcastRoute {
    fn from(value: CliBroadcastRoute) -> Self {
        match value {
            CliBroadcastRoute::Auto => BroadcastRoute::Auto,
            CliBroadcastRoute::Direct => BroadcastRoute::Direct,
            CliBroadcastRoute::Relay => BroadcastRoute::Relay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliProtocol {
    Jupiter,
    SplTransfer,
}

impl From<CliProtocol> for Protocol {
    fn from(value: CliProtocol) -> Self {
        match value {
            CliProtocol::Jupiter => Protocol::Jupiter,
            CliProtocol::SplTransfer => Protocol::SplTransfer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliPolicySource {
    /// Decode the policy vault account from the ledger.
    Chain,
    /// Ask the agent service for its view of the vault.
    Agent,
}
