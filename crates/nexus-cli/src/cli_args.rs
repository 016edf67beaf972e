use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::cli_types::{CliBroadcastRoute, CliPolicySource, CliProtocol, CliStreamTransport};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_non_negative_f64(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err("value must be a finite number greater than or equal to 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "nexus",
    about = "Drive Nexus agent runs and manage the on-chain spending policy",
    version
)]
/// Public struct `Cli` used across Nexus components.
pub struct Cli {
    #[arg(
        long = "api-url",
        env = "NEXUS_AGENT_API_URL",
        default_value = "http://127.0.0.1:3000/api",
        global = true,
        help = "Base URL of the agent service"
    )]
    pub api_url: String,

    #[arg(
        long = "api-key",
        env = "NEXUS_API_KEY",
        default_value = "",
        hide_env_values = true,
        global = true,
        help = "Value sent in the x-api-key header"
    )]
    pub api_key: String,

    #[arg(
        long = "ws-url",
        env = "NEXUS_AGENT_WS_URL",
        global = true,
        help = "Optional ws:// or wss:// base for the push stream transport"
    )]
    pub ws_url: Option<String>,

    #[arg(
        long = "stream-transport",
        env = "NEXUS_STREAM_TRANSPORT",
        value_enum,
        default_value = "auto",
        global = true,
        help = "Run progress transport: push when a websocket base is configured, polling otherwise"
    )]
    pub stream_transport: CliStreamTransport,

    #[arg(
        long = "rpc-url",
        env = "NEXUS_RPC_URL",
        default_value = nexus_chain::DEFAULT_RPC_URL,
        global = true,
        help = "Ledger JSON-RPC endpoint"
    )]
    pub rpc_url: String,

    #[arg(
        long = "policy-program-id",
        env = "NEXUS_POLICY_PROGRAM_ID",
        global = true,
        help = "Address of the deployed policy vault program"
    )]
    pub policy_program_id: Option<String>,

    #[arg(
        long,
        env = "NEXUS_KEYPAIR",
        global = true,
        help = "Path to a 64-byte JSON keypair used as the wallet"
    )]
    pub keypair: Option<PathBuf>,

    #[arg(
        long = "policy-store",
        env = "NEXUS_POLICY_STORE",
        default_value = ".nexus/policy-store.json",
        global = true,
        help = "Local key-value file holding the saved policy"
    )]
    pub policy_store: PathBuf,

    #[arg(
        long = "broadcast-route",
        env = "NEXUS_BROADCAST_ROUTE",
        value_enum,
        default_value = "auto",
        global = true,
        help = "Where signed transactions are submitted"
    )]
    pub broadcast_route: CliBroadcastRoute,

    #[arg(
        long = "request-timeout-ms",
        env = "NEXUS_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        global = true,
        help = "Timeout applied to agent service and ledger requests"
    )]
    pub request_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute an intent and follow the run until it settles.
    Run(RunArgs),
    /// Inspect or change the spending policy.
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// Print the 8-byte selector of an instruction or account type.
    Selector(SelectorArgs),
    /// Derive a program address from the owner key and a seed.
    Derive(DeriveArgs),
    /// List receipts recorded by the agent service.
    Receipts(OwnerArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(required = true, num_args = 1.., help = "Intent text, e.g. `swap 0.1 SOL to USDC`")]
    pub intent: Vec<String>,

    #[arg(long = "auto-approve", help = "Sign and broadcast the resulting transaction")]
    pub auto_approve: bool,
}

impl RunArgs {
    pub fn intent_text(&self) -> String {
        self.intent.join(" ")
    }
}

#[derive(Debug, Subcommand)]
pub enum PolicyCommand {
    /// Print the locally saved policy.
    Show,
    /// Save a new policy locally and sync it on-chain.
    Set(PolicySetArgs),
    /// Read the policy vault.
    Fetch(PolicyFetchArgs),
}

#[derive(Debug, Args)]
pub struct PolicySetArgs {
    #[arg(long = "daily-limit-sol", value_parser = parse_non_negative_f64)]
    pub daily_limit_sol: f64,

    #[arg(long = "protocol", value_enum, num_args = 1.., required = true)]
    pub protocols: Vec<CliProtocol>,

    #[arg(long, help = "Save the policy disabled")]
    pub inactive: bool,
}

#[derive(Debug, Args)]
pub struct PolicyFetchArgs {
    #[command(flatten)]
    pub owner: OwnerArgs,

    #[arg(long, value_enum, default_value = "chain")]
    pub source: CliPolicySource,
}

#[derive(Debug, Args)]
pub struct OwnerArgs {
    #[arg(long, help = "Wallet address; defaults to the configured keypair")]
    pub owner: Option<String>,
}

#[derive(Debug, Args)]
pub struct SelectorArgs {
    pub name: String,

    #[arg(long, help = "Print the account discriminator instead")]
    pub account: bool,
}

#[derive(Debug, Args)]
pub struct DeriveArgs {
    #[arg(long)]
    pub owner: String,

    #[arg(long)]
    pub seed: String,

    #[arg(long, help = "Program id; defaults to --policy-program-id")]
    pub program: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, PolicyCommand};
    use crate::cli_types::{CliBroadcastRoute, CliProtocol, CliStreamTransport};

    #[test]
    fn unit_run_joins_intent_words_and_reads_flags() {
        let cli = Cli::try_parse_from([
            "nexus",
            "--stream-transport",
            "polling",
            "run",
            "swap",
            "0.1",
            "SOL",
            "to",
            "USDC",
            "--auto-approve",
        ])
        .expect("parse");

        assert_eq!(cli.stream_transport, CliStreamTransport::Polling);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.auto_approve);
        assert_eq!(args.intent_text(), "swap 0.1 SOL to USDC");
    }

    #[test]
    fn unit_policy_set_accepts_repeated_protocols_and_global_flags() {
        let cli = Cli::try_parse_from([
            "nexus",
            "policy",
            "set",
            "--daily-limit-sol",
            "1.5",
            "--protocol",
            "jupiter",
            "spl-transfer",
            "--inactive",
            "--broadcast-route",
            "relay",
        ])
        .expect("parse");

        assert_eq!(cli.broadcast_route, CliBroadcastRoute::Relay);
        let Command::Policy(PolicyCommand::Set(args)) = cli.command else {
            panic!("expected policy set");
        };
        assert_eq!(args.daily_limit_sol, 1.5);
        assert_eq!(
            args.protocols,
            vec![CliProtocol::Jupiter, CliProtocol::SplTransfer]
        );
        assert!(args.inactive);
    }

    #[test]
    fn regression_negative_limit_and_zero_timeout_are_rejected() {
        assert!(Cli::try_parse_from([
            "nexus",
            "policy",
            "set",
            "--daily-limit-sol",
            "-1",
            "--protocol",
            "jupiter",
        ])
        .is_err());
        assert!(
            Cli::try_parse_from(["nexus", "--request-timeout-ms", "0", "selector", "x"]).is_err()
        );
    }
}
