use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nexus_agent::{
    select_stream_transport, AgentApiClient, AgentApiConfig, StreamTransport,
    StreamTransportConfig,
};
use nexus_chain::{
    KeypairSigner, Pubkey, RpcClient, RpcClientConfig, SignerError, SigningContext, Transaction,
    TransactionSigner,
};
use nexus_orchestrator::{RelayBroadcaster, RoutedBroadcaster};
use nexus_policy::{FileKeyValueStore, PolicyVaultClient};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::Cli;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Stand-in signer used when no keypair is configured.
pub(crate) struct NoWallet;

#[async_trait]
impl TransactionSigner for NoWallet {
    fn public_key(&self) -> Option<Pubkey> {
        None
    }

    async fn sign_transaction(
        &self,
        _transaction: Transaction,
        _context: SigningContext,
    ) -> Result<Transaction, SignerError> {
        Err(SignerError::NoIdentity)
    }
}

/// Clients and capabilities assembled from the command line.
pub(crate) struct NexusContext {
    pub agent: Arc<AgentApiClient>,
    pub rpc: Arc<RpcClient>,
    pub signer: Arc<dyn TransactionSigner>,
    pub vault: PolicyVaultClient,
    pub store: Arc<FileKeyValueStore>,
}

impl NexusContext {
    pub(crate) fn from_cli(cli: &Cli) -> Result<Self> {
        let agent = AgentApiClient::new(AgentApiConfig {
            api_base: cli.api_url.clone(),
            api_key: cli.api_key.clone(),
            request_timeout_ms: cli.request_timeout_ms,
        })
        .context("failed to configure agent service client")?;
        let rpc = Arc::new(
            RpcClient::new(RpcClientConfig {
                endpoint: cli.rpc_url.clone(),
                request_timeout_ms: cli.request_timeout_ms,
                ..RpcClientConfig::default()
            })
            .context("failed to configure ledger RPC client")?,
        );
        let signer: Arc<dyn TransactionSigner> = match &cli.keypair {
            Some(path) => Arc::new(
                KeypairSigner::load(path)
                    .with_context(|| format!("failed to load keypair {}", path.display()))?,
            ),
            None => Arc::new(NoWallet),
        };
        let vault = PolicyVaultClient::new(cli.policy_program_id.as_deref(), rpc.clone())
            .context("invalid policy program id")?;
        Ok(Self {
            agent: Arc::new(agent),
            rpc,
            signer,
            vault,
            store: Arc::new(FileKeyValueStore::new(&cli.policy_store)),
        })
    }

    pub(crate) fn stream_transport(&self, cli: &Cli) -> Result<Arc<dyn StreamTransport>> {
        select_stream_transport(&StreamTransportConfig {
            api_base: cli.api_url.clone(),
            api_key: cli.api_key.clone(),
            push_base: cli.ws_url.clone(),
            mode: cli.stream_transport.into(),
            ..StreamTransportConfig::default()
        })
        .context("failed to configure agent stream transport")
    }

    pub(crate) fn broadcaster(&self, cli: &Cli) -> Arc<RoutedBroadcaster> {
        Arc::new(RoutedBroadcaster::new(
            self.rpc.clone(),
            RelayBroadcaster::new(self.agent.clone()),
            cli.broadcast_route.into(),
        ))
    }

    /// Explicit `--owner` first, then the configured wallet.
    pub(crate) fn resolve_owner(&self, explicit: Option<&str>) -> Result<Pubkey> {
        match explicit.map(str::trim).filter(|value| !value.is_empty()) {
            Some(raw) => raw
                .parse::<Pubkey>()
                .with_context(|| format!("invalid owner address `{raw}`")),
            None => self
                .signer
                .public_key()
                .context("no owner given and no keypair configured (set NEXUS_KEYPAIR or --owner)"),
        }
    }
}
