use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use nexus_agent::AgentApiClient;
use nexus_chain::{BroadcastError, Broadcaster, RpcClient};

/// Submits signed transactions through the agent service's relay endpoint.
#[derive(Debug, Clone)]
pub struct RelayBroadcaster {
    client: Arc<AgentApiClient>,
}

impl RelayBroadcaster {
    pub fn new(client: Arc<AgentApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Broadcaster for RelayBroadcaster {
    fn route(&self) -> &'static str {
        "relay"
    }

    async fn broadcast(&self, signed_transaction: &[u8]) -> Result<String, BroadcastError> {
        let encoded = BASE64.encode(signed_transaction);
        let signature = self
            .client
            .relay_signed_transaction(&encoded)
            .await
            .map_err(|error| BroadcastError::Relay(error.to_string()))?;
        tracing::info!(signature = %signature, "transaction relayed by agent service");
        Ok(signature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Enumerates supported `BroadcastRoute` values.
pub enum BroadcastRoute {
    /// Direct when the ledger node answers its health probe, relay otherwise.
    #[default]
    Auto,
    Direct,
    Relay,
}

impl BroadcastRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Direct => "direct",
            Self::Relay => "relay",
        }
    }
}

impl FromStr for BroadcastRoute {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "direct" => Ok(Self::Direct),
            "relay" => Ok(Self::Relay),
            other => Err(format!(
                "unknown broadcast route `{other}` (expected auto, direct or relay)"
            )),
        }
    }
}

/// Chooses between direct ledger submission and the agent relay.
///
/// The route is settled before anything is sent; a transaction submitted on
/// one route is never re-sent on the other. [`Broadcaster::route`] reports the
/// configured policy (`auto` included); [`RoutedBroadcaster::last_route`]
/// reports where the most recent transaction actually went.
pub struct RoutedBroadcaster {
    direct: Arc<RpcClient>,
    relay: RelayBroadcaster,
    route: BroadcastRoute,
    last_route: Mutex<Option<BroadcastRoute>>,
}

impl RoutedBroadcaster {
    pub fn new(direct: Arc<RpcClient>, relay: RelayBroadcaster, route: BroadcastRoute) -> Self {
        Self {
            direct,
            relay,
            route,
            last_route: Mutex::new(None),
        }
    }

    pub fn configured_route(&self) -> BroadcastRoute {
        self.route
    }

    /// Route used by the latest `broadcast`, `None` before the first one.
    pub fn last_route(&self) -> Option<BroadcastRoute> {
        match self.last_route.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub async fn resolve_route(&self) -> BroadcastRoute {
        match self.route {
            BroadcastRoute::Auto => {
                if self.direct.is_healthy().await {
                    BroadcastRoute::Direct
                } else {
                    BroadcastRoute::Relay
                }
            }
            fixed => fixed,
        }
    }
}

#[async_trait]
impl Broadcaster for RoutedBroadcaster {
    fn route(&self) -> &'static str {
        self.route.as_str()
    }

    async fn broadcast(&self, signed_transaction: &[u8]) -> Result<String, BroadcastError> {
        let route = self.resolve_route().await;
        tracing::info!(
            configured = self.route.as_str(),
            route = route.as_str(),
            "broadcast route resolved"
        );
        match self.last_route.lock() {
            Ok(mut guard) => *guard = Some(route),
            Err(poisoned) => *poisoned.into_inner() = Some(route),
        }
        match route {
            BroadcastRoute::Direct => self.direct.broadcast(signed_transaction).await,
            BroadcastRoute::Relay | BroadcastRoute::Auto => {
                self.relay.broadcast(signed_transaction).await
            }
        }
    }
}

impl std::fmt::Debug for RoutedBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedBroadcaster")
            .field("endpoint", &self.direct.endpoint())
            .field("route", &self.route)
            .finish()
    }
}
