use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, tungstenite};

use crate::client::{endpoint_url, API_KEY_HEADER};
use crate::{NexusAgentError, SseFrameParser, StreamGate, StreamHandlers, StreamSubscription};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `StreamTransportKind` values.
pub enum StreamTransportKind {
    Push,
    Polling,
}

impl StreamTransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Polling => "polling",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Enumerates supported `StreamTransportMode` values.
pub enum StreamTransportMode {
    #[default]
    Auto,
    Push,
    Polling,
}

#[derive(Debug, Clone)]
/// Public struct `StreamTransportConfig` used across Nexus components.
pub struct StreamTransportConfig {
    pub api_base: String,
    pub api_key: String,
    /// Base of the websocket push endpoint (`ws://` or `wss://`), when the service offers one.
    pub push_base: Option<String>,
    pub connect_timeout_ms: u64,
    pub mode: StreamTransportMode,
}

impl Default for StreamTransportConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            push_base: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            mode: StreamTransportMode::Auto,
        }
    }
}

impl StreamTransportConfig {
    fn usable_push_base(&self) -> Option<&str> {
        self.push_base
            .as_deref()
            .map(str::trim)
            .filter(|base| base.starts_with("ws://") || base.starts_with("wss://"))
    }
}

/// Opens a per-run event subscription.
///
/// Implementations must return immediately; events are delivered from a
/// background task through the handlers until the returned subscription is
/// closed.
pub trait StreamTransport: Send + Sync {
    fn kind(&self) -> StreamTransportKind;

    fn open(
        &self,
        run_id: &str,
        handlers: StreamHandlers,
    ) -> Result<StreamSubscription, NexusAgentError>;
}

/// Picks the transport variant once, from the configured capabilities.
pub fn select_stream_transport(
    config: &StreamTransportConfig,
) -> Result<Arc<dyn StreamTransport>, NexusAgentError> {
    let use_push = match config.mode {
        StreamTransportMode::Push => {
            if config.usable_push_base().is_none() {
                return Err(NexusAgentError::MissingPushEndpoint);
            }
            true
        }
        StreamTransportMode::Polling => false,
        StreamTransportMode::Auto => config.usable_push_base().is_some(),
    };

    let transport: Arc<dyn StreamTransport> = if use_push {
        Arc::new(WebSocketPushTransport::new(config)?)
    } else {
        Arc::new(HttpStreamTransport::new(config)?)
    };
    tracing::info!(
        transport = transport.kind().as_str(),
        "agent stream transport selected"
    );
    Ok(transport)
}

#[derive(Debug, Clone)]
/// Fallback transport: one long-lived GET whose body is parsed incrementally.
pub struct HttpStreamTransport {
    client: reqwest::Client,
    api_base: String,
}

impl HttpStreamTransport {
    pub fn new(config: &StreamTransportConfig) -> Result<Self, NexusAgentError> {
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            return Err(NexusAgentError::MissingApiBase);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if !config.api_key.trim().is_empty() {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(config.api_key.trim())
                    .map_err(|error| NexusAgentError::InvalidHeader(error.to_string()))?,
            );
        }

        // No overall timeout: the body stays open for the lifetime of the run.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms.max(1)))
            .build()?;
        Ok(Self { client, api_base })
    }
}

impl StreamTransport for HttpStreamTransport {
    fn kind(&self) -> StreamTransportKind {
        StreamTransportKind::Polling
    }

    fn open(
        &self,
        run_id: &str,
        handlers: StreamHandlers,
    ) -> Result<StreamSubscription, NexusAgentError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| NexusAgentError::NoRuntime)?;
        let url = endpoint_url(&self.api_base, &["agent", run_id, "stream"])?;
        let request = self.client.get(url);
        let gate = StreamGate::new(handlers);
        let task_gate = gate.clone();
        let run_id = run_id.to_string();
        let task = runtime.spawn(async move {
            pump_http_stream(request, &task_gate).await;
            tracing::debug!(run_id = %run_id, "agent http stream task finished");
        });
        Ok(gate.subscription(move || task.abort()))
    }
}

async fn pump_http_stream(request: reqwest::RequestBuilder, gate: &StreamGate) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(error) => {
            tracing::debug!(error = %error, "agent stream request failed");
            gate.deliver_error(NexusAgentError::StreamDisconnected);
            return;
        }
    };
    let status = response.status();
    if !status.is_success() {
        gate.deliver_error(NexusAgentError::StreamStatus(status.as_u16()));
        return;
    }

    let mut parser = SseFrameParser::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        if gate.is_closed() {
            return;
        }
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                tracing::debug!(error = %error, "agent stream body read failed");
                gate.deliver_error(NexusAgentError::StreamDisconnected);
                return;
            }
        };
        match parser.push_bytes(chunk.as_ref()) {
            Ok(payloads) => {
                for payload in payloads {
                    gate.deliver_payload(&payload);
                }
            }
            Err(error) => {
                gate.deliver_error(error);
                return;
            }
        }
    }

    if let Some(payload) = parser.finish() {
        gate.deliver_payload(&payload);
    }
    gate.deliver_error(NexusAgentError::StreamDisconnected);
}

#[derive(Debug, Clone)]
/// Native push transport: one websocket text message per event.
pub struct WebSocketPushTransport {
    push_base: String,
    api_key: String,
}

impl WebSocketPushTransport {
    pub fn new(config: &StreamTransportConfig) -> Result<Self, NexusAgentError> {
        let push_base = config
            .usable_push_base()
            .ok_or(NexusAgentError::MissingPushEndpoint)?
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            push_base,
            api_key: config.api_key.trim().to_string(),
        })
    }

    fn client_request(
        &self,
        run_id: &str,
    ) -> Result<tungstenite::handshake::client::Request, NexusAgentError> {
        let url = endpoint_url(&self.push_base, &["agent", run_id, "stream"])?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|error| NexusAgentError::InvalidEndpoint(error.to_string()))?;
        if !self.api_key.is_empty() {
            request.headers_mut().insert(
                API_KEY_HEADER,
                tungstenite::http::HeaderValue::from_str(&self.api_key)
                    .map_err(|error| NexusAgentError::InvalidHeader(error.to_string()))?,
            );
        }
        Ok(request)
    }
}

impl StreamTransport for WebSocketPushTransport {
    fn kind(&self) -> StreamTransportKind {
        StreamTransportKind::Push
    }

    fn open(
        &self,
        run_id: &str,
        handlers: StreamHandlers,
    ) -> Result<StreamSubscription, NexusAgentError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| NexusAgentError::NoRuntime)?;
        let request = self.client_request(run_id)?;
        let gate = StreamGate::new(handlers);
        let task_gate = gate.clone();
        let run_id = run_id.to_string();
        let task = runtime.spawn(async move {
            pump_push_stream(request, &task_gate).await;
            tracing::debug!(run_id = %run_id, "agent push stream task finished");
        });
        Ok(gate.subscription(move || task.abort()))
    }
}

async fn pump_push_stream(request: tungstenite::handshake::client::Request, gate: &StreamGate) {
    let (mut socket, _response) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(error) => {
            gate.deliver_error(NexusAgentError::WebSocket(error.to_string()));
            return;
        }
    };

    while let Some(message) = socket.next().await {
        if gate.is_closed() {
            return;
        }
        match message {
            Ok(WsMessage::Text(text)) => gate.deliver_payload(text.as_str()),
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(bytes.as_ref()) {
                Ok(text) => gate.deliver_payload(text),
                Err(error) => {
                    gate.deliver_error(NexusAgentError::InvalidStreamPayload(format!(
                        "invalid UTF-8 in push message: {error}"
                    )));
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
            Err(error) => {
                gate.deliver_error(NexusAgentError::WebSocket(error.to_string()));
                return;
            }
        }
    }
    gate.deliver_error(NexusAgentError::StreamDisconnected);
}
