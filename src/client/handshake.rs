// ! Connect-time handshake
// !
// ! Drives open stream -> await endpoint -> initialize -> initialized for one
// ! session. The phases run strictly in order and any failure abandons the
// ! whole attempt, leaving the session Disconnected.

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::Instrument;

use crate::client::builder::ClientConfig;
use crate::client::session::{ActiveSession, SharedSession};
use crate::core::error::{McpError, McpResult};
use crate::core::logging::ErrorContext;
use crate::protocol::messages::{InitializeParams, InitializeResult};
use crate::protocol::methods;
use crate::protocol::types::JsonRpcNotification;
use crate::transport::listener::StreamListener;
use crate::transport::pending::PendingRequests;
use crate::transport::sse::resolve_post_url;
use crate::transport::traits::{SseTransport, StatsRecorder};

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    StreamOpening,
    AwaitingEndpoint,
    Initializing,
    Acknowledging,
    Ready,
    Failed,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakePhase::Idle => "idle",
            HandshakePhase::StreamOpening => "opening stream",
            HandshakePhase::AwaitingEndpoint => "awaiting endpoint",
            HandshakePhase::Initializing => "initializing",
            HandshakePhase::Acknowledging => "acknowledging",
            HandshakePhase::Ready => "ready",
            HandshakePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bounds applied to each blocking step of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    /// Establishing the push stream
    pub connect: Duration,
    /// Waiting for the endpoint announcement
    pub endpoint: Duration,
    /// Waiting for the initialize response
    pub initialize: Duration,
    /// Each POST
    pub post: Duration,
}

impl HandshakeTimeouts {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect: config.transport.connect_timeout(),
            endpoint: config.endpoint_timeout(),
            initialize: config.initialize_timeout(),
            post: config.transport.post_timeout(),
        }
    }

    /// Replace both handshake waits with `timeout`
    pub fn with_overall(mut self, timeout: Duration) -> Self {
        self.endpoint = timeout;
        self.initialize = timeout;
        self
    }
}

/// Everything the handshake borrows from the client
pub(crate) struct HandshakeContext<'a> {
    pub config: &'a ClientConfig,
    pub transport: &'a Arc<dyn SseTransport>,
    pub session: &'a SharedSession,
    pub stats: &'a Arc<StatsRecorder>,
    pub notifications: &'a broadcast::Sender<JsonRpcNotification>,
}

/// One run of the handshake state machine
pub(crate) struct HandshakeSequencer<'a> {
    ctx: HandshakeContext<'a>,
    timeouts: HandshakeTimeouts,
    phase: HandshakePhase,
}

impl<'a> HandshakeSequencer<'a> {
    pub fn new(ctx: HandshakeContext<'a>, timeouts: HandshakeTimeouts) -> Self {
        Self {
            ctx,
            timeouts,
            phase: HandshakePhase::Idle,
        }
    }

    fn enter(&mut self, phase: HandshakePhase) {
        tracing::debug!(from = %self.phase, to = %phase, "Handshake phase");
        self.phase = phase;
    }

    /// Run the handshake to completion or failure.
    ///
    /// The caller must hold the client's handshake guard.
    pub async fn run(mut self) -> McpResult<InitializeResult> {
        let generation = self.ctx.session.begin().await;
        let span = tracing::info_span!("mcp_handshake", session = generation);

        match self.drive(generation).instrument(span).await {
            Ok(result) => {
                self.ctx.stats.session_opened();
                tracing::info!(
                    session = generation,
                    server = ?result.server_info,
                    protocol_version = ?result.protocol_version,
                    "Session ready"
                );
                Ok(result)
            }
            Err(e) => {
                let failed_in = self.phase;
                self.enter(HandshakePhase::Failed);
                self.ctx.stats.handshake_failed();
                self.ctx.session.fail(generation, "handshake failed").await;

                let error = classify_failure(failed_in, e);
                error.log_with_context(
                    ErrorContext::new("handshake")
                        .with_transport("sse")
                        .with_session_id(generation.to_string())
                        .with_extra("phase", failed_in.to_string()),
                );
                Err(error)
            }
        }
    }

    async fn drive(&mut self, generation: u64) -> McpResult<InitializeResult> {
        let config = self.ctx.config;
        let base_url = config.validated_base_url()?;
        let stream_url = config.stream_url()?;

        self.enter(HandshakePhase::StreamOpening);
        let stream = self
            .ctx
            .transport
            .open_stream(&stream_url, self.timeouts.connect)
            .await?;

        self.enter(HandshakePhase::AwaitingEndpoint);
        let pending = PendingRequests::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let listener = StreamListener::new(
            generation,
            stream,
            pending.clone(),
            endpoint_tx,
            config.transport.max_record_size,
            self.ctx.stats.clone(),
        )
        .with_notifications(self.ctx.notifications.clone());

        let session = self.ctx.session.clone();
        let handle = tokio::spawn(async move {
            listener.run().await;
            session.stream_closed(generation).await;
        });
        self.ctx
            .session
            .attach(generation, pending.clone(), handle)
            .await?;

        let announced = match tokio::time::timeout(self.timeouts.endpoint, endpoint_rx).await {
            Ok(Ok(path)) => path,
            Ok(Err(_)) => {
                return Err(McpError::connection(
                    "push stream ended before announcing the session endpoint",
                ));
            }
            Err(_) => {
                return Err(McpError::connection(format!(
                    "no session endpoint announced within {:.1}s",
                    self.timeouts.endpoint.as_secs_f64()
                )));
            }
        };

        let post_url = resolve_post_url(&base_url, &announced);
        tracing::info!(post_url = %post_url, "Session endpoint discovered");
        self.ctx
            .session
            .set_post_url(generation, post_url.clone())
            .await?;

        let active = ActiveSession {
            generation,
            post_url,
            pending,
        };

        self.enter(HandshakePhase::Initializing);
        let params = InitializeParams::new(
            config.protocol_version.clone(),
            config.capabilities.clone(),
            config.client_info.clone(),
        );
        let value = active
            .request(
                self.ctx.transport.as_ref(),
                self.ctx.stats,
                methods::INITIALIZE,
                Some(serde_json::to_value(params)?),
                self.timeouts.post,
                self.timeouts.initialize,
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        self.enter(HandshakePhase::Acknowledging);
        active
            .notify(
                self.ctx.transport.as_ref(),
                self.ctx.stats,
                methods::INITIALIZED,
                Some(json!({})),
                self.timeouts.post,
            )
            .await?;

        self.ctx
            .session
            .mark_ready(generation, result.clone())
            .await?;
        self.enter(HandshakePhase::Ready);

        Ok(result)
    }
}

/// Map a failure to the connection-error family, naming the phase it hit
fn classify_failure(phase: HandshakePhase, error: McpError) -> McpError {
    match (phase, error) {
        (_, error @ (McpError::Connection(_) | McpError::Handshake(_))) => error,
        (
            HandshakePhase::Idle | HandshakePhase::StreamOpening | HandshakePhase::AwaitingEndpoint,
            error,
        ) => McpError::connection(format!("{phase}: {error}")),
        (phase, error) => McpError::handshake(format!("{phase}: {error}")),
    }
}
