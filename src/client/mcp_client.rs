// ! SSE MCP client implementation
// !
// ! Module provides the client facade: it runs the handshake on demand,
// ! issues correlated requests over the session post address and turns
// ! every tool call into text, success or failure.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tracing::Instrument;

use crate::client::builder::{ClientConfig, McpSseClientBuilder, default_transport};
use crate::client::handshake::{HandshakeContext, HandshakeSequencer, HandshakeTimeouts};
use crate::client::session::{ActiveSession, SessionState, SharedSession};
use crate::core::error::{McpError, McpResult};
use crate::core::logging::ErrorContext;
use crate::protocol::messages::{
    CallToolParams, CallToolResult, InitializeResult, ListToolsParams, ListToolsResult, Tool,
};
use crate::protocol::methods;
use crate::protocol::types::{JsonRpcNotification, ServerCapabilities, ServerInfo};
use crate::transport::traits::{SseTransport, StatsRecorder, TransportStats};

/// MCP client bound to one server over the SSE transport
///
/// The client owns at most one session at a time. It is `Send + Sync`; share
/// it behind an `Arc` to issue calls from several tasks concurrently.
pub struct McpSseClient {
    config: ClientConfig,
    base_url: String,
    transport: Arc<dyn SseTransport>,
    session: SharedSession,
    /// Serialises handshakes; never held across a tool call
    handshake: Mutex<()>,
    stats: Arc<StatsRecorder>,
    notifications: broadcast::Sender<JsonRpcNotification>,
}

impl McpSseClient {
    /// Create a client for the server at `base_url` using the HTTP transport
    pub fn new<S: Into<String>>(base_url: S) -> McpResult<Self> {
        Self::with_config(ClientConfig::new(base_url))
    }

    /// Create a client with custom configuration
    pub fn with_config(config: ClientConfig) -> McpResult<Self> {
        let transport = default_transport(&config.transport)?;
        Self::with_transport(config, transport)
    }

    /// Create a client on top of any [`SseTransport`]
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn SseTransport>,
    ) -> McpResult<Self> {
        let base_url = config.validated_base_url()?;
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));

        tracing::debug!(
            base_url = %base_url,
            transport = %transport.connection_info(),
            "Created SSE MCP client"
        );

        Ok(Self {
            config,
            base_url,
            transport,
            session: SharedSession::new(),
            handshake: Mutex::new(()),
            stats: Arc::new(StatsRecorder::default()),
            notifications,
        })
    }

    /// Configure a client from `<PREFIX>_*` environment variables
    pub fn from_env(prefix: &str) -> McpResult<Self> {
        Self::with_config(ClientConfig::from_env_prefix(prefix)?)
    }

    /// Start a builder for the server at `base_url`
    pub fn builder<S: Into<String>>(base_url: S) -> McpSseClientBuilder {
        McpSseClientBuilder::new(base_url)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // Session State
    // ========================================================================

    pub async fn state(&self) -> SessionState {
        self.session.state().await
    }

    /// Check if the handshake has completed and the stream is still open
    pub async fn is_ready(&self) -> bool {
        self.state().await == SessionState::Ready
    }

    /// Session post address, once announced
    pub async fn post_url(&self) -> Option<String> {
        self.session.post_url().await
    }

    /// Full initialize response of the current session
    pub async fn initialize_result(&self) -> Option<InitializeResult> {
        self.session.init_result().await
    }

    /// Get server information (if connected)
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.initialize_result().await.and_then(|r| r.server_info)
    }

    /// Get server capabilities (if connected)
    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.initialize_result().await.map(|r| r.capabilities)
    }

    /// Number of requests waiting for a response on the current session
    pub async fn pending_requests(&self) -> usize {
        self.session.pending_len().await
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }

    /// Receive server notifications seen on the push stream
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.notifications.subscribe()
    }

    // ========================================================================
    // Connection Management
    // ========================================================================

    /// Run the handshake unless the session is already ready
    pub async fn connect(&self) -> McpResult<()> {
        self.connect_with(HandshakeTimeouts::from_config(&self.config))
            .await
    }

    /// [`connect`](Self::connect) with `timeout` bounding both the endpoint
    /// wait and the initialize wait
    pub async fn connect_with_timeout(&self, timeout: Duration) -> McpResult<()> {
        self.connect_with(HandshakeTimeouts::from_config(&self.config).with_overall(timeout))
            .await
    }

    async fn connect_with(&self, timeouts: HandshakeTimeouts) -> McpResult<()> {
        if self.is_ready().await {
            return Ok(());
        }

        let _guard = self.handshake.lock().await;
        // Whoever held the guard before us may have finished the job
        if self.is_ready().await {
            return Ok(());
        }

        let sequencer = HandshakeSequencer::new(
            HandshakeContext {
                config: &self.config,
                transport: &self.transport,
                session: &self.session,
                stats: &self.stats,
                notifications: &self.notifications,
            },
            timeouts,
        );
        sequencer.run().await.map(|_| ())
    }

    /// Drop the session: stop the listener and fail every pending request
    pub async fn disconnect(&self) {
        self.session.close("client disconnected").await;
        tracing::info!(base_url = %self.base_url, "Disconnected");
    }

    async fn active_session(&self) -> McpResult<ActiveSession> {
        self.connect().await?;
        self.session
            .active()
            .await
            .ok_or_else(|| McpError::connection("session closed right after the handshake"))
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Send a correlated request and return its raw `result`.
    ///
    /// Connects first if needed. A failure other than a JSON-RPC error
    /// response marks the session Disconnected so the next call re-handshakes.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        let session = self.active_session().await?;
        let result = session
            .request(
                self.transport.as_ref(),
                &self.stats,
                method,
                params,
                self.config.transport.post_timeout(),
                timeout.unwrap_or_else(|| self.config.request_timeout()),
            )
            .await;

        if let Err(e) = &result {
            self.after_failure(&session, method, e).await;
        }
        result
    }

    /// Send a notification on the ready session
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let session = self.active_session().await?;
        let result = session
            .notify(
                self.transport.as_ref(),
                &self.stats,
                method,
                params,
                self.config.transport.post_timeout(),
            )
            .await;

        if let Err(e) = &result {
            self.after_failure(&session, method, e).await;
        }
        result
    }

    async fn after_failure(&self, session: &ActiveSession, method: &str, error: &McpError) {
        if matches!(error, McpError::Rpc { .. }) {
            return;
        }
        if self.session.invalidate(session.generation).await {
            tracing::warn!(
                session = session.generation,
                method,
                error = %error,
                "Request failed; session will re-handshake on next use"
            );
        }
    }

    // ========================================================================
    // Tool Operations
    // ========================================================================

    /// List every tool the server advertises, following pagination
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor = None;

        loop {
            let params = serde_json::to_value(ListToolsParams { cursor })?;
            let value = self.request(methods::TOOLS_LIST, Some(params), None).await?;
            let page: ListToolsResult = serde_json::from_value(value)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool and return its result as text, surfacing failures as errors
    pub async fn try_call_tool(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
    ) -> McpResult<String> {
        self.try_call_tool_with_timeout(name, arguments, self.config.request_timeout())
            .await
    }

    /// [`try_call_tool`](Self::try_call_tool) with a per-call response timeout
    pub async fn try_call_tool_with_timeout(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
        timeout: Duration,
    ) -> McpResult<String> {
        let params = serde_json::to_value(CallToolParams::new(name, arguments))?;
        let span = tracing::info_span!("call_tool", tool = name);

        async {
            let value = self
                .request(methods::TOOLS_CALL, Some(params), Some(timeout))
                .await?;
            Ok::<_, McpError>(render_tool_result(value))
        }
        .instrument(span)
        .await
    }

    /// Call a tool and always get text back.
    ///
    /// Transport, handshake and timeout failures come back as a string
    /// starting with `Error:` that names the tool; the next call
    /// re-establishes the session.
    pub async fn call_tool(&self, name: &str, arguments: HashMap<String, Value>) -> String {
        self.call_tool_with_timeout(name, arguments, self.config.request_timeout())
            .await
    }

    /// [`call_tool`](Self::call_tool) with a per-call response timeout
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
        timeout: Duration,
    ) -> String {
        match self.try_call_tool_with_timeout(name, arguments, timeout).await {
            Ok(text) => text,
            Err(e) => {
                e.log_with_context(
                    ErrorContext::new("call_tool")
                        .with_transport("sse")
                        .with_method(methods::TOOLS_CALL)
                        .with_extra("tool", name),
                );
                format!("Error: tool call '{name}' failed: {e}")
            }
        }
    }
}

/// Render a `tools/call` result as text.
///
/// Text blocks are joined with newlines; results without text fall back to
/// compact JSON. Results flagged `isError` are prefixed with `Error:`.
pub fn render_tool_result(value: Value) -> String {
    if let Value::String(text) = value {
        return text;
    }

    match serde_json::from_value::<CallToolResult>(value.clone()) {
        Ok(result) => {
            let text = result.text().unwrap_or_else(|| value.to_string());
            if result.is_error == Some(true) {
                format!("Error: {text}")
            } else {
                text
            }
        }
        Err(_) => value.to_string(),
    }
}
