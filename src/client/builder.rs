// ! Client builder for SSE MCP clients
// !
// ! Provides the client configuration, its environment overrides and a
// ! builder pattern for creating configured clients.

use std::sync::Arc;
use std::time::Duration;

use crate::client::mcp_client::McpSseClient;
use crate::core::error::{McpError, McpResult};
use crate::protocol::types::{ClientCapabilities, Implementation, LATEST_PROTOCOL_VERSION};
use crate::transport::traits::{SseTransport, TransportConfig};

/// Default path of the session-open (push stream) address
pub const DEFAULT_STREAM_PATH: &str = "/mcp-sse";

/// Configuration for the SSE MCP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base address, e.g. `http://localhost:8001`
    pub base_url: Option<String>,
    /// Path of the push stream, appended to the base address
    pub stream_path: String,
    /// How long to wait for the endpoint announcement, in milliseconds
    pub endpoint_timeout_ms: u64,
    /// How long to wait for the initialize response, in milliseconds
    pub initialize_timeout_ms: u64,
    /// Default wait for a correlated response, in milliseconds
    pub request_timeout_ms: u64,
    /// Protocol version sent in the initialize request
    pub protocol_version: String,
    /// Identity sent as `clientInfo`
    pub client_info: Implementation,
    /// Capabilities sent in the initialize request
    pub capabilities: ClientCapabilities,
    /// Buffered server notifications per subscriber
    pub notification_capacity: usize,
    /// Transport-level settings
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            endpoint_timeout_ms: 180_000,
            initialize_timeout_ms: 180_000,
            request_timeout_ms: 180_000,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            client_info: Implementation::default(),
            capabilities: ClientCapabilities::default(),
            notification_capacity: 64,
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `base_url`
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Default::default()
        }
    }

    /// Read overrides from `<PREFIX>_URL`, `<PREFIX>_STREAM_PATH`,
    /// `<PREFIX>_REQUEST_TIMEOUT_SECS` and `<PREFIX>_HANDSHAKE_TIMEOUT_SECS`.
    ///
    /// Unset variables keep their defaults, so `from_env_prefix("FILE_SERVER")`
    /// picks up the conventional `FILE_SERVER_URL`.
    pub fn from_env_prefix(prefix: &str) -> McpResult<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env_prefix`] with a custom variable source
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> McpResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}")).filter(|value| !value.trim().is_empty())
        };

        if let Some(url) = var("URL") {
            config.base_url = Some(url.trim().to_string());
        }
        if let Some(path) = var("STREAM_PATH") {
            config.stream_path = path.trim().to_string();
        }
        if let Some(secs) = var("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_ms = parse_secs(prefix, "REQUEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = var("HANDSHAKE_TIMEOUT_SECS") {
            let ms = parse_secs(prefix, "HANDSHAKE_TIMEOUT_SECS", &secs)?;
            config.endpoint_timeout_ms = ms;
            config.initialize_timeout_ms = ms;
        }

        Ok(config)
    }

    /// Check the base address and return it normalised (no trailing slash)
    pub fn validated_base_url(&self) -> McpResult<String> {
        let raw = self
            .base_url
            .as_deref()
            .ok_or_else(|| McpError::validation("no server base address configured"))?;

        let parsed = url::Url::parse(raw)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(McpError::validation(format!(
                "unsupported scheme '{}' in base address {raw}",
                parsed.scheme()
            )));
        }

        Ok(raw.trim_end_matches('/').to_string())
    }

    /// Absolute session-open address: base plus stream path
    pub fn stream_url(&self) -> McpResult<String> {
        let base = self.validated_base_url()?;
        let path = self.stream_path.trim();
        if path.starts_with('/') {
            Ok(format!("{base}{path}"))
        } else {
            Ok(format!("{base}/{path}"))
        }
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint_timeout_ms)
    }

    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_secs(prefix: &str, suffix: &str, value: &str) -> McpResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map(|secs| secs.saturating_mul(1000))
        .map_err(|e| McpError::validation(format!("{prefix}_{suffix}={value:?}: {e}")))
}

/// Builder for creating SSE MCP clients with configuration
pub struct McpSseClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn SseTransport>>,
}

impl McpSseClientBuilder {
    /// Create a new client builder for the server at `base_url`
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self::from_config(ClientConfig::new(base_url))
    }

    /// Start from an existing configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    /// Set the push stream path (default `/mcp-sse`)
    pub fn with_stream_path<S: Into<String>>(mut self, path: S) -> Self {
        self.config.stream_path = path.into();
        self
    }

    /// Set client name and version
    pub fn with_client_info<S: Into<String>>(mut self, name: S, version: S) -> Self {
        self.config.client_info = Implementation::new(name, version);
        self
    }

    /// Set client capabilities
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Set the protocol version sent at initialize
    pub fn with_protocol_version<S: Into<String>>(mut self, version: S) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    /// Bound on establishing the push stream
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Bound on both the endpoint wait and the initialize wait
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.endpoint_timeout_ms = duration_ms(timeout);
        self.config.initialize_timeout_ms = duration_ms(timeout);
        self
    }

    /// Default bound on each correlated request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// Bound on each POST to the session post address
    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.post_timeout_ms = duration_ms(timeout);
        self
    }

    /// Add a header sent on both channels
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.transport.headers.insert(key.into(), value.into());
        self
    }

    /// Largest accepted stream record in bytes
    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.config.transport.max_record_size = bytes;
        self
    }

    /// Use a custom transport instead of the HTTP one
    pub fn with_transport(mut self, transport: Arc<dyn SseTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    pub fn build(self) -> McpResult<McpSseClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config.transport)?,
        };
        McpSseClient::with_transport(self.config, transport)
    }
}

#[cfg(feature = "http")]
pub(crate) fn default_transport(config: &TransportConfig) -> McpResult<Arc<dyn SseTransport>> {
    let transport = crate::transport::http::HttpSseTransport::with_config(config.clone())?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "http"))]
pub(crate) fn default_transport(_config: &TransportConfig) -> McpResult<Arc<dyn SseTransport>> {
    Err(McpError::validation(
        "no transport configured; enable the `http` feature or supply one with `with_transport`",
    ))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
