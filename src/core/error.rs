// ! Error types for the SSE MCP client
// !
// ! Module defines all error types that can occur while connecting to a
// ! server, running the handshake and waiting on correlated responses.

use thiserror::Error;

use crate::protocol::types::ErrorObject;

/// The main error type for the client
#[derive(Error, Debug, Clone)]
pub enum McpError {
    /// Transport-related errors (stream read failures, closed channels, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol-level errors (invalid messages, unexpected responses, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The push stream could not be opened or the endpoint was never announced
    #[error("Connection error: {0}")]
    Connection(String),

    /// The initialize/initialized exchange failed after the stream was open
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// A bounded wait elapsed
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// The server answered a correlated request with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i32,
        /// Error message supplied by the server
        message: String,
    },

    /// HTTP-related errors when using the reqwest transport
    #[error("HTTP error: {0}")]
    Http(String),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(String),

    /// Invalid configuration or arguments supplied by the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual From implementations for types that don't implement Clone
impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for McpError {
    fn from(err: url::ParseError) -> Self {
        McpError::Url(err.to_string())
    }
}

impl From<ErrorObject> for McpError {
    fn from(err: ErrorObject) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Result type alias for client operations
pub type McpResult<T> = Result<T, McpError>;

impl McpError {
    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    /// Create a new handshake error
    pub fn handshake<S: Into<String>>(message: S) -> Self {
        Self::Handshake(message.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error means the session can no longer be trusted
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            McpError::Connection(_) | McpError::Handshake(_) | McpError::Transport(_)
        )
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            McpError::Transport(_) => false,
            McpError::Protocol(_) => false,
            McpError::Serialization(_) => false,
            McpError::Connection(_) => true,
            McpError::Handshake(_) => true,
            McpError::Timeout(_) => true,
            McpError::Rpc { .. } => false,
            McpError::Http(_) => true,
            McpError::Url(_) => false,
            McpError::Validation(_) => false,
            McpError::Internal(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            McpError::Transport(_) => "transport",
            McpError::Protocol(_) => "protocol",
            McpError::Serialization(_) => "serialization",
            McpError::Connection(_) => "connection",
            McpError::Handshake(_) => "handshake",
            McpError::Timeout(_) => "timeout",
            McpError::Rpc { .. } => "rpc",
            McpError::Http(_) => "http",
            McpError::Url(_) | McpError::Validation(_) => "validation",
            McpError::Internal(_) => "internal",
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            McpError::Timeout(format!("HTTP request timed out: {err}"))
        } else if err.is_connect() {
            McpError::Connection(format!("HTTP connection failed: {err}"))
        } else {
            McpError::Http(err.to_string())
        }
    }
}
