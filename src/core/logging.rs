// ! Structured logging for the SSE MCP client
// !
// ! Module provides structured error logging with categorization and
// ! context preservation, plus subscriber installation for binaries and tests.

use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::core::error::McpError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLogLevel {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but the client can continue
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational error context
    Info,
}

impl From<&McpError> for ErrorLogLevel {
    fn from(error: &McpError) -> Self {
        match error {
            McpError::Internal(_) => ErrorLogLevel::Critical,

            McpError::Transport(_)
            | McpError::Protocol(_)
            | McpError::Serialization(_)
            | McpError::Handshake(_) => ErrorLogLevel::Error,

            // Recoverable by re-running the handshake
            McpError::Connection(_) | McpError::Timeout(_) | McpError::Http(_) => {
                ErrorLogLevel::Warning
            }

            // The server answered; the caller sees the message as text
            McpError::Rpc { .. } | McpError::Url(_) | McpError::Validation(_) => {
                ErrorLogLevel::Info
            }
        }
    }
}

/// Extended error context for logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Operation being performed when error occurred
    pub operation: String,
    /// Transport type
    pub transport: Option<String>,
    /// Request method if applicable
    pub method: Option<String>,
    /// Session generation or post address
    pub session_id: Option<String>,
    /// Additional context data
    pub extra: HashMap<String, Value>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            operation: "unknown".to_string(),
            transport: None,
            method: None,
            session_id: None,
            extra: HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Set transport type
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    /// Set method name
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set session ID
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add extra context data
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Error logger emitting one structured event per failure
pub struct ErrorLogger;

impl ErrorLogger {
    /// Log an error with full context
    pub fn log_error(error: &McpError, context: ErrorContext) {
        let category = error.category();
        let recoverable = error.is_recoverable();

        let log_data = json!({
            "error_category": category,
            "error_recoverable": recoverable,
            "error_message": error.to_string(),
            "operation": context.operation,
            "transport": context.transport,
            "method": context.method,
            "session_id": context.session_id,
            "extra_context": context.extra,
        });
        let details = serde_json::to_string(&log_data).unwrap_or_default();

        match ErrorLogLevel::from(error) {
            ErrorLogLevel::Critical => {
                error!(
                    target: "mcp_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "CRITICAL MCP Error: {} - {}",
                    error,
                    details
                );
            }
            ErrorLogLevel::Error => {
                error!(
                    target: "mcp_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "MCP Error: {} - {}",
                    error,
                    details
                );
            }
            ErrorLogLevel::Warning => {
                warn!(
                    target: "mcp_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "MCP Warning: {} - {}",
                    error,
                    details
                );
            }
            ErrorLogLevel::Info => {
                info!(
                    target: "mcp_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "MCP Info: {} - {}",
                    error,
                    details
                );
            }
        }
    }
}

impl McpError {
    /// Log this error with structured context
    pub fn log_with_context(&self, context: ErrorContext) {
        ErrorLogger::log_error(self, context);
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (for example
/// `"sse_mcp_client=debug"`) is used. Returns `false` if a subscriber was
/// already installed.
#[cfg(feature = "tracing-subscriber")]
pub fn init_tracing(default_directive: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
