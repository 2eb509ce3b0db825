//! MCP client implementation
//!
//! This module provides the SSE client: session state, the connect-time
//! handshake and the facade used to call tools.

pub mod builder;
pub mod handshake;
pub mod mcp_client;
pub mod session;

// Re-export the main client type and builder
pub use builder::{ClientConfig, DEFAULT_STREAM_PATH, McpSseClientBuilder};
pub use handshake::{HandshakePhase, HandshakeTimeouts};
pub use mcp_client::{McpSseClient, render_tool_result};
pub use session::SessionState;
