// Copyright (c) 2025 MCP Rust Contributors
// SPDX-License-Identifier: MIT

//! # SSE MCP Client
//!
//! A Rust client for [Model Context Protocol](https://modelcontextprotocol.io/)
//! servers that speak the HTTP+SSE transport: the server pushes everything on
//! a long-lived event stream, and the client posts JSON-RPC messages to a
//! per-session address announced on that stream.
// !
//! ## Features
//!
//! - ⚡ **Synchronous-looking calls**: `call_tool` hides endpoint discovery,
//!   the initialize handshake and response correlation
//! - 🔁 **Self-healing sessions**: any transport failure marks the session
//!   disconnected and the next call re-runs the handshake
//! - 🧵 **Concurrent callers**: responses arriving in any order are matched to
//!   their requests by id
//! - 📝 **Text-first results**: tool failures come back as error text rather
//!   than breaking a tool-invocation loop
// !
//! ## Quick Start
//!
//! ```rust,no_run
//! use sse_mcp_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> McpResult<()> {
//!     let client = McpSseClient::new("http://localhost:8001")?;
//!     client.connect().await?;
//!
//!     for tool in client.list_tools().await? {
//!         println!("{}", tool.name);
//!     }
//!
//!     let text = client
//!         .call_tool("read_file", HashMap::from([("path".to_string(), json!("a.txt"))]))
//!         .await;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`]: Error type and structured logging
//! - [`protocol`]: JSON-RPC envelopes and MCP message definitions
//! - [`transport`]: Push-stream framing, listener, request registry and the HTTP transport
//! - [`client`]: Session state, handshake and the client facade

pub mod client;
pub mod core;
pub mod protocol;
pub mod transport;

// Re-export commonly used types for convenience
pub use client::{McpSseClient, McpSseClientBuilder};
pub use core::error::{McpError, McpResult};

/// Prelude module for convenient imports
///
/// Use `use sse_mcp_client::prelude::*;` to import everything you need.
pub mod prelude {
    // Core types
    pub use crate::core::error::{McpError, McpResult};

    // Protocol types and messages
    pub use crate::protocol::messages::*;
    pub use crate::protocol::types::*;

    // Client
    pub use crate::client::{ClientConfig, McpSseClient, McpSseClientBuilder, SessionState};

    // Transport layer
    pub use crate::transport::{SseTransport, TransportConfig, TransportStats};

    #[cfg(feature = "http")]
    pub use crate::transport::HttpSseTransport;

    // Essential external types
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::collections::HashMap;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Basic smoke test to ensure all modules are accessible
        let _error = McpError::Protocol("test".to_string());
        assert_eq!(client::DEFAULT_STREAM_PATH, "/mcp-sse");
    }
}
