//! MCP protocol implementation
//!
//! JSON-RPC envelopes and the subset of Model Context Protocol messages the
//! SSE client exchanges with a server.

pub mod messages;
pub mod methods;
pub mod types;

// Re-export commonly used types and constants
pub use messages::*;
pub use types::*;

pub use methods::{INITIALIZE, INITIALIZED, TOOLS_CALL, TOOLS_LIST};
pub use types::{JSONRPC_VERSION, LATEST_PROTOCOL_VERSION};
