//! Core abstractions for the client
//!
//! This module contains the error type shared by every layer and the
//! structured logging helpers built on `tracing`.

pub mod error;
pub mod logging;

pub use error::{McpError, McpResult};
pub use logging::{ErrorContext, ErrorLogLevel, ErrorLogger};

#[cfg(feature = "tracing-subscriber")]
pub use logging::init_tracing;
