//! Transport layer implementations
//!
//! This module provides the two-channel SSE transport seam, the push-stream
//! framing and listener, and the registry correlating posts with responses.

pub mod listener;
pub mod pending;
pub mod sse;
pub mod traits;

#[cfg(feature = "http")]
pub mod http;

// Re-export commonly used types
pub use listener::{ListenerExit, StreamListener};
pub use pending::{PendingRequests, PendingSlot};
pub use sse::{InboundEvent, SseLineDecoder, resolve_post_url};
pub use traits::{EventStream, SseTransport, StatsRecorder, TransportConfig, TransportStats};

#[cfg(feature = "http")]
pub use http::HttpSseTransport;
