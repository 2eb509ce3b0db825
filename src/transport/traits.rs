// ! Transport layer traits and abstractions
// !
// ! The SSE transport is split in two: a long-lived push stream the server
// ! writes to, and a post channel the client sends JSON-RPC messages on.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::core::error::McpResult;

/// Raw body chunks of the push stream
pub type EventStream = BoxStream<'static, McpResult<Bytes>>;

/// Transport trait for the two channels of an SSE session
///
/// Implementations only move bytes; framing, correlation and session state
/// live above this seam.
#[async_trait]
pub trait SseTransport: Send + Sync {
    /// Open the push stream with `Accept: text/event-stream`
    ///
    /// # Arguments
    /// * `url` - Absolute session-open address
    /// * `connect_timeout` - Bound on establishing the stream (not on its lifetime)
    ///
    /// # Returns
    /// The stream body, or a connection error
    async fn open_stream(&self, url: &str, connect_timeout: Duration) -> McpResult<EventStream>;

    /// POST a JSON body to the session post address
    ///
    /// Responses are delivered on the push stream, so only the HTTP status
    /// of the post itself is checked here.
    async fn post_message(&self, url: &str, body: &Value, timeout: Duration) -> McpResult<()>;

    /// Get connection information for debugging
    fn connection_info(&self) -> String {
        "Unknown SSE transport".to_string()
    }
}

/// Transport configuration options
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout for opening the push stream, in milliseconds
    pub connect_timeout_ms: u64,
    /// Timeout for each POST on the post channel, in milliseconds
    pub post_timeout_ms: u64,
    /// Maximum size of a single stream record in bytes
    pub max_record_size: usize,
    /// Custom headers sent on both channels
    pub headers: HashMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,        // 10 seconds
            post_timeout_ms: 180_000,          // 3 minutes
            max_record_size: 16 * 1024 * 1024, // 16 MB
            headers: HashMap::new(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn post_timeout(&self) -> Duration {
        Duration::from_millis(self.post_timeout_ms)
    }
}

/// Transport statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    /// Number of correlated requests posted
    pub requests_sent: u64,
    /// Number of responses matched to a waiter
    pub responses_received: u64,
    /// Number of notifications posted
    pub notifications_sent: u64,
    /// Stream records that were dropped (undecodable, unknown id, unrelated)
    pub records_dropped: u64,
    /// Number of sessions established
    pub sessions_opened: u64,
    /// Number of handshakes that failed
    pub handshake_failures: u64,
}

/// Counters shared between the caller side and the listener task
#[derive(Debug, Default)]
pub struct StatsRecorder {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    notifications_sent: AtomicU64,
    records_dropped: AtomicU64,
    sessions_opened: AtomicU64,
    handshake_failures: AtomicU64,
}

impl StatsRecorder {
    pub fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> TransportStats {
        TransportStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
        }
    }
}
