// ! Push-stream listener
// !
// ! Reads the server's event stream for the lifetime of one session,
// ! announces the post endpoint once and routes correlated responses to
// ! their waiters. Malformed or unrelated records are logged and skipped.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

use crate::core::error::McpError;
use crate::protocol::types::JsonRpcNotification;
use crate::transport::pending::PendingRequests;
use crate::transport::sse::{InboundEvent, SseLineDecoder, classify, data_payload};
use crate::transport::traits::{EventStream, StatsRecorder};

/// Why the listener loop ended
#[derive(Debug, Clone)]
pub enum ListenerExit {
    /// The server closed the stream
    StreamEnded,
    /// Reading the stream failed
    StreamFailed(McpError),
}

/// Listener for a single push stream
pub struct StreamListener {
    session: u64,
    stream: EventStream,
    decoder: SseLineDecoder,
    pending: PendingRequests,
    endpoint_tx: Option<oneshot::Sender<String>>,
    notifications: Option<broadcast::Sender<JsonRpcNotification>>,
    stats: Arc<StatsRecorder>,
}

impl StreamListener {
    /// Create a listener for `stream`.
    ///
    /// `endpoint_tx` fires with the first payload of the stream; every later
    /// payload is decoded as JSON-RPC.
    pub fn new(
        session: u64,
        stream: EventStream,
        pending: PendingRequests,
        endpoint_tx: oneshot::Sender<String>,
        max_record_size: usize,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            session,
            stream,
            decoder: SseLineDecoder::new(max_record_size),
            pending,
            endpoint_tx: Some(endpoint_tx),
            notifications: None,
            stats,
        }
    }

    /// Forward server notifications to `sender`
    pub fn with_notifications(mut self, sender: broadcast::Sender<JsonRpcNotification>) -> Self {
        self.notifications = Some(sender);
        self
    }

    /// Run until the stream closes or fails.
    ///
    /// On exit every request still pending on this session is failed so no
    /// caller waits out its full timeout on a dead stream.
    pub async fn run(mut self) -> ListenerExit {
        tracing::debug!(session = self.session, "Stream listener started");

        let exit = loop {
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    for line in self.decoder.push(&chunk) {
                        self.dispatch_line(&line);
                    }
                }
                Some(Err(e)) => break ListenerExit::StreamFailed(e),
                None => break ListenerExit::StreamEnded,
            }
        };

        if let Some(line) = self.decoder.finish() {
            self.dispatch_line(&line);
        }

        let abandoned = self.pending.close_all("push stream closed");
        match &exit {
            ListenerExit::StreamEnded => tracing::info!(
                session = self.session,
                abandoned,
                "Stream listener stopped: server closed the stream"
            ),
            ListenerExit::StreamFailed(e) => tracing::warn!(
                session = self.session,
                abandoned,
                error = %e,
                "Stream listener stopped: stream read failed"
            ),
        }

        exit
    }

    fn dispatch_line(&mut self, line: &[u8]) {
        let Some(payload) = data_payload(line) else {
            return;
        };

        let endpoint_known = self.endpoint_tx.is_none();
        match classify(payload, endpoint_known) {
            Ok(InboundEvent::Endpoint(path)) => {
                tracing::debug!(session = self.session, endpoint = %path, "Endpoint announced");
                if let Some(tx) = self.endpoint_tx.take() {
                    if tx.send(path).is_err() {
                        tracing::debug!(
                            session = self.session,
                            "No one is waiting for the endpoint"
                        );
                    }
                }
            }
            Ok(InboundEvent::Response { id, outcome }) => {
                if self.pending.resolve(&id, outcome.map_err(McpError::from)) {
                    self.stats.response_received();
                } else {
                    self.stats.record_dropped();
                }
            }
            Ok(InboundEvent::Notification(notification)) => {
                tracing::trace!(
                    session = self.session,
                    method = %notification.method,
                    "Server notification"
                );
                if let Some(sender) = &self.notifications {
                    // No subscribers is fine
                    let _ = sender.send(notification);
                }
            }
            Ok(InboundEvent::Ignored(value)) => {
                tracing::debug!(
                    session = self.session,
                    record = %value,
                    "Ignoring unrelated record"
                );
                self.stats.record_dropped();
            }
            Err(e) if !endpoint_known => {
                // Dropping the sender fails the handshake's wait immediately
                self.endpoint_tx = None;
                tracing::warn!(session = self.session, error = %e, "Invalid endpoint announcement");
                self.stats.record_dropped();
            }
            Err(e) => {
                tracing::warn!(
                    session = self.session,
                    error = %e,
                    record = %String::from_utf8_lossy(payload),
                    "Received non-JSON data after handshake"
                );
                self.stats.record_dropped();
            }
        }
    }
}
