// ! Client session management
// !
// ! Module tracks the single live session of a client: its connection state,
// ! the discovered post address, the listener task and the request registry.
// ! Every mutation is tagged with the session generation so a listener or
// ! handshake belonging to an older session cannot disturb a newer one.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::error::{McpError, McpResult};
use crate::protocol::messages::InitializeResult;
use crate::protocol::types::{JsonRpcNotification, JsonRpcRequest};
use crate::transport::pending::PendingRequests;
use crate::transport::traits::{SseTransport, StatsRecorder};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No usable session; the next call runs the handshake
    #[default]
    Disconnected,
    /// A handshake is running
    HandshakeInProgress,
    /// Handshake complete; tool calls are permitted
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::HandshakeInProgress => write!(f, "handshake in progress"),
            SessionState::Ready => write!(f, "ready"),
        }
    }
}

/// Resources owned by one connection attempt
#[derive(Debug)]
struct SessionRecord {
    post_url: Option<String>,
    pending: PendingRequests,
    listener: JoinHandle<()>,
    init: Option<InitializeResult>,
}

impl SessionRecord {
    fn retire(self, reason: &str) -> usize {
        self.listener.abort();
        self.pending.close_all(reason)
    }
}

#[derive(Debug, Default)]
struct SessionCell {
    state: SessionState,
    generation: u64,
    current: Option<SessionRecord>,
}

impl SessionCell {
    fn retire_current(&mut self, reason: &str) {
        if let Some(record) = self.current.take() {
            let abandoned = record.retire(reason);
            tracing::debug!(
                session = self.generation,
                abandoned,
                reason,
                "Retired session"
            );
        }
    }
}

/// What a caller needs to issue a request on the ready session
#[derive(Debug, Clone)]
pub(crate) struct ActiveSession {
    pub generation: u64,
    pub post_url: String,
    pub pending: PendingRequests,
}

impl ActiveSession {
    /// Post a correlated request and wait for its response.
    ///
    /// The id is a fresh v4 UUID and is registered before the post goes
    /// out, so a fast response can never miss its waiter. The registry entry
    /// is gone on every return path.
    pub async fn request(
        &self,
        transport: &dyn SseTransport,
        stats: &StatsRecorder,
        method: &str,
        params: Option<Value>,
        post_timeout: Duration,
        timeout: Duration,
    ) -> McpResult<Value> {
        let id = Uuid::new_v4().to_string();
        let slot = self.pending.register(id.clone())?;

        let request = JsonRpcRequest::new(Value::String(id.clone()), method.to_string(), params)?;
        let body = serde_json::to_value(&request)?;

        tracing::debug!(session = self.generation, request_id = %id, method, "Posting request");
        transport.post_message(&self.post_url, &body, post_timeout).await?;
        stats.request_sent();

        let outcome = self.pending.take(slot, timeout).await;
        tracing::debug!(
            session = self.generation,
            request_id = %id,
            method,
            ok = outcome.is_ok(),
            "Request finished"
        );
        outcome
    }

    /// Post a notification; nothing is registered and no response is awaited
    pub async fn notify(
        &self,
        transport: &dyn SseTransport,
        stats: &StatsRecorder,
        method: &str,
        params: Option<Value>,
        post_timeout: Duration,
    ) -> McpResult<()> {
        let notification = JsonRpcNotification::new(method.to_string(), params)?;
        let body = serde_json::to_value(&notification)?;

        tracing::debug!(session = self.generation, method, "Posting notification");
        transport.post_message(&self.post_url, &body, post_timeout).await?;
        stats.notification_sent();
        Ok(())
    }
}

/// Shared, generation-guarded session slot
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedSession {
    cell: Arc<RwLock<SessionCell>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new connection attempt and return its generation.
    ///
    /// Whatever the previous session still owned (listener, waiters) is
    /// released first, so at most one listener is alive per client.
    pub async fn begin(&self) -> u64 {
        let mut cell = self.cell.write().await;
        cell.retire_current("session replaced by a new handshake");
        cell.generation += 1;
        cell.state = SessionState::HandshakeInProgress;
        cell.generation
    }

    /// Hand the listener and registry of `generation` to the session.
    ///
    /// Fails, aborting the listener, when the attempt has been superseded.
    pub async fn attach(
        &self,
        generation: u64,
        pending: PendingRequests,
        listener: JoinHandle<()>,
    ) -> McpResult<()> {
        let mut cell = self.cell.write().await;
        if cell.generation != generation {
            listener.abort();
            return Err(superseded(generation));
        }
        cell.current = Some(SessionRecord {
            post_url: None,
            pending,
            listener,
            init: None,
        });
        Ok(())
    }

    pub async fn set_post_url(&self, generation: u64, post_url: String) -> McpResult<()> {
        let mut guard = self.cell.write().await;
        let cell = &mut *guard;
        match cell.current.as_mut() {
            Some(record) if cell.generation == generation => {
                record.post_url = Some(post_url);
                Ok(())
            }
            _ => Err(superseded(generation)),
        }
    }

    /// Complete the handshake of `generation`.
    ///
    /// Refused if the push stream already closed, since a Ready session with
    /// no listener would hang every call.
    pub async fn mark_ready(&self, generation: u64, init: InitializeResult) -> McpResult<()> {
        let mut guard = self.cell.write().await;
        let cell = &mut *guard;
        if cell.generation != generation {
            return Err(superseded(generation));
        }
        if cell.state != SessionState::HandshakeInProgress {
            return Err(McpError::connection(
                "push stream closed before the handshake completed",
            ));
        }
        match cell.current.as_mut() {
            Some(record) if record.post_url.is_some() => {
                record.init = Some(init);
                cell.state = SessionState::Ready;
                Ok(())
            }
            _ => Err(McpError::internal(
                "handshake completed without a session endpoint",
            )),
        }
    }

    /// Abandon a failed handshake of `generation`
    pub async fn fail(&self, generation: u64, reason: &str) {
        let mut cell = self.cell.write().await;
        if cell.generation == generation {
            cell.retire_current(reason);
            cell.state = SessionState::Disconnected;
        }
    }

    /// Called by the listener task of `generation` when its stream ends
    pub async fn stream_closed(&self, generation: u64) {
        let mut cell = self.cell.write().await;
        if cell.generation == generation && cell.state != SessionState::Disconnected {
            tracing::info!(session = generation, "Push stream closed; session is no longer ready");
            cell.state = SessionState::Disconnected;
        }
    }

    /// Mark the ready session of `generation` unusable after a failed call.
    ///
    /// The session's resources are released by the next handshake, so calls
    /// still in flight on it can finish.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let mut cell = self.cell.write().await;
        if cell.generation == generation && cell.state == SessionState::Ready {
            cell.state = SessionState::Disconnected;
            true
        } else {
            false
        }
    }

    /// Tear down whatever session exists, including one mid-handshake
    pub async fn close(&self, reason: &str) {
        let mut cell = self.cell.write().await;
        cell.retire_current(reason);
        cell.generation += 1;
        cell.state = SessionState::Disconnected;
    }

    /// Request handles of the ready session, if any
    pub async fn active(&self) -> Option<ActiveSession> {
        let cell = self.cell.read().await;
        if cell.state != SessionState::Ready {
            return None;
        }
        let record = cell.current.as_ref()?;
        Some(ActiveSession {
            generation: cell.generation,
            post_url: record.post_url.clone()?,
            pending: record.pending.clone(),
        })
    }

    pub async fn state(&self) -> SessionState {
        self.cell.read().await.state
    }

    pub async fn post_url(&self) -> Option<String> {
        let cell = self.cell.read().await;
        cell.current.as_ref().and_then(|r| r.post_url.clone())
    }

    pub async fn init_result(&self) -> Option<InitializeResult> {
        let cell = self.cell.read().await;
        cell.current.as_ref().and_then(|r| r.init.clone())
    }

    pub async fn pending_len(&self) -> usize {
        let cell = self.cell.read().await;
        cell.current.as_ref().map_or(0, |r| r.pending.len())
    }
}

fn superseded(generation: u64) -> McpError {
    McpError::connection(format!("session {generation} was superseded"))
}
