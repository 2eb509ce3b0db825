// ! Pending-request registry
// !
// ! Correlates requests posted on the post channel with responses that
// ! arrive later, in any order, on the shared push stream.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::core::error::{McpError, McpResult};

type Waiters = HashMap<String, oneshot::Sender<McpResult<Value>>>;

#[derive(Debug, Default)]
struct Registry {
    waiters: Waiters,
    // Set once by `close_all`; no waiter registered afterwards could be resolved
    closed: Option<String>,
}

/// Concurrent map from correlation id to the waiter expecting its response.
///
/// Written by the caller (`register`) and resolved by the listener task
/// (`resolve`). Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<Registry>>,
}

/// Waitable slot returned by [`PendingRequests::register`].
///
/// Dropping the slot removes its registry entry, so a caller that gives up
/// (or whose future is dropped) never leaves the entry behind.
#[derive(Debug)]
pub struct PendingSlot {
    id: String,
    receiver: oneshot::Receiver<McpResult<Value>>,
    registry: PendingRequests,
}

impl PendingSlot {
    /// Correlation id this slot waits on
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    // The map is only touched in short critical sections with no await, so a
    // poisoned lock still holds a consistent map.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: &str) -> bool {
        self.registry().waiters.remove(id).is_some()
    }

    /// Insert an empty entry for `id` and return the slot to wait on.
    ///
    /// Ids are random v4 UUIDs, so a collision means the caller reused an
    /// id and is reported as an internal error. Once the registry has been
    /// closed every registration fails with a connection error.
    pub fn register(&self, id: impl Into<String>) -> McpResult<PendingSlot> {
        let id = id.into();
        let (sender, receiver) = oneshot::channel();

        {
            let mut registry = self.registry();
            if let Some(reason) = &registry.closed {
                tracing::debug!(
                    request_id = %id,
                    reason = %reason,
                    "Registry closed, refusing request"
                );
                return Err(McpError::connection(format!("session closed: {reason}")));
            }
            let waiters = &mut registry.waiters;
            if waiters.contains_key(&id) {
                tracing::error!(request_id = %id, "Correlation id already pending");
                return Err(McpError::internal(format!(
                    "request id {id} is already pending"
                )));
            }
            waiters.insert(id.clone(), sender);
        }

        Ok(PendingSlot {
            id,
            receiver,
            registry: self.clone(),
        })
    }

    /// Deliver an outcome to the waiter for `id`.
    ///
    /// Returns `false` when no such waiter exists (late, duplicate or
    /// foreign response); the outcome is dropped.
    pub fn resolve(&self, id: &str, outcome: McpResult<Value>) -> bool {
        let sender = self.registry().waiters.remove(id);
        match sender {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    tracing::debug!(request_id = %id, "Waiter went away before its response");
                }
                true
            }
            None => {
                tracing::debug!(request_id = %id, "Dropping response for unknown request id");
                false
            }
        }
    }

    /// Wait for the slot to be resolved, bounded by `timeout`.
    ///
    /// The entry is removed on every return path.
    pub async fn take(&self, mut slot: PendingSlot, timeout: Duration) -> McpResult<Value> {
        let waited = tokio::time::timeout(timeout, &mut slot.receiver).await;
        self.remove(&slot.id);

        match waited {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::connection(format!(
                "session closed before request {} was answered",
                slot.id
            ))),
            Err(_) => Err(McpError::timeout(format!(
                "request {} timed out after {:.1}s",
                slot.id,
                timeout.as_secs_f64()
            ))),
        }
    }

    /// Fail every pending waiter with a connection error and refuse any
    /// later registration.
    ///
    /// Returns how many waiters were woken.
    pub fn close_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut registry = self.registry();
            registry.closed.get_or_insert_with(|| reason.to_string());
            registry.waiters.drain().collect()
        };
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(McpError::connection(reason.to_string())));
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry().waiters.contains_key(id)
    }

    pub fn is_closed(&self) -> bool {
        self.registry().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.registry().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_resolve_take() {
        let registry = PendingRequests::new();
        let slot = registry.register("a").unwrap();
        assert!(registry.contains("a"));

        assert!(registry.resolve("a", Ok(json!({"ok": true}))));
        let value = registry.take(slot, Duration::from_secs(1)).await.unwrap();

        assert_eq!(value, json!({"ok": true}));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_internal_error() {
        let registry = PendingRequests::new();
        let _slot = registry.register("dup").unwrap();

        let err = registry.register("dup").unwrap_err();
        assert_eq!(err.category(), "internal");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let registry = PendingRequests::new();
        let slot = registry.register("mine").unwrap();

        assert!(!registry.resolve("someone-else", Ok(json!(1))));
        assert!(registry.contains("mine"));
        drop(slot);
    }

    #[tokio::test]
    async fn test_timeouts_never_leak_entries() {
        let registry = PendingRequests::new();
        let _long_lived = registry.register("keep").unwrap();
        let before = registry.len();

        for i in 0..5 {
            let slot = registry.register(format!("t{i}")).unwrap();
            let err = registry
                .take(slot, Duration::from_millis(5))
                .await
                .unwrap_err();
            assert_eq!(err.category(), "timeout");
        }

        assert_eq!(registry.len(), before);
        // A late answer after the timeout goes nowhere
        assert!(!registry.resolve("t0", Ok(json!("late"))));
    }

    #[tokio::test]
    async fn test_dropping_slot_removes_entry() {
        let registry = PendingRequests::new();
        let slot = registry.register("abandoned").unwrap();
        assert_eq!(registry.len(), 1);
        drop(slot);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_wakes_waiters() {
        let registry = PendingRequests::new();
        let first = registry.register("1").unwrap();
        let second = registry.register("2").unwrap();

        assert_eq!(registry.close_all("stream closed"), 2);

        let err = registry
            .take(first, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_connection_failure());
        assert!(registry.take(second, Duration::from_secs(5)).await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_after_close_fails_fast() {
        let registry = PendingRequests::new();
        registry.close_all("push stream closed");
        assert!(registry.is_closed());

        let err = registry.register("late").unwrap_err();
        assert!(err.is_connection_failure());
        assert!(err.to_string().contains("push stream closed"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_rpc_error_outcome_is_returned() {
        let registry = PendingRequests::new();
        let slot = registry.register("e").unwrap();
        registry.resolve(
            "e",
            Err(McpError::Rpc {
                code: -32602,
                message: "bad".to_string(),
            }),
        );

        let err = registry.take(slot, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.category(), "rpc");
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let registry = PendingRequests::new();
        let first = registry.register("first").unwrap();
        let second = registry.register("second").unwrap();

        let waiter_registry = registry.clone();
        let first_waiter = tokio::spawn(async move {
            waiter_registry.take(first, Duration::from_secs(5)).await
        });
        let waiter_registry = registry.clone();
        let second_waiter = tokio::spawn(async move {
            waiter_registry.take(second, Duration::from_secs(5)).await
        });

        registry.resolve("second", Ok(json!("two")));
        registry.resolve("first", Ok(json!("one")));

        assert_eq!(first_waiter.await.unwrap().unwrap(), json!("one"));
        assert_eq!(second_waiter.await.unwrap().unwrap(), json!("two"));
        assert!(registry.is_empty());
    }
}
