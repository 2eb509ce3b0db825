// Copyright (c) 2025 MCP Rust Contributors
// SPDX-License-Identifier: MIT

// ! End-to-end tests against a real SSE server
// !
// ! An axum server on an ephemeral port announces a per-session endpoint on
// ! GET /mcp-sse and answers every POST on that session's event stream.

#![cfg(feature = "http")]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Sse, sse::Event},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use sse_mcp_client::{
    McpSseClient,
    client::{ClientConfig, SessionState},
};
use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct ServerState {
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<Event>>>,
    opened: AtomicUsize,
    posts: Mutex<Vec<Value>>,
}

impl ServerState {
    fn send(&self, session: &str, message: Value) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(tx) = sessions.get(session) {
            let _ = tx.send(Event::default().data(message.to_string()));
        }
    }
}

async fn open_stream(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let n = state.opened.fetch_add(1, Ordering::SeqCst);
    let session = format!("s{n}");
    let (tx, rx) = mpsc::unbounded_channel();

    let _ = tx.send(
        Event::default()
            .event("endpoint")
            .data(format!("/messages/{session}")),
    );
    state.sessions.lock().unwrap().insert(session, tx);

    Sse::new(UnboundedReceiverStream::new(rx).map(Ok))
}

async fn handle_post(
    State(state): State<Arc<ServerState>>,
    Path(session): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    if !state.sessions.lock().unwrap().contains_key(&session) {
        return StatusCode::NOT_FOUND;
    }
    state.posts.lock().unwrap().push(body.clone());

    let id = body["id"].clone();
    let reply = |result: Value| json!({"jsonrpc": "2.0", "id": id, "result": result});

    match body["method"].as_str() {
        Some("initialize") => state.send(
            &session,
            reply(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "test-file-server", "version": "0.1.0"}
            })),
        ),
        Some("tools/list") => state.send(
            &session,
            reply(json!({"tools": [
                {"name": "echo", "inputSchema": {"type": "object"}},
                {"name": "delay", "inputSchema": {"type": "object"}}
            ]})),
        ),
        Some("tools/call") => {
            let args = &body["params"]["arguments"];
            match body["params"]["name"].as_str() {
                Some("echo") => state.send(
                    &session,
                    reply(json!({"content": [{"type": "text", "text": args["message"]}]})),
                ),
                Some("delay") => {
                    let ms = args["ms"].as_u64().unwrap_or(0);
                    let text = format!("slept {ms}ms");
                    let message = reply(json!({"content": [{"type": "text", "text": text}]}));
                    let state = state.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        state.send(&session, message);
                    });
                }
                Some("hangup") => {
                    state.sessions.lock().unwrap().remove(&session);
                }
                // "never" and anything else go unanswered
                _ => {}
            }
        }
        _ => {}
    }

    StatusCode::ACCEPTED
}

async fn start_server() -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/mcp-sse", get(open_stream))
        .route("/messages/{session}", post(handle_post))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn wait_for_state(client: &McpSseClient, expected: SessionState) {
    for _ in 0..200 {
        if client.state().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client never reached {expected}");
}

#[tokio::test]
async fn test_connect_and_call_tool() {
    let (base, state) = start_server().await;
    let client = McpSseClient::new(base.clone()).unwrap();

    client.connect().await.unwrap();
    assert_eq!(client.state().await, SessionState::Ready);
    assert_eq!(client.post_url().await, Some(format!("{base}/messages/s0")));
    assert_eq!(client.server_info().await.unwrap().name, "test-file-server");

    let text = client
        .call_tool("echo", args(&[("message", json!("hello over sse"))]))
        .await;
    assert_eq!(text, "hello over sse");

    let posts = state.posts.lock().unwrap().clone();
    let methods: Vec<&str> = posts.iter().filter_map(|p| p["method"].as_str()).collect();
    assert_eq!(methods, vec!["initialize", "notifications/initialized", "tools/call"]);
    assert!(posts[1].get("id").is_none());
}

#[tokio::test]
async fn test_call_tool_connects_lazily() {
    let (base, state) = start_server().await;
    let client = McpSseClient::new(base).unwrap();

    let tools = client.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "delay"]);
    assert_eq!(state.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
    let (base, _state) = start_server().await;
    let client = Arc::new(McpSseClient::new(base).unwrap());
    client.connect().await.unwrap();

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("delay", args(&[("ms", json!(300))])).await })
    };
    let fast = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("delay", args(&[("ms", json!(10))])).await })
    };

    assert_eq!(fast.await.unwrap(), "slept 10ms");
    assert_eq!(slow.await.unwrap(), "slept 300ms");
    assert_eq!(client.pending_requests().await, 0);
}

#[tokio::test]
async fn test_timeout_returns_text_and_next_call_reconnects() {
    let (base, state) = start_server().await;
    let client = McpSseClient::new(base).unwrap();
    client.connect().await.unwrap();

    let text = client
        .call_tool_with_timeout("never", HashMap::new(), Duration::from_millis(100))
        .await;
    assert!(text.starts_with("Error: tool call 'never' failed"), "{text}");
    assert!(text.contains("timed out"), "{text}");
    assert_eq!(client.pending_requests().await, 0);
    assert_eq!(client.state().await, SessionState::Disconnected);

    let text = client
        .call_tool("echo", args(&[("message", json!("back again"))]))
        .await;
    assert_eq!(text, "back again");
    assert_eq!(state.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_server_closing_stream_resets_session() {
    let (base, state) = start_server().await;
    let client = McpSseClient::new(base).unwrap();
    client.connect().await.unwrap();

    // The server drops the session; the post itself is accepted
    let text = client
        .call_tool_with_timeout("hangup", HashMap::new(), Duration::from_secs(5))
        .await;
    assert!(text.starts_with("Error:"), "{text}");
    wait_for_state(&client, SessionState::Disconnected).await;

    let text = client
        .call_tool("echo", args(&[("message", json!("reconnected"))]))
        .await;
    assert_eq!(text, "reconnected");
    assert_eq!(state.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_server_yields_error_text() {
    let mut config = ClientConfig::new("http://127.0.0.1:1");
    config.transport.connect_timeout_ms = 2_000;
    let client = McpSseClient::with_config(config).unwrap();

    let text = client.call_tool("echo", HashMap::new()).await;
    assert!(text.starts_with("Error: tool call 'echo' failed"), "{text}");

    let err = client.connect().await.unwrap_err();
    assert!(err.is_connection_failure());
    assert_eq!(client.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_then_reconnect() {
    let (base, state) = start_server().await;
    let client = McpSseClient::new(base).unwrap();
    client.connect().await.unwrap();

    client.disconnect().await;
    assert_eq!(client.state().await, SessionState::Disconnected);
    assert!(client.post_url().await.is_none());

    client.connect().await.unwrap();
    assert!(client.is_ready().await);
    assert_eq!(state.opened.load(Ordering::SeqCst), 2);
}
