// ! HTTP transport implementation for the SSE client
// !
// ! Module provides the reqwest-backed push stream (GET, `text/event-stream`)
// ! and post channel (POST, JSON) used by every session.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::time::Duration;

use crate::core::error::{McpError, McpResult};
use crate::core::logging::ErrorContext;
use crate::transport::traits::{EventStream, SseTransport, TransportConfig};

const EVENT_STREAM: &str = "text/event-stream";

/// HTTP transport for SSE MCP clients
///
/// Holds a single connection pool shared by the push stream and every post.
/// No client-wide request timeout is set: the push stream lives as long as
/// the session, so bounds are applied per call instead.
#[derive(Debug, Clone)]
pub struct HttpSseTransport {
    pub(crate) client: Client,
    pub(crate) headers: HeaderMap,
    pub(crate) config: TransportConfig,
}

impl HttpSseTransport {
    /// Create a new HTTP transport with default configuration
    pub fn new() -> McpResult<Self> {
        Self::with_config(TransportConfig::default())
    }

    /// Create a new HTTP transport with custom configuration
    ///
    /// # Arguments
    /// * `config` - Transport configuration
    ///
    /// # Returns
    /// Result containing the transport or an error
    pub fn with_config(config: TransportConfig) -> McpResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| McpError::Http(format!("Failed to create HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                key.parse::<HeaderName>(),
                value.parse::<HeaderValue>(),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %key, "Skipping invalid custom header"),
            }
        }

        Ok(Self {
            client,
            headers,
            config,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl SseTransport for HttpSseTransport {
    async fn open_stream(&self, url: &str, connect_timeout: Duration) -> McpResult<EventStream> {
        let context = ErrorContext::new("open_stream")
            .with_transport("http")
            .with_extra("url", url);

        let request = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache");

        // Only establishing the stream is bounded; the body is read for the
        // lifetime of the session.
        let response = match tokio::time::timeout(connect_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let error = McpError::connection(format!("Failed to open push stream: {e}"));
                error.log_with_context(context);
                return Err(error);
            }
            Err(_) => {
                let error = McpError::connection(format!(
                    "Push stream not established within {:.1}s",
                    connect_timeout.as_secs_f64()
                ));
                error.log_with_context(context);
                return Err(error);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error = McpError::connection(format!(
                "Push stream rejected: HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ));
            error.log_with_context(context);
            return Err(error);
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.starts_with(EVENT_STREAM) {
                tracing::warn!(
                    content_type,
                    url,
                    "Push stream served with unexpected content type"
                );
            }
        }

        tracing::debug!(url, "Push stream opened");

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| McpError::transport(format!("Push stream read failed: {e}")))
            })
            .boxed())
    }

    async fn post_message(&self, url: &str, body: &Value, timeout: Duration) -> McpResult<()> {
        let method = body
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let context = ErrorContext::new("post_message")
            .with_transport("http")
            .with_method(method)
            .with_extra("url", url);

        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let error = McpError::from(e);
                error.log_with_context(context.clone());
                error
            })?;

        // Servers typically answer 202 Accepted; the payload arrives on the stream
        let status = response.status();
        if !status.is_success() {
            let error = McpError::Http(format!(
                "status {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ));
            error.log_with_context(context);
            return Err(error);
        }

        Ok(())
    }

    fn connection_info(&self) -> String {
        format!(
            "HTTP SSE transport (connect timeout {}ms, post timeout {}ms)",
            self.config.connect_timeout_ms, self.config.post_timeout_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_custom_headers_are_applied() {
        let mut headers = HashMap::new();
        headers.insert("X-Agent".to_string(), "planner".to_string());
        headers.insert("bad header".to_string(), "x".to_string());
        let transport = HttpSseTransport::with_config(TransportConfig {
            headers,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(transport.headers.len(), 1);
        assert_eq!(transport.headers.get("x-agent").unwrap(), "planner");
        assert!(transport.connection_info().contains("connect timeout 10000ms"));
    }

    #[tokio::test]
    async fn test_post_message_accepted() {
        let mock_server = MockServer::start().await;
        let body = json!({"jsonrpc": "2.0", "method": "notifications/initialized", "params": {}});

        Mock::given(method("POST"))
            .and(path("/messages/abc"))
            .and(header("content-type", "application/json"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpSseTransport::new().unwrap();
        transport
            .post_message(
                &format!("{}/messages/abc", mock_server.uri()),
                &body,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_message_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let transport = HttpSseTransport::new().unwrap();
        let err = transport
            .post_message(
                &format!("{}/messages/gone", mock_server.uri()),
                &json!({"jsonrpc": "2.0", "method": "ping", "id": "1"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();

        match err {
            McpError::Http(msg) => assert!(msg.starts_with("status 404")),
            other => panic!("Expected HTTP error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_stream_reads_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp-sse"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("event: endpoint\ndata: /messages/abc\n\n"),
            )
            .mount(&mock_server)
            .await;

        let transport = HttpSseTransport::new().unwrap();
        let mut stream = transport
            .open_stream(
                &format!("{}/mcp-sse", mock_server.uri()),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"event: endpoint\ndata: /messages/abc\n\n");
    }

    #[tokio::test]
    async fn test_open_stream_rejected_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let transport = HttpSseTransport::new().unwrap();
        let err = match transport
            .open_stream(
                &format!("{}/mcp-sse", mock_server.uri()),
                Duration::from_secs(5),
            )
            .await
        {
            Ok(_) => panic!("Expected the stream to be rejected"),
            Err(e) => e,
        };

        assert_eq!(err.category(), "connection");
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_open_stream_connection_refused() {
        let transport = HttpSseTransport::new().unwrap();
        let result = transport
            .open_stream("http://127.0.0.1:1/mcp-sse", Duration::from_secs(5))
            .await;

        match result {
            Err(e) => assert!(e.is_connection_failure()),
            Ok(_) => panic!("Expected connection failure"),
        }
    }
}
