// ! Server-Sent Events framing
// !
// ! Splits the push stream into records, extracts `data:` payloads and
// ! classifies them into endpoint announcements, correlated responses and
// ! notifications.

use serde_json::Value;

use crate::core::error::{McpError, McpResult};
use crate::protocol::types::{ErrorObject, JsonRpcNotification};

/// Literal marker that prefixes payload-bearing records
pub const DATA_PREFIX: &[u8] = b"data:";

/// Incremental line splitter for the push stream.
///
/// Chunks from the HTTP body can end anywhere, including in the middle of a
/// multi-byte character or between `\r` and `\n`, so bytes are buffered until
/// a full line is available.
#[derive(Debug)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    max_record_size: usize,
    discarding: bool,
}

impl SseLineDecoder {
    pub fn new(max_record_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_record_size,
            discarding: false,
        }
    }

    /// Feed a chunk and collect every line it completes, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                // End of an oversized record; resume with the next line
                self.discarding = false;
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(head);
            let mut line = std::mem::take(&mut self.buffer);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_record_size {
                tracing::warn!(
                    size = line.len(),
                    limit = self.max_record_size,
                    "Dropping stream record larger than the configured limit"
                );
                continue;
            }
            lines.push(line);
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > self.max_record_size {
                tracing::warn!(
                    limit = self.max_record_size,
                    "Dropping stream record larger than the configured limit"
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        lines
    }

    /// Flush a trailing unterminated line once the stream has ended
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let discarding = std::mem::replace(&mut self.discarding, false);
        let mut line = std::mem::take(&mut self.buffer);
        if discarding || line.is_empty() {
            return None;
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Payload of a `data:` record, trimmed; `None` for other lines or empty data
pub fn data_payload(line: &[u8]) -> Option<&[u8]> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim_ascii();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// A parsed unit from the push stream
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Relative address of the session post channel (first payload only)
    Endpoint(String),
    /// Reply to a correlated request
    Response {
        /// Correlation key of the request being answered
        id: String,
        /// `result` on success, the JSON-RPC error object otherwise
        outcome: Result<Value, ErrorObject>,
    },
    /// One-way message from the server
    Notification(JsonRpcNotification),
    /// Valid JSON this client has no use for (server requests, non-objects)
    Ignored(Value),
}

/// Decode the first payload of a session as the announced endpoint.
///
/// This record is plain text, never JSON.
pub fn parse_endpoint(payload: &[u8]) -> McpResult<InboundEvent> {
    let relative = std::str::from_utf8(payload)
        .map_err(|e| McpError::protocol(format!("Endpoint announcement is not UTF-8: {e}")))?;
    Ok(InboundEvent::Endpoint(relative.to_string()))
}

/// Decode every subsequent payload as a JSON-RPC message
pub fn parse_message(payload: &[u8]) -> McpResult<InboundEvent> {
    let value: Value = serde_json::from_slice(payload)?;

    let Value::Object(mut object) = value else {
        return Ok(InboundEvent::Ignored(value));
    };

    let id = object.get("id").and_then(correlation_key);
    let has_method = object.contains_key("method");

    match (id, has_method) {
        (Some(id), false) => {
            let outcome = match object.remove("error") {
                Some(error) => Err(serde_json::from_value::<ErrorObject>(error)?),
                None => Ok(object.remove("result").unwrap_or(Value::Null)),
            };
            Ok(InboundEvent::Response { id, outcome })
        }
        (None, true) => {
            let notification = serde_json::from_value(Value::Object(object))?;
            Ok(InboundEvent::Notification(notification))
        }
        _ => Ok(InboundEvent::Ignored(Value::Object(object))),
    }
}

/// Classify a payload given whether the session endpoint is already known
pub fn classify(payload: &[u8], endpoint_known: bool) -> McpResult<InboundEvent> {
    if endpoint_known {
        parse_message(payload)
    } else {
        parse_endpoint(payload)
    }
}

/// Canonical registry key for a wire id; `None` for null or structured ids
pub fn correlation_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Join the announced endpoint onto the base address.
///
/// Absolute announcements are used as-is; a relative path without a leading
/// slash still gets exactly one separator.
pub fn resolve_post_url(base_url: &str, announced: &str) -> String {
    if announced.starts_with("http://") || announced.starts_with("https://") {
        return announced.to_string();
    }

    let base = base_url.trim_end_matches('/');
    if announced.starts_with('/') {
        format!("{base}{announced}")
    } else {
        format!("{base}/{announced}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn lines_of(decoder: &mut SseLineDecoder, chunks: &[&[u8]]) -> Vec<String> {
        chunks
            .iter()
            .flat_map(|chunk| decoder.push(chunk))
            .map(|line| String::from_utf8(line).unwrap())
            .collect()
    }

    #[test]
    fn test_decoder_joins_split_chunks() {
        let mut decoder = SseLineDecoder::new(1024);
        let lines = lines_of(
            &mut decoder,
            &[b"event: endpoint\r\nda", b"ta: /messages/abc", b"123\r", b"\n\n"],
        );

        assert_eq!(
            lines,
            vec!["event: endpoint", "data: /messages/abc123", ""]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_flushes_trailing_line() {
        let mut decoder = SseLineDecoder::new(1024);
        assert!(decoder.push(b"data: {\"id\":\"x\"}").is_empty());
        assert_eq!(decoder.finish(), Some(b"data: {\"id\":\"x\"}".to_vec()));
    }

    #[test]
    fn test_decoder_drops_oversized_record() {
        let mut decoder = SseLineDecoder::new(8);
        let lines = lines_of(&mut decoder, &[b"data: 0123456789", b"abcdef\ndata: ok\n"]);
        assert_eq!(lines, vec!["data: ok"]);
    }

    #[test]
    fn test_data_payload_marker() {
        assert_eq!(data_payload(b"data: /messages/x"), Some(&b"/messages/x"[..]));
        assert_eq!(data_payload(b"data:/messages/x"), Some(&b"/messages/x"[..]));
        assert_eq!(data_payload(b"data:   "), None);
        assert_eq!(data_payload(b"data:"), None);
        assert_eq!(data_payload(b"event: message"), None);
        assert_eq!(data_payload(b": keep-alive"), None);
        assert_eq!(data_payload(b"DATA: {}"), None);
    }

    #[test]
    fn test_endpoint_is_never_parsed_as_json() {
        assert_eq!(
            parse_endpoint(b"/messages/?session_id=42").unwrap(),
            InboundEvent::Endpoint("/messages/?session_id=42".to_string())
        );
        assert!(parse_endpoint(&[0xff, 0xfe]).is_err());

        // Even a JSON-looking first payload is taken verbatim
        assert_eq!(
            classify(br#"{"id":"X"}"#, false).unwrap(),
            InboundEvent::Endpoint(r#"{"id":"X"}"#.to_string())
        );
    }

    #[test]
    fn test_parse_correlated_response() {
        let event = parse_message(br#"{"jsonrpc":"2.0","id":"X","result":{"capabilities":{}}}"#)
            .unwrap();

        assert_eq!(
            event,
            InboundEvent::Response {
                id: "X".to_string(),
                outcome: Ok(json!({"capabilities": {}})),
            }
        );
    }

    #[test]
    fn test_parse_error_response() {
        let event = parse_message(
            br#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();

        match event {
            InboundEvent::Response { id, outcome } => {
                assert_eq!(id, "7");
                assert_eq!(outcome.unwrap_err().code, -32601);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification_and_unrelated() {
        let event = parse_message(
            br#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            InboundEvent::Notification(n) if n.method == "notifications/message"
        ));

        // Server-initiated request: has both id and method
        let event = parse_message(br#"{"jsonrpc":"2.0","id":"p1","method":"ping"}"#).unwrap();
        assert!(matches!(event, InboundEvent::Ignored(_)));

        let event = parse_message(b"[1, 2, 3]").unwrap();
        assert!(matches!(event, InboundEvent::Ignored(_)));
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_message(b"{incomplete json").unwrap_err();
        assert_eq!(err.category(), "serialization");
    }

    #[test]
    fn test_resolve_post_url() {
        assert_eq!(
            resolve_post_url("http://host:1234", "/messages/abc123"),
            "http://host:1234/messages/abc123"
        );
        assert_eq!(
            resolve_post_url("http://host:1234/", "/messages/abc123"),
            "http://host:1234/messages/abc123"
        );
        assert_eq!(
            resolve_post_url("http://host:1234", "messages/abc123"),
            "http://host:1234/messages/abc123"
        );
        assert_eq!(
            resolve_post_url("http://host:1234", "http://other:9/messages/x"),
            "http://other:9/messages/x"
        );
    }
}
