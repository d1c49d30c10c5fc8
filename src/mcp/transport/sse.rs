//! SSE transport: requests are POSTed to the endpoint and responses are
//! decoded from the server-sent event stream in the reply body.

use crate::config::ServerDescriptor;
use crate::error::{Error, Result, TransportErrorKind};
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Server-Sent Events decoder
///
/// Buffers incoming bytes and extracts complete `data:` payloads.
/// Tolerates events split across chunks, multiple events per chunk, and a
/// final event without a trailing newline.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push incoming bytes and extract complete `data:` payloads.
    /// Incomplete events remain buffered for the next `push()` or `finish()`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim().to_string();
            self.buffer = self.buffer[newline_pos + 1..].to_string();

            if line.is_empty() {
                continue;
            }
            if let Some(payload) = line.strip_prefix("data:") {
                payloads.push(payload.trim().to_string());
            }
        }

        payloads
    }

    /// Flush remaining buffered content when the stream ends, extracting a
    /// final event that has no trailing newline.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        for line in self.buffer.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(payload) = line.strip_prefix("data:") {
                payloads.push(payload.trim().to_string());
            }
        }
        self.buffer.clear();
        payloads
    }
}

/// Transport over a streaming HTTP endpoint
pub struct SseTransport {
    server: String,
    url: String,
    client: reqwest::Client,
}

impl SseTransport {
    /// Build the client for a descriptor. No connection happens until the
    /// first request.
    pub fn open(descriptor: &ServerDescriptor) -> Result<Self> {
        let url = descriptor.url.clone().ok_or_else(|| {
            Error::Config(format!("server '{}' has no url", descriptor.name))
        })?;
        let headers = header_map(descriptor)?;
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Connection {
                server: descriptor.name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            server: descriptor.name.clone(),
            url,
            client,
        })
    }

    fn transport_err(&self, kind: TransportErrorKind, message: impl Into<String>) -> Error {
        Error::Transport {
            server: self.server.clone(),
            kind,
            message: message.into(),
        }
    }
}

/// Convert descriptor headers (opaque credentials included) into a header map
pub(super) fn header_map(descriptor: &ServerDescriptor) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (key, value) in &descriptor.headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            Error::Config(format!(
                "server '{}' has an invalid header name '{}': {}",
                descriptor.name, key, e
            ))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            Error::Config(format!(
                "server '{}' has an invalid header value for '{}': {}",
                descriptor.name, key, e
            ))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl super::Transport for SseTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let expected_id = request.id;
        let response = self
            .client
            .post(&self.url)
            .header("accept", "text/event-stream, application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.transport_err(
                TransportErrorKind::Io,
                format!("server returned {}", response.status()),
            ));
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        // Drain the event stream until the response for this id shows up
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;
            for payload in decoder.push(&chunk) {
                if let Some(response) = self.match_payload(&payload, expected_id)? {
                    return Ok(response);
                }
            }
        }
        for payload in decoder.finish() {
            if let Some(response) = self.match_payload(&payload, expected_id)? {
                return Ok(response);
            }
        }

        Err(self.transport_err(
            TransportErrorKind::Closed,
            "event stream ended before a response arrived",
        ))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Stateless between calls; nothing to release
        Ok(())
    }
}

impl SseTransport {
    /// Parse one event payload; Ok(None) means "keep reading"
    fn match_payload(&self, payload: &str, expected_id: u64) -> Result<Option<JsonRpcResponse>> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| self.transport_err(TransportErrorKind::Malformed, e.to_string()))?;
        if value.get("id").is_none() || value.get("id") == Some(&serde_json::Value::Null) {
            tracing::debug!(server = %self.server, "skipping server event");
            return Ok(None);
        }

        let response: JsonRpcResponse = serde_json::from_value(value)
            .map_err(|e| self.transport_err(TransportErrorKind::Malformed, e.to_string()))?;
        match response.id {
            Some(id) if id == expected_id => Ok(Some(response)),
            other => {
                tracing::warn!(
                    server = %self.server,
                    "dropping event with unrecognized id {:?} (expected {})",
                    other,
                    expected_id
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_event() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: {\"hello\":\"world\"}\n\n");
        assert_eq!(payloads, vec!["{\"hello\":\"world\"}"]);
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"text\":\"hel").is_empty());
        assert_eq!(decoder.push(b"lo\"}\n\n"), vec!["{\"text\":\"hello\"}"]);
    }

    #[test]
    fn final_event_without_trailing_newline() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"b\":2}").is_empty());
        assert_eq!(decoder.finish(), vec!["{\"b\":2}"]);
        // Buffer was cleared
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn non_data_lines_ignored() {
        let mut decoder = SseDecoder::new();
        let payloads =
            decoder.push(b": comment\ndata: {\"x\":1}\nevent: message\ndata: {\"y\":2}\n\n");
        assert_eq!(payloads, vec!["{\"x\":1}", "{\"y\":2}"]);
    }
}
