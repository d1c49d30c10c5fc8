//! HTTP transport: one request/response round trip per call, no state
//! held between calls.

use crate::config::ServerDescriptor;
use crate::error::{Error, Result, TransportErrorKind};
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;

pub struct HttpTransport {
    server: String,
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn open(descriptor: &ServerDescriptor) -> Result<Self> {
        let url = descriptor.url.clone().ok_or_else(|| {
            Error::Config(format!("server '{}' has no url", descriptor.name))
        })?;
        let headers = super::sse::header_map(descriptor)?;
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

#[async_trait]
impl super::Transport for HttpTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let expected_id = request.id;
        let http_response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;

        if !http_response.status().is_success() {
            return Err(self.transport_err(
                TransportErrorKind::Io,
                format!("server returned {}", http_response.status()),
            ));
        }

        let response: JsonRpcResponse = http_response
            .json()
            .await
            .map_err(|e| self.transport_err(TransportErrorKind::Malformed, e.to_string()))?;

        match response.id {
            Some(id) if id == expected_id => Ok(response),
            other => {
                tracing::warn!(
                    server = %self.server,
                    "dropping response with unrecognized id {:?} (expected {})",
                    other,
                    expected_id
                );
                Err(self.transport_err(
                    TransportErrorKind::Malformed,
                    format!("response id {:?} does not match request {}", other, expected_id),
                ))
            }
        }
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
        Ok(())
    }
}
