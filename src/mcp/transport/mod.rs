//! Transport implementations for MCP servers.
//!
//! Three interchangeable channels share one contract:
//! - STDIO: spawn a child process and speak newline-delimited JSON-RPC
//!   over stdin/stdout
//! - SSE: POST requests to an endpoint, decode responses from a
//!   server-sent event stream
//! - HTTP: one request/response round trip per call
//!
//! Transport choice is invisible above this layer; the session sees the
//! same request/response semantics regardless of variant.

mod http;
mod sse;
mod stdio;

pub use http::HttpTransport;
pub use sse::{SseDecoder, SseTransport};
pub use stdio::StdioTransport;

use crate::config::{ServerDescriptor, TransportKind};
use crate::error::Result;
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;

/// One bidirectional message channel to a server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification (no response expected)
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Release the channel. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Open a transport for a descriptor, selected by its declared kind
pub async fn connect(descriptor: &ServerDescriptor) -> Result<Box<dyn Transport>> {
    match descriptor.transport {
        TransportKind::Stdio => Ok(Box::new(StdioTransport::spawn(descriptor).await?)),
        TransportKind::Sse => Ok(Box::new(SseTransport::open(descriptor)?)),
        TransportKind::Http => Ok(Box::new(HttpTransport::open(descriptor)?)),
    }
}

/// Seam between the manager and concrete transports, so tests can inject
/// in-memory channels.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Box<dyn Transport>>;
}

/// Production connector: dispatches on the descriptor's transport kind
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Box<dyn Transport>> {
        connect(descriptor).await
    }
}
