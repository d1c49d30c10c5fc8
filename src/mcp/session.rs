//! One handshaken conversation with a single MCP server.
//!
//! The session owns the request-id counter (starts at 1, never reused),
//! enforces the initialize-first rule, and maps server-reported JSON-RPC
//! failures into the crate error taxonomy with the server name attached.

use crate::error::{
    Error, PromptErrorKind, ResourceErrorKind, Result, ToolErrorKind, TransportErrorKind,
};
use crate::mcp::protocol::{
    self, error_codes, GetPromptResult, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    PromptDef, ReadResourceResult, ResourceDef, ResourceTemplateDef, ServerCapabilities,
    ToolCallResult, ToolDef,
};
use crate::mcp::transport::Transport;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Everything one server advertised during discovery
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub tools: Vec<ToolDef>,
    pub resources: Vec<ResourceDef>,
    pub resource_templates: Vec<ResourceTemplateDef>,
    pub prompts: Vec<PromptDef>,
}

impl Discovery {
    pub fn capability_count(&self) -> usize {
        self.tools.len() + self.resources.len() + self.resource_templates.len() + self.prompts.len()
    }
}

/// Server-reported JSON-RPC failure, before taxonomy mapping
struct RpcError {
    code: i64,
    message: String,
}

pub struct Session {
    server: String,
    transport: Box<dyn Transport>,
    /// Private counter; every outbound request takes the next id
    next_id: AtomicU64,
    initialized: AtomicBool,
    alive: AtomicBool,
    timeout: Duration,
    capabilities: RwLock<ServerCapabilities>,
}

impl Session {
    pub fn new(server: impl Into<String>, transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            transport,
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            timeout,
            capabilities: RwLock::new(ServerCapabilities::default()),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Run the initialize handshake. Must be called exactly once, before
    /// any other operation.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(Error::Handshake {
                server: self.server.clone(),
                message: "session is already initialized".to_string(),
            });
        }

        let params = json!({
            "protocolVersion": protocol::PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "papertrail",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let result = self
            .raw_call("initialize", Some(params))
            .await
            .map_err(|e| self.handshake_err(e))?
            .map_err(|e| Error::Handshake {
                server: self.server.clone(),
                message: format!("server error {}: {}", e.code, e.message),
            })?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| Error::Handshake {
                server: self.server.clone(),
                message: format!("unparseable initialize result: {}", e),
            })?;

        *self.capabilities.write().await = init.capabilities.clone();
        self.initialized.store(true, Ordering::SeqCst);

        // Complete the handshake; failure here is not fatal
        let _ = self
            .transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await;

        tracing::info!(server = %self.server, "session initialized");
        Ok(init)
    }

    pub async fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.read().await.clone()
    }

    /// List the server's tools. Idempotent; call again for freshness.
    pub async fn list_tools(&self) -> Result<Vec<ToolDef>> {
        let result = self.call("tools/list", None).await?;
        self.parse_list(&result, "tools")
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDef>> {
        let result = self.call("resources/list", None).await?;
        self.parse_list(&result, "resources")
    }

    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplateDef>> {
        let result = self.call("resources/templates/list", None).await?;
        self.parse_list(&result, "resourceTemplates")
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptDef>> {
        let result = self.call("prompts/list", None).await?;
        self.parse_list(&result, "prompts")
    }

    /// Discover everything the server advertises, guided by its declared
    /// capabilities. Optional capability classes that fail to list are
    /// skipped with a warning rather than failing discovery, matching how
    /// servers in the wild behave.
    pub async fn discover(&self) -> Result<Discovery> {
        let capabilities = self.capabilities().await;
        let mut discovery = Discovery::default();

        if capabilities.tools.is_some() {
            discovery.tools = self.list_tools().await?;
        }

        if capabilities.resources.is_some() {
            match self.list_resources().await {
                Ok(resources) => discovery.resources = resources,
                Err(e) => tracing::warn!(server = %self.server, "could not list resources: {}", e),
            }
            match self.list_resource_templates().await {
                Ok(templates) => discovery.resource_templates = templates,
                Err(e) => {
                    tracing::warn!(server = %self.server, "could not list resource templates: {}", e)
                }
            }
        }

        if capabilities.prompts.is_some() {
            match self.list_prompts().await {
                Ok(prompts) => discovery.prompts = prompts,
                Err(e) => tracing::warn!(server = %self.server, "could not list prompts: {}", e),
            }
        }

        tracing::debug!(
            server = %self.server,
            tools = discovery.tools.len(),
            resources = discovery.resources.len(),
            templates = discovery.resource_templates.len(),
            prompts = discovery.prompts.len(),
            "discovery complete"
        );
        Ok(discovery)
    }

    /// Invoke a tool on this server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .checked_call("tools/call", Some(params))
            .await?
            .map_err(|e| Error::Tool {
                server: self.server.clone(),
                name: name.to_string(),
                kind: tool_error_kind(e.code),
                message: e.message,
            })?;

        serde_json::from_value(result).map_err(|e| Error::Tool {
            server: self.server.clone(),
            name: name.to_string(),
            kind: ToolErrorKind::ExecutionFailed,
            message: format!("unparseable tool result: {}", e),
        })
    }

    /// Read a resource by URI
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let params = json!({ "uri": uri });
        let result = self
            .checked_call("resources/read", Some(params))
            .await?
            .map_err(|e| Error::Resource {
                server: self.server.clone(),
                uri: uri.to_string(),
                kind: resource_error_kind(e.code),
                message: e.message,
            })?;

        serde_json::from_value(result).map_err(|e| Error::Resource {
            server: self.server.clone(),
            uri: uri.to_string(),
            kind: ResourceErrorKind::AccessDenied,
            message: format!("unparseable resource contents: {}", e),
        })
    }

    /// Render a prompt template with the given arguments
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<GetPromptResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .checked_call("prompts/get", Some(params))
            .await?
            .map_err(|e| Error::Prompt {
                server: self.server.clone(),
                name: name.to_string(),
                kind: prompt_error_kind(e.code),
                message: e.message,
            })?;

        serde_json::from_value(result).map_err(|e| Error::Prompt {
            server: self.server.clone(),
            name: name.to_string(),
            kind: PromptErrorKind::InvalidArguments,
            message: format!("unparseable prompt result: {}", e),
        })
    }

    /// Close the underlying transport. Tolerates an already-dead channel.
    pub async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.transport.close().await
    }

    /// Issue a request, requiring an initialized session and mapping
    /// server-reported errors to a generic transport failure. Used by the
    /// discovery calls, which have no per-capability error class.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.checked_call(method, params)
            .await?
            .map_err(|e| Error::Transport {
                server: self.server.clone(),
                kind: TransportErrorKind::Io,
                message: format!("server error {}: {}", e.code, e.message),
            })
    }

    async fn checked_call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<std::result::Result<Value, RpcError>> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized {
                server: self.server.clone(),
            });
        }
        self.raw_call(method, params).await
    }

    /// One request/response exchange with the per-call timeout applied.
    /// On expiry a best-effort cancellation notice is sent; the transport
    /// itself stays usable for other calls.
    async fn raw_call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<std::result::Result<Value, RpcError>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let outcome = tokio::time::timeout(self.timeout, self.transport.send(request)).await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                if matches!(
                    e,
                    Error::Transport {
                        kind: TransportErrorKind::Closed,
                        ..
                    }
                ) {
                    self.alive.store(false, Ordering::SeqCst);
                }
                return Err(e);
            }
            Err(_) => {
                let _ = self
                    .transport
                    .notify(JsonRpcNotification::new(
                        "notifications/cancelled",
                        Some(json!({ "requestId": id, "reason": "timeout" })),
                    ))
                    .await;
                return Err(Error::Transport {
                    server: self.server.clone(),
                    kind: TransportErrorKind::Timeout,
                    message: format!("'{}' timed out after {:?}", method, self.timeout),
                });
            }
        };

        if let Some(error) = response.error {
            return Ok(Err(RpcError {
                code: error.code,
                message: error.message,
            }));
        }

        match response.result {
            Some(result) => Ok(Ok(result)),
            None => Err(Error::Transport {
                server: self.server.clone(),
                kind: TransportErrorKind::Malformed,
                message: format!("response to '{}' has neither result nor error", method),
            }),
        }
    }

    fn handshake_err(&self, source: Error) -> Error {
        match source {
            e @ Error::Transport { .. } | e @ Error::Connection { .. } => Error::Handshake {
                server: self.server.clone(),
                message: e.to_string(),
            },
            other => other,
        }
    }

    fn parse_list<T: serde::de::DeserializeOwned>(
        &self,
        result: &Value,
        field: &str,
    ) -> Result<Vec<T>> {
        match result.get(field) {
            Some(items) => serde_json::from_value(items.clone()).map_err(|e| Error::Transport {
                server: self.server.clone(),
                kind: TransportErrorKind::Malformed,
                message: format!("unparseable '{}' list: {}", field, e),
            }),
            None => Ok(Vec::new()),
        }
    }
}

fn tool_error_kind(code: i64) -> ToolErrorKind {
    match code {
        error_codes::METHOD_NOT_FOUND => ToolErrorKind::NotFound,
        error_codes::INVALID_PARAMS => ToolErrorKind::InvalidArguments,
        _ => ToolErrorKind::ExecutionFailed,
    }
}

fn resource_error_kind(code: i64) -> ResourceErrorKind {
    match code {
        error_codes::METHOD_NOT_FOUND | -32002 => ResourceErrorKind::NotFound,
        _ => ResourceErrorKind::AccessDenied,
    }
}

fn prompt_error_kind(code: i64) -> PromptErrorKind {
    match code {
        error_codes::INVALID_PARAMS => PromptErrorKind::InvalidArguments,
        _ => PromptErrorKind::NotFound,
    }
}
