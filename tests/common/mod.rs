//! Scripted transports, connectors, and model clients for integration
//! tests. No network, no subprocesses: behavior is driven by handler
//! closures that answer JSON-RPC methods directly.

#![allow(dead_code)]

use async_trait::async_trait;
use papertrail::config::{ServerDescriptor, TransportKind};
use papertrail::error::{Error, Result};
use papertrail::llm::{ChatMessage, ModelClient, ModelReply, ToolSchema};
use papertrail::mcp::protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use papertrail::mcp::transport::{Connector, Transport};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers one JSON-RPC method; Err carries a (code, message) pair
pub type Handler =
    dyn Fn(&str, Option<Value>) -> std::result::Result<Value, (i64, String)> + Send + Sync;

/// In-memory transport scripted by a handler closure
pub struct ScriptedTransport {
    server: String,
    handler: Box<Handler>,
    /// Every request id this transport saw, in send order
    pub sent_ids: Mutex<Vec<u64>>,
    /// Notification methods, in send order
    pub notifications: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    /// Artificial latency before answering, for timeout tests
    pub delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(server: &str, handler: Box<Handler>) -> Arc<Self> {
        Arc::new(Self {
            server: server.to_string(),
            handler,
            sent_ids: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            delay: None,
        })
    }

    pub fn with_delay(server: &str, handler: Box<Handler>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            server: server.to_string(),
            handler,
            sent_ids: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            delay: Some(delay),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Cloneable handle so tests can keep the transport after handing it to
/// the manager
pub struct SharedTransport(pub Arc<ScriptedTransport>);

#[async_trait]
impl Transport for SharedTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if let Some(delay) = self.0.delay {
            tokio::time::sleep(delay).await;
        }
        self.0.sent_ids.lock().unwrap().push(request.id);

        match (self.0.handler)(&request.method, request.params) {
            Ok(result) => Ok(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Some(request.id),
                result: Some(result),
                error: None,
            }),
            Err((code, message)) => Ok(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Some(request.id),
                result: None,
                error: Some(JsonRpcError {
                    code,
                    message,
                    data: None,
                }),
            }),
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.0
            .notifications
            .lock()
            .unwrap()
            .push(notification.method);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that hands out pre-registered scripted transports by server
/// name, failing for names it does not know
#[derive(Default)]
pub struct ScriptedConnector {
    transports: Mutex<HashMap<String, Arc<ScriptedTransport>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, transport: Arc<ScriptedTransport>) {
        self.transports
            .lock()
            .unwrap()
            .insert(transport.server.clone(), transport);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> Result<Box<dyn Transport>> {
        let transport = self
            .transports
            .lock()
            .unwrap()
            .get(&descriptor.name)
            .cloned();
        match transport {
            Some(t) => Ok(Box::new(SharedTransport(t))),
            None => Err(Error::Connection {
                server: descriptor.name.clone(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Handler for a server advertising the given tools; tools/call echoes
/// the arguments back as text
pub fn tools_handler(tools: Vec<Value>) -> Box<Handler> {
    Box::new(move |method, params| match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "scripted", "version": "0.0.1"}
        })),
        "tools/list" => Ok(json!({ "tools": tools })),
        "tools/call" => {
            let args = params
                .as_ref()
                .and_then(|p| p.get("arguments"))
                .cloned()
                .unwrap_or(Value::Null);
            Ok(json!({
                "content": [{"type": "text", "text": args.to_string()}],
                "isError": false
            }))
        }
        other => Err((-32601, format!("method not found: {}", other))),
    })
}

/// Handler mimicking the research server: search_papers and extract_info
/// tools plus a papers:// resource template
pub fn research_handler() -> Box<Handler> {
    Box::new(move |method, params| match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
            "serverInfo": {"name": "research", "version": "0.0.1"}
        })),
        "tools/list" => Ok(json!({
            "tools": [
                {
                    "name": "search_papers",
                    "description": "Search arXiv for papers",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "topic": {"type": "string"},
                            "max_results": {"type": "integer"}
                        },
                        "required": ["topic"]
                    }
                },
                {
                    "name": "extract_info",
                    "description": "Extract metadata for one paper",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"paper_id": {"type": "string"}},
                        "required": ["paper_id"]
                    }
                }
            ]
        })),
        "resources/list" => Ok(json!({
            "resources": [{
                "uri": "papers://folders",
                "name": "folders",
                "description": "Available topic folders"
            }]
        })),
        "resources/templates/list" => Ok(json!({
            "resourceTemplates": [{
                "uriTemplate": "papers://{topic}",
                "name": "papers by topic",
                "description": ""
            }]
        })),
        "prompts/list" => Ok(json!({
            "prompts": [{
                "name": "research_brief",
                "description": "Summarize recent work on a topic",
                "arguments": [
                    {"name": "topic", "required": true},
                    {"name": "num_papers", "required": false}
                ]
            }]
        })),
        "tools/call" => {
            let params = params.unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            match name {
                "search_papers" => Ok(json!({
                    "content": [{"type": "text", "text": "[\"2301.0001\", \"2301.0002\"]"}],
                    "structuredContent": {"result": ["2301.0001", "2301.0002"]},
                    "isError": false
                })),
                "extract_info" => {
                    let id = params
                        .get("arguments")
                        .and_then(|a| a.get("paper_id"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    Ok(json!({
                        "content": [{
                            "type": "text",
                            "text": format!("{{\"id\": \"{}\", \"title\": \"Paper {}\"}}", id, id)
                        }],
                        "isError": false
                    }))
                }
                other => Err((-32601, format!("unknown tool: {}", other))),
            }
        }
        "resources/read" => {
            let uri = params
                .as_ref()
                .and_then(|p| p.get("uri"))
                .and_then(Value::as_str)
                .unwrap_or("");
            Ok(json!({
                "contents": [{"uri": uri, "text": format!("contents of {}", uri)}]
            }))
        }
        "prompts/get" => Ok(json!({
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": "Find recent papers and summarize them."}
            }]
        })),
        other => Err((-32601, format!("method not found: {}", other))),
    })
}

pub fn descriptor(name: &str) -> ServerDescriptor {
    ServerDescriptor {
        name: name.to_string(),
        transport: TransportKind::Stdio,
        command: Some("scripted".to_string()),
        args: Vec::new(),
        env: HashMap::new(),
        url: None,
        headers: HashMap::new(),
        enabled: true,
    }
}

/// Model client scripted with a fixed reply sequence; repeats the last
/// reply once the script runs out
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    last: Mutex<Option<ModelReply>>,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolSchema]>,
    ) -> Result<ModelReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        match replies.pop_front() {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                Ok(reply)
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::Model("script exhausted".to_string())),
        }
    }
}
