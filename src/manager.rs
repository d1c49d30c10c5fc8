//! Client manager: owns the sessions, drives startup and shutdown, and
//! exposes the unified call surface over the capability registry.

use crate::binder::{self, ParamSpec};
use crate::config::{LimitSettings, ServerDescriptor};
use crate::error::{Error, Result};
use crate::mcp::protocol::{GetPromptResult, ReadResourceResult, ToolCallResult};
use crate::mcp::session::{Discovery, Session};
use crate::mcp::transport::{Connector, DefaultConnector};
use crate::registry::{CapabilityEntry, CapabilityKind, CapabilityRegistry};
use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// What start() accomplished
#[derive(Debug, Default)]
pub struct StartReport {
    /// Servers that connected, initialized, and registered
    pub connected: Vec<String>,
    /// Servers that failed, with the failure; startup of the others
    /// proceeded regardless
    pub failed: Vec<(String, Error)>,
    /// Name collisions encountered while merging discovery results
    pub collisions: Vec<Error>,
}

/// Observability row for one configured server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub connected: bool,
    pub capabilities: usize,
}

/// Result of a shortcut invocation, tagged by capability kind
#[derive(Debug, Clone)]
pub enum InvocationOutput {
    Tool(ToolCallResult),
    Resource(ReadResourceResult),
    Prompt(GetPromptResult),
}

impl InvocationOutput {
    pub fn to_text(&self) -> String {
        match self {
            Self::Tool(result) => result.to_text(),
            Self::Resource(result) => result.to_text(),
            Self::Prompt(result) => result.rendered(),
        }
    }
}

pub struct ClientManager {
    connector: Box<dyn Connector>,
    timeout: Duration,
    fan_out: usize,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Names in the order sessions actually came up; shutdown walks this
    /// in reverse
    start_order: RwLock<Vec<String>>,
    registry: RwLock<CapabilityRegistry>,
    /// Servers marked unavailable after a startup failure
    unavailable: RwLock<Vec<String>>,
    shut_down: AtomicBool,
}

impl ClientManager {
    pub fn new(limits: &LimitSettings) -> Self {
        Self::with_connector(limits, Box::new(DefaultConnector))
    }

    /// Build a manager with a custom transport connector (tests inject
    /// in-memory channels here)
    pub fn with_connector(limits: &LimitSettings, connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            timeout: Duration::from_secs(limits.request_timeout_secs),
            fan_out: limits.connect_fan_out.max(1),
            sessions: RwLock::new(HashMap::new()),
            start_order: RwLock::new(Vec::new()),
            registry: RwLock::new(CapabilityRegistry::new()),
            unavailable: RwLock::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Connect, initialize, discover, and register every enabled server.
    ///
    /// Descriptor validation failures are fatal; a single server's startup
    /// failure is logged, the server is marked unavailable, and the rest
    /// proceed. If every enabled server fails, startup as a whole fails.
    /// Connections run concurrently, bounded by the configured fan-out
    /// limit.
    pub async fn start(&self, descriptors: &[ServerDescriptor]) -> Result<StartReport> {
        for descriptor in descriptors {
            descriptor.validate()?;
        }

        let enabled: Vec<&ServerDescriptor> =
            descriptors.iter().filter(|d| d.enabled).collect();
        tracing::info!("connecting to {} server(s)", enabled.len());

        let mut report = StartReport::default();
        let mut outcomes = futures::stream::iter(enabled.into_iter().map(|descriptor| {
            let name = descriptor.name.clone();
            async move { (name, self.bring_up(descriptor).await) }
        }))
        .buffer_unordered(self.fan_out);

        while let Some((name, outcome)) = outcomes.next().await {
            match outcome {
                Ok((session, discovery)) => {
                    let collisions = {
                        let mut registry = self.registry.write().await;
                        registry.register(&name, &discovery)
                    };
                    for collision in &collisions {
                        tracing::warn!("{}", collision);
                    }
                    report.collisions.extend(collisions);

                    self.sessions.write().await.insert(name.clone(), session);
                    self.start_order.write().await.push(name.clone());
                    tracing::info!(server = %name, "server connected");
                    report.connected.push(name);
                }
                Err(e) => {
                    tracing::warn!(server = %name, "startup failed: {}", e);
                    self.unavailable.write().await.push(name.clone());
                    report.failed.push((name, e));
                }
            }
        }

        // Per-server failures are tolerated; losing all of them is not
        if report.connected.is_empty() && !report.failed.is_empty() {
            return Err(Error::AllServersFailed {
                attempted: report.failed.len(),
            });
        }

        Ok(report)
    }

    /// Open one session: transport, handshake, discovery
    async fn bring_up(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<(Arc<Session>, Discovery)> {
        let transport = self.connector.connect(descriptor).await?;
        let session = Arc::new(Session::new(&descriptor.name, transport, self.timeout));
        session.initialize().await?;
        let discovery = session.discover().await?;
        Ok((session, discovery))
    }

    /// Re-run discovery on every live session, merging any newly
    /// advertised capabilities. Servers may add capabilities at runtime.
    pub async fn refresh_capabilities(&self) -> Result<Vec<Error>> {
        let sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();

        let mut collisions = Vec::new();
        for session in sessions {
            let discovery = session.discover().await?;
            let mut registry = self.registry.write().await;
            collisions.extend(registry.register(session.server(), &discovery));
        }
        Ok(collisions)
    }

    /// Resolve a capability by name and invoke it with raw shortcut
    /// tokens, binding them against the declared schema.
    pub async fn invoke(&self, name: &str, tokens: &[String]) -> Result<InvocationOutput> {
        let entry = {
            let registry = self.registry.read().await;
            registry.resolve(name)?.clone()
        };
        let args = binder::bind(name, &entry.schema, tokens)?;

        match entry.kind {
            CapabilityKind::Tool => {
                let session = self.session_for(&entry.server).await?;
                Ok(InvocationOutput::Tool(session.call_tool(name, args).await?))
            }
            CapabilityKind::Resource | CapabilityKind::ResourceTemplate => {
                Ok(InvocationOutput::Resource(self.read_resource(name).await?))
            }
            CapabilityKind::Prompt => {
                let session = self.session_for(&entry.server).await?;
                Ok(InvocationOutput::Prompt(session.get_prompt(name, args).await?))
            }
        }
    }

    /// Call a tool by registered name with already-bound arguments
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let entry = self.resolve(name, CapabilityKind::Tool).await?;
        let session = self.session_for(&entry.server).await?;
        session.call_tool(name, arguments).await
    }

    /// Read a resource: exact URI match first, then template prefix match
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let server = {
            let registry = self.registry.read().await;
            match registry.resolve_kind(uri, CapabilityKind::Resource) {
                Ok(entry) => entry.server.clone(),
                Err(_) => registry
                    .resolve_template(uri)
                    .map(|entry| entry.server.clone())
                    .ok_or_else(|| Error::NotFound {
                        name: uri.to_string(),
                    })?,
            }
        };

        let session = self.session_for(&server).await?;
        session.read_resource(uri).await
    }

    /// Render a prompt by registered name with already-bound arguments
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<GetPromptResult> {
        let entry = self.resolve(name, CapabilityKind::Prompt).await?;
        let session = self.session_for(&entry.server).await?;
        session.get_prompt(name, arguments).await
    }

    /// Bind raw shortcut tokens against a prompt's declared arguments and
    /// render it. Returns the bound arguments alongside the result so the
    /// chat loop can reuse them (forced mode wants the topic).
    pub async fn prompt_from_tokens(
        &self,
        name: &str,
        tokens: &[String],
    ) -> Result<(Value, GetPromptResult)> {
        let entry = self.resolve(name, CapabilityKind::Prompt).await?;
        let args = binder::bind(name, &entry.schema, tokens)?;
        let session = self.session_for(&entry.server).await?;
        let result = session.get_prompt(name, args.clone()).await?;
        Ok((args, result))
    }

    /// Flatten every registered tool for the model boundary
    pub async fn tool_definitions(&self) -> Vec<crate::llm::ToolSchema> {
        let registry = self.registry.read().await;
        registry
            .list(CapabilityKind::Tool)
            .into_iter()
            .map(|entry| crate::llm::ToolSchema {
                name: entry.name.clone(),
                description: entry.description.clone(),
                parameters: entry.input_schema.clone(),
            })
            .collect()
    }

    /// Enumerate registered capabilities of one kind, registration order
    pub async fn list(&self, kind: CapabilityKind) -> Vec<CapabilityEntry> {
        let registry = self.registry.read().await;
        registry.list(kind).into_iter().cloned().collect()
    }

    /// Per-server connection state and capability counts
    pub async fn list_servers_status(&self) -> BTreeMap<String, ServerStatus> {
        let registry = self.registry.read().await;
        let sessions = self.sessions.read().await;
        let mut status = BTreeMap::new();

        for (name, session) in sessions.iter() {
            status.insert(
                name.clone(),
                ServerStatus {
                    connected: session.is_alive(),
                    capabilities: registry.count_for(name),
                },
            );
        }
        for name in self.unavailable.read().await.iter() {
            status.entry(name.clone()).or_insert(ServerStatus {
                connected: false,
                capabilities: 0,
            });
        }

        status
    }

    /// Close every session in reverse start order.
    ///
    /// Invocable exactly once; later calls are no-ops. Safe after a
    /// partial-startup failure — only sessions that actually opened are
    /// closed, and already-dead transports are tolerated.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let order = {
            let mut order = self.start_order.write().await;
            std::mem::take(&mut *order)
        };
        let mut sessions = self.sessions.write().await;

        for name in order.iter().rev() {
            if let Some(session) = sessions.remove(name) {
                match session.close().await {
                    Ok(()) => tracing::info!(server = %name, "session closed"),
                    Err(e) => tracing::warn!(server = %name, "close failed: {}", e),
                }
            }
        }
    }

    async fn resolve(&self, name: &str, kind: CapabilityKind) -> Result<CapabilityEntry> {
        let registry = self.registry.read().await;
        registry.resolve_kind(name, kind).cloned()
    }

    async fn session_for(&self, server: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(server)
            .cloned()
            .ok_or_else(|| Error::Connection {
                server: server.to_string(),
                message: "server is not connected".to_string(),
            })
    }

    /// Schema for one registered capability, for help output
    pub async fn schema_of(&self, name: &str) -> Result<Vec<ParamSpec>> {
        let registry = self.registry.read().await;
        Ok(registry.resolve(name)?.schema.clone())
    }
}
