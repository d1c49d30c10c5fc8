//! Capability registry: one namespace across every connected server.
//!
//! Pure bookkeeping — lookup and merge, no I/O. Servers are independent
//! and must never silently shadow one another, so a name that is already
//! taken within a kind stays with its first registrant and the later
//! registration is reported as a collision and dropped.

use crate::binder::ParamSpec;
use crate::error::{Error, Result};
use crate::mcp::protocol::template_prefix;
use crate::mcp::session::Discovery;
use std::collections::HashMap;

/// What flavor of capability an entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tool,
    Resource,
    ResourceTemplate,
    Prompt,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::ResourceTemplate => "resource template",
            Self::Prompt => "prompt",
        };
        f.write_str(s)
    }
}

/// One registered capability. `server` is the owning session's key in the
/// manager's table, not an owning handle.
#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub name: String,
    pub kind: CapabilityKind,
    pub server: String,
    pub description: String,
    /// Ordered parameter descriptors for the argument binder
    pub schema: Vec<ParamSpec>,
    /// Raw JSON Schema as declared by the server (tools only), passed
    /// through to the model boundary
    pub input_schema: serde_json::Value,
}

#[derive(Default)]
pub struct CapabilityRegistry {
    /// (name, kind) -> index into `entries`
    index: HashMap<(String, CapabilityKind), usize>,
    /// Registration order, preserved for enumeration
    entries: Vec<CapabilityEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one server's discovery results into the namespace.
    ///
    /// Returns the collisions encountered; each is reported once and the
    /// losing entry is dropped. The registry is unchanged by a loser.
    pub fn register(&mut self, server: &str, discovery: &Discovery) -> Vec<Error> {
        let mut collisions = Vec::new();

        for tool in &discovery.tools {
            let entry = CapabilityEntry {
                name: tool.name.clone(),
                kind: CapabilityKind::Tool,
                server: server.to_string(),
                description: tool.description.clone(),
                schema: ParamSpec::from_json_schema(&tool.input_schema),
                input_schema: tool.input_schema.clone(),
            };
            self.insert(entry, &mut collisions);
        }

        for resource in &discovery.resources {
            let entry = CapabilityEntry {
                name: resource.uri.clone(),
                kind: CapabilityKind::Resource,
                server: server.to_string(),
                description: resource.description.clone(),
                schema: Vec::new(),
                input_schema: serde_json::Value::Null,
            };
            self.insert(entry, &mut collisions);
        }

        for template in &discovery.resource_templates {
            let entry = CapabilityEntry {
                name: template.uri_template.clone(),
                kind: CapabilityKind::ResourceTemplate,
                server: server.to_string(),
                description: template.description.clone(),
                schema: Vec::new(),
                input_schema: serde_json::Value::Null,
            };
            self.insert(entry, &mut collisions);
        }

        for prompt in &discovery.prompts {
            let entry = CapabilityEntry {
                name: prompt.name.clone(),
                kind: CapabilityKind::Prompt,
                server: server.to_string(),
                description: prompt.description.clone(),
                schema: ParamSpec::from_prompt_arguments(&prompt.arguments),
                input_schema: serde_json::Value::Null,
            };
            self.insert(entry, &mut collisions);
        }

        collisions
    }

    fn insert(&mut self, entry: CapabilityEntry, collisions: &mut Vec<Error>) {
        let key = (entry.name.clone(), entry.kind);
        if let Some(&existing_idx) = self.index.get(&key) {
            let existing = &self.entries[existing_idx];
            if existing.server != entry.server {
                tracing::warn!(
                    "capability '{}' ({}) from '{}' collides with '{}', keeping the first",
                    entry.name,
                    entry.kind,
                    entry.server,
                    existing.server
                );
                collisions.push(Error::Collision {
                    name: entry.name,
                    existing: existing.server.clone(),
                    rejected: entry.server,
                });
            }
            // Same server re-registering (refresh) keeps the original slot
            return;
        }

        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
    }

    /// Look up a capability by name, any kind
    pub fn resolve(&self, name: &str) -> Result<&CapabilityEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    /// Look up a capability by name and kind
    pub fn resolve_kind(&self, name: &str, kind: CapabilityKind) -> Result<&CapabilityEntry> {
        self.index
            .get(&(name.to_string(), kind))
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    /// Find the resource template whose literal prefix matches a URI
    pub fn resolve_template(&self, uri: &str) -> Option<&CapabilityEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == CapabilityKind::ResourceTemplate)
            .find(|e| {
                let prefix = template_prefix(&e.name);
                !prefix.is_empty() && uri.starts_with(prefix)
            })
    }

    /// Enumerate capabilities of one kind, in registration order
    pub fn list(&self, kind: CapabilityKind) -> Vec<&CapabilityEntry> {
        self.entries.iter().filter(|e| e.kind == kind).collect()
    }

    /// Number of capabilities owned by a server
    pub fn count_for(&self, server: &str) -> usize {
        self.entries.iter().filter(|e| e.server == server).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
