//! papertrail: a multi-server MCP client with a research chat agent
//!
//! This library provides:
//! - Sessions to independently-configured MCP servers over stdio, SSE,
//!   and HTTP transports
//! - Capability discovery and a unified, collision-checked registry
//! - A client manager with partial-failure-tolerant startup and a single
//!   call surface keyed by capability name
//! - Schema-driven argument binding for shortcut input
//! - Optional (model-chooses) and forced (search/extract/summarize)
//!   invocation workflows

pub mod binder;
pub mod config;
pub mod error;
pub mod llm;
pub mod manager;
pub mod mcp;
pub mod registry;
pub mod shortcut;
pub mod workflow;

pub use config::{ServerDescriptor, Settings};
pub use error::{Error, Result};
pub use manager::ClientManager;
