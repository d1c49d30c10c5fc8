//! MCP (Model Context Protocol) client implementation.
//!
//! Sessions, transports, and the wire types for talking to capability
//! servers.

pub mod protocol;
pub mod session;
pub mod transport;

pub use protocol::{
    Content, GetPromptResult, PromptDef, ReadResourceResult, ResourceDef, ResourceTemplateDef,
    ServerCapabilities, ToolCallResult, ToolDef,
};
pub use session::{Discovery, Session};
pub use transport::{Connector, DefaultConnector, Transport};
