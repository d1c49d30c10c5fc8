//! Typed errors for the session manager
//!
//! Every failure surfaced to a caller is structured: a kind, a message, and
//! the originating server where one exists. Raw transport errors never
//! escape this taxonomy.

use thiserror::Error;

/// Transport-level failure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Per-call timeout expired while waiting for a response
    Timeout,
    /// The channel is closed (process exited, stream ended)
    Closed,
    /// The peer sent something that is not a valid JSON-RPC response
    Malformed,
    /// Underlying read/write failure
    Io,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Closed => "connection closed",
            Self::Malformed => "malformed response",
            Self::Io => "i/o failure",
        };
        f.write_str(s)
    }
}

/// Server-reported failure modes for tool calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    NotFound,
    InvalidArguments,
    ExecutionFailed,
}

/// Server-reported failure modes for resource reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceErrorKind {
    NotFound,
    AccessDenied,
}

/// Server-reported failure modes for prompt rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptErrorKind {
    NotFound,
    InvalidArguments,
}

/// Errors produced by the session manager and its collaborators
///
/// Failures local to one server or one capability call are never fatal to
/// the manager; only `Config` and `AllServersFailed` abort startup.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing server descriptor. Fatal at start().
    #[error("invalid server configuration: {0}")]
    Config(String),

    /// Failed to open a transport to a server
    #[error("failed to connect to '{server}': {message}")]
    Connection { server: String, message: String },

    /// Transport failure on an established channel
    #[error("transport error on '{server}': {kind}: {message}")]
    Transport {
        server: String,
        kind: TransportErrorKind,
        message: String,
    },

    /// The initialize handshake failed; the server is marked unavailable
    #[error("handshake with '{server}' failed: {message}")]
    Handshake { server: String, message: String },

    /// Every enabled server failed to start. Fatal: the manager has
    /// nothing to serve.
    #[error("all {attempted} enabled server(s) failed to start")]
    AllServersFailed { attempted: usize },

    /// A session operation was attempted before initialize()
    #[error("session '{server}' is not initialized")]
    NotInitialized { server: String },

    /// No registered capability has this name
    #[error("capability '{name}' not found")]
    NotFound { name: String },

    /// A required parameter was left unbound
    #[error("missing required argument '{argument}' for '{capability}'")]
    MissingArgument { capability: String, argument: String },

    /// A token could not be coerced to the declared parameter type
    #[error("argument '{argument}' expects {expected}, got '{value}'")]
    TypeMismatch {
        argument: String,
        expected: &'static str,
        value: String,
    },

    /// Unknown keyword argument for the target schema
    #[error("unknown argument '{argument}' for '{capability}'")]
    UnknownArgument { capability: String, argument: String },

    /// Server-reported tool failure
    #[error("tool '{name}' on '{server}' failed: {message}")]
    Tool {
        server: String,
        name: String,
        kind: ToolErrorKind,
        message: String,
    },

    /// Server-reported resource failure
    #[error("resource '{uri}' on '{server}' failed: {message}")]
    Resource {
        server: String,
        uri: String,
        kind: ResourceErrorKind,
        message: String,
    },

    /// Server-reported prompt failure
    #[error("prompt '{name}' on '{server}' failed: {message}")]
    Prompt {
        server: String,
        name: String,
        kind: PromptErrorKind,
        message: String,
    },

    /// A later registration tried to reuse an existing capability name.
    /// Non-fatal: the existing entry wins and the new one is dropped.
    #[error("capability '{name}' from '{rejected}' collides with '{existing}'")]
    Collision {
        name: String,
        existing: String,
        rejected: String,
    },

    /// The optional-mode tool loop hit its iteration cap
    #[error("tool-call loop exceeded {limit} iterations without a final answer")]
    WorkflowExhausted { limit: usize },

    /// The forced pipeline's search step returned no identifiers
    #[error("search for '{topic}' returned no results")]
    EmptySearch { topic: String },

    /// Model boundary failure
    #[error("model request failed: {0}")]
    Model(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error must abort manager startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::AllServersFailed { .. })
    }

    /// Name of the server this error originated from, if any
    pub fn server(&self) -> Option<&str> {
        match self {
            Error::Connection { server, .. }
            | Error::Transport { server, .. }
            | Error::Handshake { server, .. }
            | Error::NotInitialized { server }
            | Error::Tool { server, .. }
            | Error::Resource { server, .. }
            | Error::Prompt { server, .. } => Some(server),
            _ => None,
        }
    }
}
