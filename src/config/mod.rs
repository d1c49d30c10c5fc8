//! Configuration management for papertrail
//!
//! Two inputs: `servers.json` (the ordered list of capability servers to
//! connect to) and `config.toml` (model endpoint and runtime limits).
//! `${VAR}` references in server descriptors are expanded from the
//! environment before use.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Transport flavor for one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawn a local subprocess and speak over stdin/stdout
    #[default]
    Stdio,
    /// Remote endpoint, responses arrive on a server-sent event stream
    Sse,
    /// Remote endpoint, one HTTP request/response per call
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
        };
        f.write_str(s)
    }
}

/// One configured capability server. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique key for this server
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Command to spawn (stdio only)
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL (sse and http only)
    #[serde(default)]
    pub url: Option<String>,
    /// Opaque headers passed through to the transport (credentials included)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ServerDescriptor {
    /// Reject descriptors the manager cannot act on. Fatal at start().
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::error::Error::Config(
                "server descriptor is missing a name".to_string(),
            ));
        }
        match self.transport {
            TransportKind::Stdio if self.command.is_none() => Err(crate::error::Error::Config(
                format!("server '{}' uses stdio but has no command", self.name),
            )),
            TransportKind::Sse | TransportKind::Http if self.url.is_none() => {
                Err(crate::error::Error::Config(format!(
                    "server '{}' uses {} but has no url",
                    self.name, self.transport
                )))
            }
            _ => {
                if let Some(url) = &self.url {
                    url::Url::parse(url).map_err(|e| {
                        crate::error::Error::Config(format!(
                            "server '{}' has an invalid url: {}",
                            self.name, e
                        ))
                    })?;
                }
                Ok(())
            }
        }
    }
}

/// Wrapper matching the `servers.json` on-disk shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ServerDescriptor>,
}

/// Load server descriptors from a `servers.json` file.
///
/// A missing file is a warning, not an error: the chat loop still works
/// without any connected server. `${VAR}` references are substituted from
/// the environment throughout the document.
pub fn load_server_descriptors(path: &Path) -> Result<Vec<ServerDescriptor>> {
    if !path.exists() {
        tracing::warn!("server config {} not found, no servers will be connected", path.display());
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&content)?;
    let substituted = substitute_env_vars(raw);
    let file: ServersFile = serde_json::from_value(substituted)?;
    Ok(file.servers)
}

/// Expand `${VAR}` references from the environment, recursively over
/// strings, arrays, and objects. Unknown variables are left as-is.
fn substitute_env_vars(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(substitute_env_vars).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env_vars(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Expand environment variable references like ${VAR} in a string
pub fn expand_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Main settings structure (`config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub limits: LimitSettings,
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Per-call timeout for every blocking transport wait, in seconds
    pub request_timeout_secs: u64,
    /// How many servers to connect concurrently during start()
    pub connect_fan_out: usize,
    /// Iteration cap for the optional-mode tool loop
    pub max_tool_iterations: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_fan_out: 4,
            max_tool_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Tool invoked by the forced pipeline's search step
    pub search_tool: String,
    /// Tool invoked once per identifier in the extraction step
    pub extract_tool: String,
    /// max_results passed to the search tool
    pub max_results: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            search_tool: "search_papers".to_string(),
            extract_tool: "extract_info".to_string(),
            max_results: 5,
        }
    }
}

impl Settings {
    /// Load settings from the default location or fall back to defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "papertrail") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}
