//! Shortcut command surface consumed from the interactive front end.
//!
//! `@name args` resolves directly against the registry, bypassing the
//! model; `/prompts` and `/prompt` drive prompt templates; anything else
//! is a plain query for the active workflow.

/// One parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortcutCommand {
    /// Empty line, nothing to do
    Empty,
    /// Leave the chat loop
    Quit,
    /// `@name arg1 key=val`: invoke a discovered capability (or fall back
    /// to a topic resource read when nothing matches the name)
    Capability { name: String, tokens: Vec<String> },
    /// `/prompts`
    ListPrompts,
    /// `/prompt <name> <args>`
    Prompt { name: String, tokens: Vec<String> },
    /// `/something` we do not recognize
    Unknown { command: String },
    /// A slash command missing its operands
    Usage { usage: &'static str },
    /// Plain text for the workflow engine
    Query(String),
}

/// Parse one line of input
pub fn parse(input: &str) -> ShortcutCommand {
    let input = input.trim();
    if input.is_empty() {
        return ShortcutCommand::Empty;
    }
    if input.eq_ignore_ascii_case("quit") {
        return ShortcutCommand::Quit;
    }

    if let Some(rest) = input.strip_prefix('@') {
        let mut parts = rest.split_whitespace();
        let name = match parts.next() {
            Some(name) => name.to_string(),
            None => return ShortcutCommand::Usage { usage: "usage: @<name> [args...]" },
        };
        return ShortcutCommand::Capability {
            name,
            tokens: parts.map(str::to_string).collect(),
        };
    }

    if input.starts_with('/') {
        let mut parts = input.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        return match command.as_str() {
            "/prompts" => ShortcutCommand::ListPrompts,
            "/prompt" => match parts.next() {
                Some(name) => ShortcutCommand::Prompt {
                    name: name.to_string(),
                    tokens: parts.map(str::to_string).collect(),
                },
                None => ShortcutCommand::Usage {
                    usage: "usage: /prompt <name> <arg1=value1> <arg2=value2>",
                },
            },
            _ => ShortcutCommand::Unknown { command },
        };
    }

    ShortcutCommand::Query(input.to_string())
}

/// Expand a bare `@topic` into the resource URI the research servers
/// serve it under. `@folders` lists the paper folders.
pub fn topic_resource_uri(topic: &str) -> String {
    if topic == "folders" {
        "papers://folders".to_string()
    } else {
        format!("papers://{}", topic)
    }
}
