//! STDIO transport: spawn a server process and speak newline-delimited
//! JSON-RPC over its standard streams.

use crate::config::{expand_env_vars, ServerDescriptor};
use crate::error::{Error, Result, TransportErrorKind};
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Transport over a spawned subprocess
pub struct StdioTransport {
    server: String,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server process described by the descriptor
    pub async fn spawn(descriptor: &ServerDescriptor) -> Result<Self> {
        let command = descriptor.command.as_deref().ok_or_else(|| {
            Error::Config(format!("server '{}' has no command", descriptor.name))
        })?;

        let mut cmd = Command::new(command);
        cmd.args(&descriptor.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Pass stderr through for debugging
            .kill_on_drop(true);

        // Expand ${VAR} references in the environment values
        for (key, value) in &descriptor.env {
            cmd.env(key, expand_env_vars(value));
        }

        let mut child = cmd.spawn().map_err(|e| Error::Connection {
            server: descriptor.name.clone(),
            message: format!("failed to spawn '{}': {}", command, e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::Connection {
            server: descriptor.name.clone(),
            message: "failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::Connection {
            server: descriptor.name.clone(),
            message: "failed to capture stdout".to_string(),
        })?;

        Ok(Self {
            server: descriptor.name.clone(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            closed: AtomicBool::new(false),
        })
    }

    fn transport_err(&self, kind: TransportErrorKind, message: impl Into<String>) -> Error {
        Error::Transport {
            server: self.server.clone(),
            kind,
            message: message.into(),
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.transport_err(TransportErrorKind::Closed, "transport closed"));
        }
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl super::Transport for StdioTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let expected_id = request.id;
        let line = serde_json::to_string(&request)
            .map_err(|e| self.transport_err(TransportErrorKind::Malformed, e.to_string()))?;
        tracing::debug!(server = %self.server, "mcp request: {}", line);

        // One exchange at a time: the reader lock is held across the write
        // and the read, so a concurrent call cannot consume this call's
        // response.
        let mut stdout = self.stdout.lock().await;
        self.write_line(&line).await?;

        // Read until the response for this request id arrives. Server
        // notifications and responses with an unrecognized id are dropped,
        // not fatal.
        loop {
            let mut line = String::new();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| self.transport_err(TransportErrorKind::Io, e.to_string()))?;
            if n == 0 {
                return Err(self.transport_err(
                    TransportErrorKind::Closed,
                    "server closed its output stream",
                ));
            }
            if line.trim().is_empty() {
                continue;
            }
            tracing::debug!(server = %self.server, "mcp response: {}", line.trim());

            let value: serde_json::Value = serde_json::from_str(&line)
                .map_err(|e| self.transport_err(TransportErrorKind::Malformed, e.to_string()))?;
            if value.get("id").is_none() || value.get("id") == Some(&serde_json::Value::Null) {
                // Server-initiated notification; not for us
                tracing::debug!(server = %self.server, "skipping server notification");
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|e| self.transport_err(TransportErrorKind::Malformed, e.to_string()))?;
            match response.id {
                Some(id) if id == expected_id => return Ok(response),
                other => {
                    tracing::warn!(
                        server = %self.server,
                        "dropping response with unrecognized id {:?} (expected {})",
                        other,
                        expected_id
                    );
                }
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        let line = serde_json::to_string(&notification)
            .map_err(|e| self.transport_err(TransportErrorKind::Malformed, e.to_string()))?;
        tracing::debug!(server = %self.server, "mcp notification: {}", line);
        self.write_line(&line).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut child = self.child.lock().await;
        match child.kill().await {
            Ok(()) => Ok(()),
            // Already exited is fine
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(self.transport_err(TransportErrorKind::Io, e.to_string())),
        }
    }
}

// No manual Drop needed: kill_on_drop(true) reaps the child.

#[cfg(test)]
mod tests {
    use super::super::Transport;
    use super::*;
    use crate::config::TransportKind;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// A server that answers every request line with a response echoing
    /// its id
    fn echo_descriptor() -> ServerDescriptor {
        ServerDescriptor {
            name: "echo".into(),
            transport: TransportKind::Stdio,
            command: Some("bash".into()),
            args: vec![
                "-c".into(),
                concat!(
                    r#"while read line; do "#,
                    r#"id=$(sed 's/.*"id":\([0-9]*\).*/\1/' <<<"$line"); "#,
                    r#"printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"; "#,
                    r#"done"#
                )
                .into(),
            ],
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn concurrent_calls_each_get_their_own_response() {
        let transport = Arc::new(StdioTransport::spawn(&echo_descriptor()).await.unwrap());

        let calls = (1..=8u64).map(|id| {
            let transport = transport.clone();
            async move { transport.send(JsonRpcRequest::new(id, "ping", None)).await }
        });
        let responses = futures::future::join_all(calls).await;

        // Every caller got the response for its own id, none were lost to
        // another caller's reader
        for (i, response) in responses.into_iter().enumerate() {
            let response = response.unwrap();
            assert_eq!(response.id, Some(i as u64 + 1));
            assert!(response.error.is_none());
        }

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let transport = StdioTransport::spawn(&echo_descriptor()).await.unwrap();
        transport.close().await.unwrap();

        let err = transport
            .send(JsonRpcRequest::new(1, "ping", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                kind: TransportErrorKind::Closed,
                ..
            }
        ));
    }
}
