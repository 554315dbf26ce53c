use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};

use super::ToolClient;
use crate::errors::ToolError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const CLIENT_NAME: &str = "jerai-backend";
pub const CLIENT_VERSION: &str = "1.0.0";

const INIT_REQUEST_ID: u64 = 1;
const CALL_REQUEST_ID: u64 = 2;

/// Runs an MCP server as a child process per call and speaks
/// newline-delimited JSON-RPC 2.0 over its stdin/stdout.
pub struct StdioToolClient {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl StdioToolClient {
    pub fn new(
        command: &str,
        args: Vec<String>,
        env: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.to_string(),
            args,
            env,
            timeout,
        }
    }
}

fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": INIT_REQUEST_ID,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION}
        }
    })
}

fn initialized_notification() -> Value {
    json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
}

fn call_request(name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": CALL_REQUEST_ID,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    })
}

async fn write_message<W>(writer: &mut W, message: &Value) -> Result<(), ToolError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = message.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read lines until the response with `id` arrives. Lines that are not
/// JSON objects (server logging, banners) are skipped.
async fn read_response(
    lines: &mut Lines<BufReader<ChildStdout>>,
    id: u64,
) -> Result<Value, ToolError> {
    loop {
        let Some(line) = lines.next_line().await? else {
            return Err(ToolError::Protocol(format!(
                "Server closed stdout before response id {}",
                id
            )));
        };
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
            tracing::debug!(line = %trimmed, "Skipping unparseable MCP line");
            continue;
        };
        if message.get("id").and_then(Value::as_u64) != Some(id) {
            continue;
        }
        if let Some(error) = message.get("error") {
            return Err(ToolError::Protocol(format!("MCP error: {}", error)));
        }
        return Ok(message);
    }
}

fn first_text(items: &[Value]) -> Option<String> {
    items.first().map(|item| match item.get("text") {
        Some(Value::String(text)) => text.clone(),
        _ => item.to_string(),
    })
}

/// Pull the text result out of a `tools/call` response.
pub fn extract_tool_text(tool: &str, response: &Value) -> Result<String, ToolError> {
    let result = response
        .get("result")
        .ok_or_else(|| ToolError::Protocol(format!("Response has no result: {}", response)))?;

    let text = match result {
        Value::Object(map) => match map.get("content") {
            Some(Value::Array(content)) => first_text(content),
            _ => None,
        },
        Value::Array(items) => first_text(items),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
    .unwrap_or_else(|| result.to_string());

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(ToolError::ToolFailed {
            tool: tool.to_string(),
            message: text,
        });
    }
    Ok(text)
}

#[async_trait]
impl ToolClient for StdioToolClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::Transport(format!("Failed to start MCP server '{}': {}", self.command, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport("MCP server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Transport("MCP server stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "jerai::mcp", "{}", line);
                }
            });
        }

        let tool = name.to_string();
        let exchange = async move {
            let mut lines = BufReader::new(stdout).lines();

            write_message(&mut stdin, &initialize_request()).await?;
            read_response(&mut lines, INIT_REQUEST_ID).await?;
            write_message(&mut stdin, &initialized_notification()).await?;
            write_message(&mut stdin, &call_request(&tool, arguments)).await?;
            drop(stdin);

            let response = read_response(&mut lines, CALL_REQUEST_ID).await?;
            extract_tool_text(&tool, &response)
        };

        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        // The server only serves one request per spawn.
        let _ = child.start_kill();

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = name, limit = ?self.timeout, "MCP call timed out");
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    limit: self.timeout,
                })
            }
        }
    }

    fn transport(&self) -> &'static str {
        "stdio"
    }
}
