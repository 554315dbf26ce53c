//! External tool clients.
//!
//! The AI-fix workflow needs two capabilities, `analyze_bug` and
//! `generate_patch`, behind one narrow contract: a tool name plus named
//! arguments in, a single text result out. Three transports implement it:
//!
//! | Transport | Type                 | Talks to                                  |
//! |-----------|----------------------|-------------------------------------------|
//! | `http`    | `HttpToolClient`     | `POST {gateway}/tools/{name}`             |
//! | `stdio`   | `StdioToolClient`    | MCP server subprocess, JSON-RPC on stdio  |
//! | `chat`    | `ChatToolClient`     | OpenAI-compatible `/chat/completions`     |
//!
//! Clients are built once from configuration and injected as
//! `Arc<dyn ToolClient>`.

pub mod chat;
pub mod http;
pub mod stdio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{AiTransport, JeraiConfig};
use crate::errors::ToolError;

pub use chat::ChatToolClient;
pub use http::HttpToolClient;
pub use stdio::StdioToolClient;

pub const ANALYZE_BUG: &str = "analyze_bug";
pub const GENERATE_PATCH: &str = "generate_patch";

/// Request/response contract for an external tool.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Invoke `name` with a JSON object of named arguments.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError>;

    /// Short transport label for logs.
    fn transport(&self) -> &'static str;
}

/// Read a string argument, treating absence and `null` as empty.
pub(crate) fn str_arg<'a>(arguments: &'a Value, key: &str) -> &'a str {
    arguments.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Build the configured transport.
pub fn build_tool_client(config: &JeraiConfig) -> anyhow::Result<Arc<dyn ToolClient>> {
    let client: Arc<dyn ToolClient> = match config.ai.transport {
        AiTransport::Chat => Arc::new(ChatToolClient::new(
            &config.ai.api_url,
            config.ai.api_key.clone(),
            &config.ai.model,
        )?),
        AiTransport::Http => Arc::new(HttpToolClient::new(
            &config.mcp.gateway_url,
            Duration::from_secs(config.mcp.call_timeout_secs),
        )?),
        AiTransport::Stdio => {
            let mut env = vec![(
                "WORKSPACE_PATH".to_string(),
                config.mcp.workspace_path.clone(),
            )];
            if let Some(key) = &config.ai.api_key {
                env.push(("CEREBRAS_API_KEY".to_string(), key.clone()));
            }
            env.push(("CEREBRAS_API_URL".to_string(), config.ai.api_url.clone()));
            Arc::new(StdioToolClient::new(
                &config.mcp.server_command,
                config.mcp.server_args.clone(),
                env,
                Duration::from_secs(config.mcp.call_timeout_secs),
            ))
        }
    };
    tracing::info!(transport = client.transport(), "External tool client ready");
    Ok(client)
}
