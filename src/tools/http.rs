use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ANALYZE_BUG, GENERATE_PATCH, ToolClient};
use crate::errors::ToolError;

/// Calls tools exposed as `POST {base_url}/tools/{name}` by an MCP agent's
/// HTTP wrapper.
pub struct HttpToolClient {
    client: reqwest::Client,
    base_url: String,
}

/// Envelope returned by the tool endpoints.
#[derive(Debug, Deserialize)]
struct ToolEnvelope {
    #[serde(default)]
    success: bool,
    analysis: Option<String>,
    patch: Option<String>,
    error: Option<String>,
}

impl HttpToolClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP tool client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn tool_url(&self, name: &str) -> String {
        format!("{}/tools/{}", self.base_url, name)
    }
}

#[async_trait]
impl ToolClient for HttpToolClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let resp = self
            .client
            .post(self.tool_url(name))
            .json(&arguments)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ToolError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ToolEnvelope = serde_json::from_str(&body)
            .map_err(|e| ToolError::Protocol(format!("Invalid tool response: {}", e)))?;
        if !envelope.success {
            return Err(ToolError::ToolFailed {
                tool: name.to_string(),
                message: envelope.error.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        let text = match name {
            ANALYZE_BUG => envelope
                .analysis
                .unwrap_or_else(|| "No analysis returned".to_string()),
            GENERATE_PATCH => envelope
                .patch
                .unwrap_or_else(|| "No patch returned".to_string()),
            _ => body,
        };
        Ok(text)
    }

    fn transport(&self) -> &'static str {
        "http"
    }
}
