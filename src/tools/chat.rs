//! Direct chat-completions transport.
//!
//! Implements `analyze_bug` and `generate_patch` by prompting an
//! OpenAI-compatible `/chat/completions` endpoint (Cerebras by default).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ANALYZE_BUG, GENERATE_PATCH, ToolClient, str_arg};
use crate::errors::ToolError;

pub const API_KEY_VAR: &str = "CEREBRAS_API_KEY";

/// Sampling settings for one tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

pub const ANALYSIS_SAMPLING: Sampling = Sampling {
    temperature: 0.1,
    max_tokens: 500,
};

pub const PATCH_SAMPLING: Sampling = Sampling {
    temperature: 0.2,
    max_tokens: 1000,
};

pub struct ChatToolClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub fn analysis_prompt(title: &str, description: &str) -> String {
    let description = if description.trim().is_empty() {
        "No description provided"
    } else {
        description
    };
    format!(
        "Analyze this bug briefly and provide:\n\
         1. Likely cause\n\
         2. Affected files (be specific with file paths)\n\
         3. Suggested fix approach\n\n\
         Bug Title: {title}\n\
         Description: {description}\n\n\
         Provide a concise technical analysis."
    )
}

pub fn patch_prompt(title: &str, analysis: &str) -> String {
    format!(
        "You are a code fixing assistant. Generate a git patch to fix this bug.\n\n\
         Bug Title: {title}\n\
         Analysis: {analysis}\n\n\
         Generate a proper git diff patch that:\n\
         1. Fixes the bug completely\n\
         2. Uses best practices (e.g., a decimal type for money calculations)\n\
         3. Is minimal and focused\n\n\
         Output ONLY the patch in git diff format starting with '--- a/' and '+++ b/'.\n\
         No explanations, just the patch."
    )
}

impl ChatToolClient {
    pub fn new(api_url: &str, api_key: Option<String>, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build chat client: {}", e))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.to_string(),
        })
    }

    async fn complete(&self, prompt: &str, sampling: Sampling) -> Result<String, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ToolError::MissingCredential(API_KEY_VAR))?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
        };

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ToolError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ToolError::Protocol(format!("Failed to parse chat response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ToolError::Protocol("Chat response has no choices".to_string()))?;

        tracing::debug!(chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

#[async_trait]
impl ToolClient for ChatToolClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        match name {
            ANALYZE_BUG => {
                let prompt = analysis_prompt(
                    str_arg(&arguments, "title"),
                    str_arg(&arguments, "description"),
                );
                self.complete(&prompt, ANALYSIS_SAMPLING).await
            }
            GENERATE_PATCH => {
                let prompt =
                    patch_prompt(str_arg(&arguments, "title"), str_arg(&arguments, "analysis"));
                self.complete(&prompt, PATCH_SAMPLING).await
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    fn transport(&self) -> &'static str {
        "chat"
    }
}
