//! Unified configuration for Jerai.
//!
//! Settings are layered file → environment → CLI. The file is
//! `jerai.toml` (absent means defaults):
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//! dev_mode = false
//!
//! [database]
//! path = ".jerai/jerai.db"
//!
//! [ai]
//! transport = "chat"          # chat | http | stdio
//! api_url = "https://api.cerebras.ai/v1/chat/completions"
//! model = "llama3.1-8b"
//! analysis_timeout_secs = 10
//! patch_timeout_secs = 30
//!
//! [mcp]
//! gateway_url = "http://localhost:9000"
//! server_command = "python"
//! server_args = ["/app/mcp_server.py"]
//! workspace_path = "/workspace"
//! call_timeout_secs = 60
//!
//! [logging]
//! format = "text"             # text | json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "jerai.toml";
pub const DEFAULT_API_URL: &str = "https://api.cerebras.ai/v1/chat/completions";

/// Which transport serves `analyze_bug` / `generate_patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiTransport {
    /// Prompt an OpenAI-compatible chat endpoint directly.
    #[default]
    Chat,
    /// `POST {gateway_url}/tools/{name}`.
    Http,
    /// Spawn an MCP server and speak JSON-RPC over stdio.
    Stdio,
}

impl std::fmt::Display for AiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiTransport::Chat => write!(f, "chat"),
            AiTransport::Http => write!(f, "http"),
            AiTransport::Stdio => write!(f, "stdio"),
        }
    }
}

impl std::str::FromStr for AiTransport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(AiTransport::Chat),
            "http" => Ok(AiTransport::Http),
            "stdio" | "mcp" => Ok(AiTransport::Stdio),
            _ => anyhow::bail!("Invalid AI transport '{}'. Valid values: chat, http, stdio", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Enables permissive CORS for a separately served frontend.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".jerai/jerai.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSection {
    pub transport: AiTransport,
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub analysis_timeout_secs: u64,
    pub patch_timeout_secs: u64,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            transport: AiTransport::default(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: "llama3.1-8b".to_string(),
            analysis_timeout_secs: 10,
            patch_timeout_secs: 30,
        }
    }
}

impl AiSection {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn patch_timeout(&self) -> Duration {
        Duration::from_secs(self.patch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSection {
    pub gateway_url: String,
    pub server_command: String,
    pub server_args: Vec<String>,
    pub workspace_path: String,
    pub call_timeout_secs: u64,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:9000".to_string(),
            server_command: "python".to_string(),
            server_args: Vec::new(),
            workspace_path: "/workspace".to_string(),
            call_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
}

/// The complete jerai.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JeraiConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub ai: AiSection,
    pub mcp: McpSection,
    pub logging: LoggingSection,
}

impl JeraiConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse jerai.toml")
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize jerai.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("CEREBRAS_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(url) = get("CEREBRAS_API_URL") {
            self.ai.api_url = url;
        }
        if let Some(transport) = get("JERAI_AI_TRANSPORT") {
            self.ai.transport = transport.parse()?;
        }
        if let Some(url) = get("MCP_GATEWAY_URL") {
            self.mcp.gateway_url = url;
        }
        if let Some(command) = get("MCP_SERVER_COMMAND") {
            self.mcp.server_command = command;
        }
        if let Some(script) = get("MCP_SERVER_SCRIPT") {
            self.mcp.server_args = vec![script];
        }
        if let Some(path) = get("WORKSPACE_PATH") {
            self.mcp.workspace_path = path;
        }
        if let Some(path) = get("JERAI_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value '{}'", port))?;
        }
        Ok(())
    }

    /// Human-readable warnings about settings that will degrade behavior.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.ai.transport == AiTransport::Chat && self.ai.api_key.is_none() {
            warnings.push(
                "CEREBRAS_API_KEY not set; AI calls will use mock fallbacks".to_string(),
            );
        }
        if self.ai.transport == AiTransport::Stdio && self.mcp.server_args.is_empty() {
            warnings.push(format!(
                "mcp.server_args is empty; '{}' will be started without a server script",
                self.mcp.server_command
            ));
        }
        if self.ai.analysis_timeout_secs == 0 || self.ai.patch_timeout_secs == 0 {
            warnings.push("AI timeouts of 0s make every call fall back to mocks".to_string());
        }
        if self.ai.analysis_timeout_secs > self.ai.patch_timeout_secs {
            warnings.push(format!(
                "analysis_timeout_secs ({}) exceeds patch_timeout_secs ({})",
                self.ai.analysis_timeout_secs, self.ai.patch_timeout_secs
            ));
        }

        warnings
    }
}
