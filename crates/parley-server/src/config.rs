//! Configuration file support

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parley_ai::{ModelCatalog, ModelConfig, Provider};
use parley_engine::{EngineConfig, StaticWorkspaces};
use serde::{Deserialize, Serialize};

/// Configuration for the parley server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    /// Chat models by scope: default, per workspace, per bot
    pub models: ModelCatalog,
    /// Account uid -> personal workspace uid
    pub accounts: HashMap<String, String>,
    /// Workspace uid -> member account uids
    pub workspace_members: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn init(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            return Ok(());
        }

        let default_config = Config {
            models: ModelCatalog {
                default: Some(ModelConfig::new(Provider::OpenAI, "gpt-4o-mini")),
                ..Default::default()
            },
            ..Default::default()
        };
        default_config.save(path)
    }

    /// Workspace access backed by the `[accounts]` and `[workspace_members]` tables
    pub fn workspaces(&self) -> StaticWorkspaces {
        StaticWorkspaces::new(self.accounts.clone(), self.workspace_members.clone())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# parley configuration file
# Place at ~/.config/parley/config.toml (Linux) or set PARLEY_CONFIG_PATH

[server]
addr = "127.0.0.1:3000"

[engine]
# Persona prompt placed ahead of every conversation
system_prompt = "You are a helpful assistant."
# Frames buffered between a generation and its HTTP response
channel_capacity = 32

# Model used when no workspace or bot model matches.
# Providers: openai, moonshot, zhipu, qianfan, custom
# API keys fall back to OPENAI_API_KEY, MOONSHOT_API_KEY, ZHIPU_API_KEY, QIANFAN_API_KEY
[models.default]
provider = "openai"
model = "gpt-4o-mini"
# Fail a stalled stream after this many seconds without data (default 60)
# read_timeout_secs = 60

# [models.workspaces.team-workspace]
# provider = "moonshot"
# model = "moonshot-v1-8k"

# [models.bots.local-bot]
# provider = "custom"
# model = "qwen2.5"
# base_url = "http://localhost:11434/v1"
# api_key = "unused"

# Personal workspace of each account
[accounts]
alice = "alice-personal"

# Members of shared workspaces
[workspace_members]
team-workspace = ["alice"]
"#
}
