//! Core types for chat completion requests

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Known chat model providers.
///
/// All of them expose an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Moonshot,
    Zhipu,
    Qianfan,
    Custom,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Moonshot => "Moonshot",
            Provider::Zhipu => "Zhipu",
            Provider::Qianfan => "Qianfan",
            Provider::Custom => "Custom",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Moonshot => Some("MOONSHOT_API_KEY"),
            Provider::Zhipu => Some("ZHIPU_API_KEY"),
            Provider::Qianfan => Some("QIANFAN_API_KEY"),
            Provider::Custom => None,
        }
    }

    /// Default base URL of the chat-completions API
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("https://api.openai.com/v1"),
            Provider::Moonshot => Some("https://api.moonshot.cn/v1"),
            Provider::Zhipu => Some("https://open.bigmodel.cn/api/paas/v4"),
            Provider::Qianfan => Some("https://qianfan.baidubce.com/v2"),
            Provider::Custom => None,
        }
    }
}

/// Read timeout applied when a model config does not set one
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// A configured chat model: which provider, which model, and how to reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider
    pub provider: Provider,
    /// Model identifier (e.g., "gpt-4o-mini", "moonshot-v1-8k")
    pub model: String,
    /// Base URL override; required for `custom` providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// API key; falls back to the provider's environment variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens per response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Connect timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    /// Longest wait for the next bytes of a response, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_secs: Option<u64>,
}

impl ModelConfig {
    /// Create a config using the provider's defaults
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            api_key: None,
            temperature: None,
            max_tokens: None,
            connect_timeout_secs: None,
            read_timeout_secs: None,
        }
    }

    /// Effective base URL, without a trailing slash
    pub fn base_url(&self) -> Result<String> {
        let url = match (&self.base_url, self.provider.default_base_url()) {
            (Some(url), _) => url.as_str(),
            (None, Some(url)) => url,
            (None, None) => {
                return Err(Error::InvalidConfig(format!(
                    "model '{}' needs a base_url for provider {}",
                    self.model,
                    self.provider.name()
                )));
            }
        };
        Ok(url.trim_end_matches('/').to_string())
    }

    /// Effective API key, checking config then env
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        self.provider
            .api_key_env_var()
            .and_then(|var| std::env::var(var).ok())
            .ok_or(Error::InvalidApiKey)
    }
}

/// Chat message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a chat model needs for one turn
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System instruction, sent ahead of the messages
    pub system_prompt: Option<String>,
    /// Conversation messages, oldest first
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Create a request with a system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages: vec![],
        }
    }

    /// Add a message to the request
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}
