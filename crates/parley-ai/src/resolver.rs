//! Model resolution: workspace + bot -> configured chat client

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::{SharedChatClient, openai::OpenAIProvider},
    types::ModelConfig,
};

/// Resolves which chat model serves a workspace, optionally for a specific bot.
///
/// `bot_uid = None` selects the workspace's system inference model, which is also
/// what background summarization uses.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve_chat_client(
        &self,
        workspace_uid: &str,
        bot_uid: Option<&str>,
    ) -> Result<SharedChatClient>;
}

/// Static model assignments, usually loaded from the server config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    /// Fallback model for every workspace
    pub default: Option<ModelConfig>,
    /// Per-workspace system model
    pub workspaces: HashMap<String, ModelConfig>,
    /// Per-bot model, wins over the workspace model
    pub bots: HashMap<String, ModelConfig>,
}

impl ModelCatalog {
    /// Pick the model for a scope: bot, then workspace, then default
    pub fn select(&self, workspace_uid: &str, bot_uid: Option<&str>) -> Result<&ModelConfig> {
        bot_uid
            .and_then(|bot| self.bots.get(bot))
            .or_else(|| self.workspaces.get(workspace_uid))
            .or(self.default.as_ref())
            .ok_or_else(|| {
                Error::ModelNotFound(format!(
                    "no system inference model configured for workspace '{workspace_uid}'"
                ))
            })
    }
}

/// Resolver backed by a [`ModelCatalog`]
pub struct ConfiguredResolver {
    catalog: ModelCatalog,
}

impl ConfiguredResolver {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ModelResolver for ConfiguredResolver {
    async fn resolve_chat_client(
        &self,
        workspace_uid: &str,
        bot_uid: Option<&str>,
    ) -> Result<SharedChatClient> {
        let config = self.catalog.select(workspace_uid, bot_uid)?;
        tracing::debug!(
            workspace_uid,
            bot_uid = bot_uid.unwrap_or("-"),
            provider = config.provider.name(),
            model = %config.model,
            "resolved chat model"
        );
        Ok(Arc::new(OpenAIProvider::new(config)?))
    }
}
