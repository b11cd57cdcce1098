//! Workspace membership checks

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Answers which workspaces an account may generate in
#[async_trait]
pub trait WorkspaceAccess: Send + Sync {
    /// The account's personal workspace, if it has one
    async fn personal_workspace(&self, account_uid: &str) -> Result<Option<String>>;

    async fn is_member(&self, account_uid: &str, workspace_uid: &str) -> Result<bool>;

    /// Pick the workspace a request runs in.
    ///
    /// Without an explicit workspace the personal one is used; an explicit one
    /// requires membership.
    async fn resolve(&self, account_uid: &str, workspace_uid: Option<&str>) -> Result<String> {
        match workspace_uid {
            None => self.personal_workspace(account_uid).await?.ok_or_else(|| {
                Error::Unauthorized(format!("account '{account_uid}' has no personal workspace"))
            }),
            Some(workspace_uid) => {
                if self.is_member(account_uid, workspace_uid).await? {
                    Ok(workspace_uid.to_string())
                } else {
                    Err(Error::Unauthorized(format!(
                        "account '{account_uid}' is not a member of workspace '{workspace_uid}'"
                    )))
                }
            }
        }
    }
}

/// Fixed workspace assignments, loaded from config
#[derive(Debug, Clone, Default)]
pub struct StaticWorkspaces {
    personal: HashMap<String, String>,
    members: HashMap<String, HashSet<String>>,
}

impl StaticWorkspaces {
    pub fn new(
        personal: HashMap<String, String>,
        members: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            personal,
            members: members
                .into_iter()
                .map(|(workspace, accounts)| (workspace, accounts.into_iter().collect()))
                .collect(),
        }
    }

    pub fn with_personal(mut self, account_uid: &str, workspace_uid: &str) -> Self {
        self.personal
            .insert(account_uid.to_string(), workspace_uid.to_string());
        self
    }

    pub fn with_member(mut self, workspace_uid: &str, account_uid: &str) -> Self {
        self.members
            .entry(workspace_uid.to_string())
            .or_default()
            .insert(account_uid.to_string());
        self
    }
}

#[async_trait]
impl WorkspaceAccess for StaticWorkspaces {
    async fn personal_workspace(&self, account_uid: &str) -> Result<Option<String>> {
        Ok(self.personal.get(account_uid).cloned())
    }

    async fn is_member(&self, account_uid: &str, workspace_uid: &str) -> Result<bool> {
        let personal = self
            .personal
            .get(account_uid)
            .is_some_and(|ws| ws == workspace_uid);
        let listed = self
            .members
            .get(workspace_uid)
            .is_some_and(|accounts| accounts.contains(account_uid));
        Ok(personal || listed)
    }
}
