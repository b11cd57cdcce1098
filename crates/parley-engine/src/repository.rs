//! Persistence collaborators and their in-memory implementations
//!
//! Message queries all honour a conversation's reset boundary: when
//! `reset_message_uid` is given, only messages after the boundary are
//! visible. Results are always in chronological order.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    error::{Error, Result},
    models::{Conversation, Message, MessageSummary, new_uid},
};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn add(&self, message: Message) -> Result<Message>;

    async fn add_batch(&self, messages: Vec<Message>) -> Result<Vec<Message>>;

    /// The last `count` messages
    async fn find_latest(
        &self,
        conversation_uid: &str,
        count: usize,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>>;

    /// Messages strictly after `after_uid` (or from the start when `None`)
    async fn find_after_uid(
        &self,
        conversation_uid: &str,
        after_uid: Option<&str>,
        limit: Option<usize>,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>>;

    /// Up to `limit` messages immediately before `before_uid`
    async fn find_before_uid(
        &self,
        conversation_uid: &str,
        before_uid: &str,
        limit: usize,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>>;

    async fn count_after_uid(
        &self,
        conversation_uid: &str,
        after_uid: Option<&str>,
        reset_message_uid: Option<&str>,
    ) -> Result<usize>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Look up a conversation owned by `creator_uid`
    async fn get_by_uid(&self, creator_uid: &str, uid: &str) -> Result<Option<Conversation>>;

    async fn create(&self, conversation: Conversation) -> Result<Conversation>;

    async fn update_reset_message_uid(&self, uid: &str, reset_message_uid: &str) -> Result<()>;
}

#[async_trait]
pub trait MessageSummaryRepository: Send + Sync {
    async fn add(&self, summary: MessageSummary) -> Result<MessageSummary>;

    /// The summary with the highest `summary_order`
    async fn get_latest(&self, conversation_uid: &str) -> Result<Option<MessageSummary>>;
}

/// Messages kept per conversation in insertion order
#[derive(Default)]
pub struct InMemoryMessageRepository {
    conversations: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message of a conversation, ignoring any reset
    pub fn all(&self, conversation_uid: &str) -> Vec<Message> {
        self.conversations
            .read()
            .get(conversation_uid)
            .cloned()
            .unwrap_or_default()
    }

    fn insert(&self, mut message: Message) -> Message {
        if message.message_uid.is_empty() {
            message.message_uid = new_uid();
        }
        self.conversations
            .write()
            .entry(message.conversation_uid.clone())
            .or_default()
            .push(message.clone());
        message
    }

    /// Run `f` over the messages visible after the reset boundary
    fn with_visible<T>(
        &self,
        conversation_uid: &str,
        reset_message_uid: Option<&str>,
        f: impl FnOnce(&[Message]) -> Result<T>,
    ) -> Result<T> {
        let guard = self.conversations.read();
        let messages = guard.get(conversation_uid).map(Vec::as_slice).unwrap_or(&[]);
        let start = match reset_message_uid {
            Some(reset) => position(messages, reset)? + 1,
            None => 0,
        };
        f(&messages[start..])
    }
}

fn position(messages: &[Message], uid: &str) -> Result<usize> {
    messages
        .iter()
        .position(|m| m.message_uid == uid)
        .ok_or_else(|| Error::Repository(format!("unknown message uid '{uid}'")))
}

/// Index of the first visible message after `after_uid`.
///
/// A boundary from before the reset yields the whole visible window.
fn start_after(visible: &[Message], all_before_reset: bool, after_uid: &str) -> Result<usize> {
    match visible.iter().position(|m| m.message_uid == after_uid) {
        Some(idx) => Ok(idx + 1),
        None if all_before_reset => Ok(0),
        None => Err(Error::Repository(format!("unknown message uid '{after_uid}'"))),
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn add(&self, message: Message) -> Result<Message> {
        Ok(self.insert(message))
    }

    async fn add_batch(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        Ok(messages.into_iter().map(|m| self.insert(m)).collect())
    }

    async fn find_latest(
        &self,
        conversation_uid: &str,
        count: usize,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.with_visible(conversation_uid, reset_message_uid, |visible| {
            let start = visible.len().saturating_sub(count);
            Ok(visible[start..].to_vec())
        })
    }

    async fn find_after_uid(
        &self,
        conversation_uid: &str,
        after_uid: Option<&str>,
        limit: Option<usize>,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.with_visible(conversation_uid, reset_message_uid, |visible| {
            let start = match after_uid {
                Some(uid) => start_after(visible, reset_message_uid.is_some(), uid)?,
                None => 0,
            };
            let rest = &visible[start..];
            let end = limit.map_or(rest.len(), |l| l.min(rest.len()));
            Ok(rest[..end].to_vec())
        })
    }

    async fn find_before_uid(
        &self,
        conversation_uid: &str,
        before_uid: &str,
        limit: usize,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.with_visible(conversation_uid, reset_message_uid, |visible| {
            let end = position(visible, before_uid)?;
            let start = end.saturating_sub(limit);
            Ok(visible[start..end].to_vec())
        })
    }

    async fn count_after_uid(
        &self,
        conversation_uid: &str,
        after_uid: Option<&str>,
        reset_message_uid: Option<&str>,
    ) -> Result<usize> {
        self.with_visible(conversation_uid, reset_message_uid, |visible| {
            let start = match after_uid {
                Some(uid) => start_after(visible, reset_message_uid.is_some(), uid)?,
                None => 0,
            };
            Ok(visible.len() - start)
        })
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn get_by_uid(&self, creator_uid: &str, uid: &str) -> Result<Option<Conversation>> {
        Ok(self
            .conversations
            .read()
            .get(uid)
            .filter(|c| c.creator_uid == creator_uid)
            .cloned())
    }

    async fn create(&self, conversation: Conversation) -> Result<Conversation> {
        let mut conversations = self.conversations.write();
        if conversations.contains_key(&conversation.uid) {
            return Err(Error::Repository(format!(
                "conversation '{}' already exists",
                conversation.uid
            )));
        }
        conversations.insert(conversation.uid.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn update_reset_message_uid(&self, uid: &str, reset_message_uid: &str) -> Result<()> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(uid)
            .ok_or_else(|| Error::Repository(format!("unknown conversation '{uid}'")))?;
        conversation.reset_message_uid = Some(reset_message_uid.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySummaryRepository {
    summaries: RwLock<HashMap<String, Vec<MessageSummary>>>,
}

impl InMemorySummaryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self, conversation_uid: &str) -> Vec<MessageSummary> {
        self.summaries
            .read()
            .get(conversation_uid)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageSummaryRepository for InMemorySummaryRepository {
    async fn add(&self, summary: MessageSummary) -> Result<MessageSummary> {
        self.summaries
            .write()
            .entry(summary.conversation_uid.clone())
            .or_default()
            .push(summary.clone());
        Ok(summary)
    }

    async fn get_latest(&self, conversation_uid: &str) -> Result<Option<MessageSummary>> {
        Ok(self
            .summaries
            .read()
            .get(conversation_uid)
            .and_then(|all| all.iter().max_by_key(|s| s.summary_order))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SenderRole;

    async fn seeded(n: usize) -> (InMemoryMessageRepository, Vec<String>) {
        let repo = InMemoryMessageRepository::new();
        let mut uids = Vec::new();
        for i in 0..n {
            let mut m = Message::new("c1", "u1", SenderRole::User);
            m.message_uid = format!("m{i}");
            uids.push(repo.add(m).await.unwrap().message_uid);
        }
        (repo, uids)
    }

    fn uids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.message_uid.as_str()).collect()
    }

    #[tokio::test]
    async fn test_find_latest_is_chronological() {
        let (repo, _) = seeded(5).await;
        let latest = repo.find_latest("c1", 3, None).await.unwrap();
        assert_eq!(uids(&latest), ["m2", "m3", "m4"]);
        assert!(repo.find_latest("other", 3, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_after_and_count() {
        let (repo, _) = seeded(6).await;
        let after = repo.find_after_uid("c1", Some("m2"), None, None).await.unwrap();
        assert_eq!(uids(&after), ["m3", "m4", "m5"]);
        let limited = repo.find_after_uid("c1", None, Some(2), None).await.unwrap();
        assert_eq!(uids(&limited), ["m0", "m1"]);
        assert_eq!(repo.count_after_uid("c1", Some("m2"), None).await.unwrap(), 3);
        assert_eq!(repo.count_after_uid("c1", None, None).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_find_before() {
        let (repo, _) = seeded(6).await;
        let before = repo.find_before_uid("c1", "m4", 2, None).await.unwrap();
        assert_eq!(uids(&before), ["m2", "m3"]);
        let clipped = repo.find_before_uid("c1", "m1", 5, None).await.unwrap();
        assert_eq!(uids(&clipped), ["m0"]);
    }

    #[tokio::test]
    async fn test_reset_filter_excludes_boundary() {
        let (repo, _) = seeded(6).await;
        let latest = repo.find_latest("c1", 10, Some("m3")).await.unwrap();
        assert_eq!(uids(&latest), ["m4", "m5"]);
        let before = repo.find_before_uid("c1", "m5", 10, Some("m3")).await.unwrap();
        assert_eq!(uids(&before), ["m4"]);
        assert!(repo.find_latest("c1", 10, Some("m5")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_boundary_before_reset_sees_whole_window() {
        let (repo, _) = seeded(6).await;
        let after = repo.find_after_uid("c1", Some("m1"), None, Some("m3")).await.unwrap();
        assert_eq!(uids(&after), ["m4", "m5"]);
        assert_eq!(repo.count_after_uid("c1", Some("m1"), Some("m3")).await.unwrap(), 2);
        let at_reset = repo.find_after_uid("c1", Some("m3"), None, Some("m3")).await.unwrap();
        assert_eq!(uids(&at_reset), ["m4", "m5"]);
    }

    #[tokio::test]
    async fn test_unknown_uid_is_error() {
        let (repo, _) = seeded(2).await;
        assert!(matches!(
            repo.find_after_uid("c1", Some("nope"), None, None).await,
            Err(Error::Repository(_))
        ));
    }

    #[tokio::test]
    async fn test_add_assigns_missing_uid() {
        let repo = InMemoryMessageRepository::new();
        let mut m = Message::new("c1", "u1", SenderRole::User);
        m.message_uid.clear();
        let stored = repo.add(m).await.unwrap();
        assert!(!stored.message_uid.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_scoped_to_creator() {
        let repo = InMemoryConversationRepository::new();
        let conversation = repo.create(Conversation::new("alice", "ws", "hi")).await.unwrap();
        assert!(repo.get_by_uid("alice", &conversation.uid).await.unwrap().is_some());
        assert!(repo.get_by_uid("bob", &conversation.uid).await.unwrap().is_none());

        repo.update_reset_message_uid(&conversation.uid, "m9").await.unwrap();
        let reloaded = repo.get_by_uid("alice", &conversation.uid).await.unwrap().unwrap();
        assert_eq!(reloaded.reset_message_uid.as_deref(), Some("m9"));
    }

    #[tokio::test]
    async fn test_latest_summary_by_order() {
        let repo = InMemorySummaryRepository::new();
        for (order, text) in [(1, "one"), (3, "three"), (2, "two")] {
            repo.add(MessageSummary {
                conversation_uid: "c1".into(),
                summary: text.into(),
                last_message_uid: format!("m{order}"),
                summary_order: order,
            })
            .await
            .unwrap();
        }
        let latest = repo.get_latest("c1").await.unwrap().unwrap();
        assert_eq!(latest.summary, "three");
        assert!(repo.get_latest("c2").await.unwrap().is_none());
    }
}
