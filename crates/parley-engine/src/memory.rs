//! Conversation memory: a bounded history window plus a rolling summary.
//!
//! Reads return the latest summary together with the messages it does not
//! cover yet. Writes persist messages and then, once enough unsummarized
//! messages pile up, fold the oldest batch into a new summary using the
//! workspace's system model.

use std::sync::Arc;

use parking_lot::Mutex;
use parley_ai::{ChatMessage, ChatRequest, ModelResolver, Role};
use tokio::task::JoinHandle;

use crate::{
    error::{Error, Result},
    models::{BlockType, ContentType, Conversation, Message, MessageSummary, SenderRole},
    prompt,
    repository::{MessageRepository, MessageSummaryRepository},
};

/// Unsummarized messages needed before a prune runs; also the batch size
pub const SUMMARY_THRESHOLD: usize = 10;

/// History window when no summary exists yet
pub const BUFFER_WITHOUT_SUMMARY: usize = 10;

/// Recent messages shown when nothing follows the summary boundary
pub const FALLBACK_AFTER_SUMMARY: usize = 4;

/// Minimum window after a summary, padded from before the boundary
pub const MIN_BUFFERED: usize = 6;

/// The memory handed to prompt assembly
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedHistory {
    pub summary: Option<String>,
    pub messages: Vec<Message>,
}

impl BufferedHistory {
    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().flat_map(to_chat_messages).collect()
    }
}

/// Convert a stored message into model chat turns.
///
/// User text blocks join into a single turn; each assistant text block is its
/// own turn. System markers and error blocks never reach the model.
pub fn to_chat_messages(message: &Message) -> Vec<ChatMessage> {
    match message.sender_role {
        SenderRole::User => {
            let text = message
                .blocks
                .iter()
                .filter(|b| b.content_type.is_text())
                .map(|b| b.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if text.is_empty() {
                Vec::new()
            } else {
                vec![ChatMessage::user(text)]
            }
        }
        SenderRole::Assistant => message
            .blocks
            .iter()
            .filter(|b| b.block_type == BlockType::Answer && b.content_type == ContentType::Text)
            .filter(|b| !b.content.is_empty())
            .map(|b| ChatMessage::assistant(b.content.clone()))
            .collect(),
        SenderRole::System => Vec::new(),
    }
}

/// Render messages as a plain `Human:` / `AI:` transcript for summarization
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .flat_map(to_chat_messages)
        .filter_map(|m| match m.role {
            Role::User => Some(format!("Human: {}", m.content)),
            Role::Assistant => Some(format!("AI: {}", m.content)),
            Role::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Memory for one conversation, scoped to the workspace whose model summarizes it
#[derive(Clone)]
pub struct ConversationMemory {
    conversation: Conversation,
    workspace_uid: String,
    messages: Arc<dyn MessageRepository>,
    summaries: Arc<dyn MessageSummaryRepository>,
    resolver: Arc<dyn ModelResolver>,
    prune_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConversationMemory {
    pub fn new(
        conversation: Conversation,
        workspace_uid: impl Into<String>,
        messages: Arc<dyn MessageRepository>,
        summaries: Arc<dyn MessageSummaryRepository>,
        resolver: Arc<dyn ModelResolver>,
    ) -> Self {
        Self {
            conversation,
            workspace_uid: workspace_uid.into(),
            messages,
            summaries,
            resolver,
            prune_task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn conversation_uid(&self) -> &str {
        &self.conversation.uid
    }

    fn reset_uid(&self) -> Option<&str> {
        self.conversation.reset_message_uid.as_deref()
    }

    /// Load the summary and the recent messages it does not cover
    pub async fn get_buffered_history(&self) -> Result<BufferedHistory> {
        let cid = self.conversation_uid();
        let reset = self.reset_uid();

        let Some(summary) = self.summaries.get_latest(cid).await? else {
            let messages = self
                .messages
                .find_latest(cid, BUFFER_WITHOUT_SUMMARY, reset)
                .await?;
            return Ok(BufferedHistory {
                summary: None,
                messages,
            });
        };

        let mut after = self
            .messages
            .find_after_uid(cid, Some(&summary.last_message_uid), None, reset)
            .await?;

        let messages = if after.is_empty() {
            self.messages
                .find_latest(cid, FALLBACK_AFTER_SUMMARY, reset)
                .await?
        } else if after.len() < MIN_BUFFERED {
            let first = after[0].message_uid.clone();
            let mut padded = self
                .messages
                .find_before_uid(cid, &first, MIN_BUFFERED - after.len(), reset)
                .await?;
            padded.append(&mut after);
            padded
        } else {
            after
        };

        let summary = Some(summary.summary).filter(|s| !s.trim().is_empty());
        Ok(BufferedHistory { summary, messages })
    }

    /// Persist messages for this conversation, then prune.
    ///
    /// With `prune_in_background` the prune runs as a spawned task and its
    /// failure is only logged; otherwise it is awaited and its error returned.
    pub async fn save_messages(
        &self,
        messages: Vec<Message>,
        prune_in_background: bool,
    ) -> Result<Vec<Message>> {
        let messages = messages
            .into_iter()
            .map(|mut m| {
                m.conversation_uid = self.conversation.uid.clone();
                m
            })
            .collect();
        let saved = self.messages.add_batch(messages).await?;

        if prune_in_background {
            let memory = self.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = memory.prune().await {
                    tracing::warn!(
                        conversation_uid = %memory.conversation.uid,
                        error = %e,
                        "background summarization failed"
                    );
                }
            });
            *self.prune_task.lock() = Some(handle);
        } else {
            self.prune().await?;
        }

        Ok(saved)
    }

    /// Wait for the most recent background prune, if any
    pub async fn wait_for_prune(&self) {
        let handle = self.prune_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Fold the oldest unsummarized batch into a new summary once the
    /// threshold is reached. Returns the summary written, if any.
    pub async fn prune(&self) -> Result<Option<MessageSummary>> {
        let cid = self.conversation_uid();
        let reset = self.reset_uid();

        let latest = self.summaries.get_latest(cid).await?;
        let boundary = latest.as_ref().map(|s| s.last_message_uid.as_str());

        let pending = self.messages.count_after_uid(cid, boundary, reset).await?;
        if pending < SUMMARY_THRESHOLD {
            tracing::trace!(conversation_uid = cid, pending, "below summary threshold");
            return Ok(None);
        }

        let batch = self
            .messages
            .find_after_uid(cid, boundary, Some(SUMMARY_THRESHOLD), reset)
            .await?;
        let Some(last) = batch.last() else {
            return Ok(None);
        };

        let current = latest.as_ref().map(|s| s.summary.as_str()).unwrap_or("");
        let request = ChatRequest {
            system_prompt: None,
            messages: vec![ChatMessage::user(prompt::summary_prompt(
                current,
                &render_transcript(&batch),
            ))],
        };

        let client = self
            .resolver
            .resolve_chat_client(&self.workspace_uid, None)
            .await
            .map_err(|e| Error::Summarization(e.to_string()))?;
        let text = client
            .complete(&request)
            .await
            .map_err(|e| Error::Summarization(e.to_string()))?;

        let summary = MessageSummary {
            conversation_uid: cid.to_string(),
            summary: text.trim().to_string(),
            last_message_uid: last.message_uid.clone(),
            summary_order: latest.map_or(1, |s| s.summary_order + 1),
        };
        let summary = self.summaries.add(summary).await?;

        tracing::info!(
            conversation_uid = cid,
            summary_order = summary.summary_order,
            summarized = batch.len(),
            "conversation summary updated"
        );
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{MessageBlock, new_uid},
        repository::{InMemoryMessageRepository, InMemorySummaryRepository},
        testing::{ScriptedClient, ScriptedResolver},
    };

    struct Fixture {
        messages: Arc<InMemoryMessageRepository>,
        summaries: Arc<InMemorySummaryRepository>,
        client: Arc<ScriptedClient>,
        memory: ConversationMemory,
    }

    fn fixture() -> Fixture {
        fixture_with_reset(None)
    }

    fn fixture_with_reset(reset: Option<&str>) -> Fixture {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let summaries = Arc::new(InMemorySummaryRepository::new());
        let client = Arc::new(ScriptedClient::new(["rolled-up summary"]));
        let mut conversation = Conversation::new("alice", "ws", "test");
        conversation.uid = "c1".into();
        conversation.reset_message_uid = reset.map(str::to_string);
        let memory = ConversationMemory::new(
            conversation,
            "ws",
            messages.clone(),
            summaries.clone(),
            Arc::new(ScriptedResolver::new(client.clone())),
        );
        Fixture {
            messages,
            summaries,
            client,
            memory,
        }
    }

    fn text_message(i: usize) -> Message {
        let (role, block_type) = if i % 2 == 0 {
            (SenderRole::User, BlockType::Question)
        } else {
            (SenderRole::Assistant, BlockType::Answer)
        };
        let mut m = Message::new("c1", "someone", role);
        m.message_uid = format!("m{i}");
        m.blocks.push(MessageBlock::new(
            block_type,
            ContentType::Text,
            format!("text {i}"),
            new_uid(),
        ));
        m
    }

    async fn seed(f: &Fixture, range: std::ops::Range<usize>) {
        for i in range {
            f.messages.add(text_message(i)).await.unwrap();
        }
    }

    async fn add_summary(f: &Fixture, last: &str, order: u64) {
        f.summaries
            .add(MessageSummary {
                conversation_uid: "c1".into(),
                summary: "earlier".into(),
                last_message_uid: last.into(),
                summary_order: order,
            })
            .await
            .unwrap();
    }

    fn uids(history: &BufferedHistory) -> Vec<&str> {
        history.messages.iter().map(|m| m.message_uid.as_str()).collect()
    }

    #[tokio::test]
    async fn test_history_without_summary_takes_latest_ten() {
        let f = fixture();
        seed(&f, 0..14).await;
        let history = f.memory.get_buffered_history().await.unwrap();
        assert!(history.summary.is_none());
        assert_eq!(history.messages.len(), 10);
        assert_eq!(history.messages[0].message_uid, "m4");
    }

    #[tokio::test]
    async fn test_history_after_summary() {
        let f = fixture();
        seed(&f, 0..20).await;
        add_summary(&f, "m9", 1).await;
        let history = f.memory.get_buffered_history().await.unwrap();
        assert_eq!(history.summary.as_deref(), Some("earlier"));
        assert_eq!(history.messages.len(), 10);
        assert_eq!(history.messages[0].message_uid, "m10");
    }

    #[tokio::test]
    async fn test_history_padded_to_minimum() {
        let f = fixture();
        seed(&f, 0..12).await;
        add_summary(&f, "m9", 1).await;
        let history = f.memory.get_buffered_history().await.unwrap();
        assert_eq!(uids(&history), ["m6", "m7", "m8", "m9", "m10", "m11"]);
    }

    #[tokio::test]
    async fn test_history_nothing_after_summary() {
        let f = fixture();
        seed(&f, 0..10).await;
        add_summary(&f, "m9", 1).await;
        let history = f.memory.get_buffered_history().await.unwrap();
        assert_eq!(uids(&history), ["m6", "m7", "m8", "m9"]);
    }

    #[tokio::test]
    async fn test_history_respects_reset() {
        let f = fixture_with_reset(Some("m5"));
        seed(&f, 0..8).await;
        let history = f.memory.get_buffered_history().await.unwrap();
        assert_eq!(uids(&history), ["m6", "m7"]);
    }

    #[tokio::test]
    async fn test_empty_summary_is_not_injected() {
        let f = fixture();
        seed(&f, 0..3).await;
        f.summaries
            .add(MessageSummary {
                conversation_uid: "c1".into(),
                summary: String::new(),
                last_message_uid: "m0".into(),
                summary_order: 1,
            })
            .await
            .unwrap();
        let history = f.memory.get_buffered_history().await.unwrap();
        assert!(history.summary.is_none());
    }

    #[tokio::test]
    async fn test_prune_below_threshold_does_nothing() {
        let f = fixture();
        seed(&f, 0..9).await;
        assert!(f.memory.prune().await.unwrap().is_none());
        assert!(f.summaries.all("c1").is_empty());
        assert!(f.client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_prune_summarizes_oldest_batch() {
        let f = fixture();
        seed(&f, 0..12).await;
        let summary = f.memory.prune().await.unwrap().unwrap();
        assert_eq!(summary.summary, "rolled-up summary");
        assert_eq!(summary.last_message_uid, "m9");
        assert_eq!(summary.summary_order, 1);

        let requests = f.client.requests();
        assert_eq!(requests.len(), 1);
        let prompt = &requests[0].messages[0].content;
        assert!(prompt.contains("Human: text 0"));
        assert!(prompt.contains("AI: text 9"));
        assert!(!prompt.contains("text 10"));
    }

    #[tokio::test]
    async fn test_prune_at_exactly_threshold() {
        let f = fixture();
        seed(&f, 0..10).await;
        let summary = f.memory.prune().await.unwrap().unwrap();
        assert_eq!(summary.last_message_uid, "m9");
        assert_eq!(f.summaries.all("c1").len(), 1);
        assert!(f.memory.prune().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_three_after_boundary_padded_to_six() {
        let f = fixture();
        seed(&f, 0..13).await;
        add_summary(&f, "m9", 1).await;
        let history = f.memory.get_buffered_history().await.unwrap();
        assert_eq!(uids(&history), ["m7", "m8", "m9", "m10", "m11", "m12"]);
    }

    #[tokio::test]
    async fn test_prune_extends_existing_summary() {
        let f = fixture();
        seed(&f, 0..25).await;
        add_summary(&f, "m9", 4).await;
        let summary = f.memory.prune().await.unwrap().unwrap();
        assert_eq!(summary.last_message_uid, "m19");
        assert_eq!(summary.summary_order, 5);
        assert!(f.client.requests()[0].messages[0].content.contains("earlier"));
    }

    #[tokio::test]
    async fn test_save_messages_tags_and_prunes_in_background() {
        let f = fixture();
        seed(&f, 0..9).await;
        let mut extra = text_message(9);
        extra.conversation_uid = "wrong".into();
        let saved = f.memory.save_messages(vec![extra], true).await.unwrap();
        assert_eq!(saved[0].conversation_uid, "c1");

        f.memory.wait_for_prune().await;
        assert_eq!(f.summaries.all("c1").len(), 1);
    }

    #[tokio::test]
    async fn test_background_prune_failure_is_contained() {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let summaries = Arc::new(InMemorySummaryRepository::new());
        let mut conversation = Conversation::new("alice", "ws", "test");
        conversation.uid = "c1".into();
        let memory = ConversationMemory::new(
            conversation,
            "ws",
            messages.clone(),
            summaries.clone(),
            Arc::new(ScriptedResolver::unconfigured()),
        );
        for i in 0..9 {
            messages.add(text_message(i)).await.unwrap();
        }
        let saved = memory.save_messages(vec![text_message(9)], true).await;
        assert!(saved.is_ok());
        memory.wait_for_prune().await;
        assert!(summaries.all("c1").is_empty());

        let foreground = memory.save_messages(vec![text_message(10)], false).await;
        assert!(matches!(foreground, Err(Error::Summarization(_))));
    }

    #[test]
    fn test_chat_message_conversion() {
        let mut user = Message::new("c1", "u", SenderRole::User);
        user.blocks.push(MessageBlock::new(
            BlockType::Question,
            ContentType::Refer("text".into()),
            "quoted",
            "s1",
        ));
        user.blocks.push(MessageBlock::new(
            BlockType::Question,
            ContentType::Text,
            "question",
            "s2",
        ));
        let converted = to_chat_messages(&user);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].content, "quoted\nquestion");

        let mut assistant = Message::new("c1", "bot", SenderRole::Assistant);
        assistant.blocks.push(MessageBlock::new(
            BlockType::Answer,
            ContentType::Text,
            "one",
            "s1",
        ));
        assistant.blocks.push(MessageBlock::new(
            BlockType::Answer,
            ContentType::Error,
            "boom",
            "s2",
        ));
        assistant.blocks.push(MessageBlock::new(
            BlockType::System,
            ContentType::Text,
            prompt::STOP_MARKER,
            "s3",
        ));
        let converted = to_chat_messages(&assistant);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, Role::Assistant);

        assert!(to_chat_messages(&Message::system("c1", prompt::RESET_MARKER)).is_empty());
    }
}
