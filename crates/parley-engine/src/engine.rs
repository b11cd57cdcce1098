//! Chat engine: the entry points for generating, stopping and clearing memory

use std::sync::Arc;

use parley_ai::{ChatRequest, ModelResolver};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    cancel::CancellationRegistry,
    checkpoint::{CheckpointState, MessageCheckpoint},
    error::{Error, Result},
    memory::{BufferedHistory, ConversationMemory, to_chat_messages},
    models::{
        Account, BlockType, ContentType, Conversation, GenerateCmd, Message, MessageBlock,
        MessageSummary, SenderRole, new_uid,
    },
    pipeline,
    prompt::{self, RESET_MARKER},
    repository::{ConversationRepository, MessageRepository, MessageSummaryRepository},
    source::ModelEventSource,
    wire::WireFrame,
    workspace::WorkspaceAccess,
};

/// Sender uid of assistant messages when no bot is mentioned
pub const ASSISTANT_SENDER_UID: &str = "assistant";

/// Longest conversation name derived from the first question
const CONVERSATION_NAME_LEN: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Persona prompt placed ahead of every conversation
    pub system_prompt: String,
    /// Wire frames buffered between the generation task and the client
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: prompt::DEFAULT_SYSTEM_PROMPT.to_string(),
            channel_capacity: 32,
        }
    }
}

/// A running generation.
///
/// Frames arrive in order and always end with a `done` or `error` frame.
/// Dropping the frame receiver cancels the generation.
#[derive(Debug)]
pub struct Generation {
    conversation: Conversation,
    frames: mpsc::Receiver<WireFrame>,
    task: JoinHandle<CheckpointState>,
}

impl Generation {
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        self.frames.recv().await
    }

    /// Hand the frames to a consumer; the generation task keeps running on its own
    pub fn into_frames(self) -> ReceiverStream<WireFrame> {
        ReceiverStream::new(self.frames)
    }

    /// Drain every frame and wait for the generation to settle
    pub async fn collect(mut self) -> (Vec<WireFrame>, CheckpointState) {
        let mut frames = Vec::new();
        while let Some(frame) = self.frames.recv().await {
            frames.push(frame);
        }
        let state = match self.task.await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "generation task failed");
                CheckpointState::Failed
            }
        };
        (frames, state)
    }
}

pub struct ChatEngine {
    config: EngineConfig,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    summaries: Arc<dyn MessageSummaryRepository>,
    resolver: Arc<dyn ModelResolver>,
    workspaces: Arc<dyn WorkspaceAccess>,
    cancellations: CancellationRegistry,
}

impl ChatEngine {
    pub fn new(
        config: EngineConfig,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        summaries: Arc<dyn MessageSummaryRepository>,
        resolver: Arc<dyn ModelResolver>,
        workspaces: Arc<dyn WorkspaceAccess>,
    ) -> Self {
        Self {
            config,
            conversations,
            messages,
            summaries,
            resolver,
            workspaces,
            cancellations: CancellationRegistry::new(),
        }
    }

    /// Start generating the next assistant turn.
    ///
    /// Everything that can fail before streaming (access checks, conversation
    /// lookup, model resolution, persisting the question) is returned as an
    /// error here. After that, failures arrive as frames.
    pub async fn generate(
        &self,
        account: &Account,
        workspace_uid: Option<&str>,
        cmd: GenerateCmd,
    ) -> Result<Generation> {
        let workspace_uid = self.workspaces.resolve(&account.uid, workspace_uid).await?;
        let first_text = cmd
            .first_text()
            .ok_or_else(|| Error::InvalidRequest("query needs at least one text input".into()))?;

        let conversation = self
            .init_conversation(
                account,
                &workspace_uid,
                cmd.conversation_uid.as_deref(),
                &first_text,
            )
            .await?;

        let memory = ConversationMemory::new(
            conversation.clone(),
            workspace_uid.clone(),
            self.messages.clone(),
            self.summaries.clone(),
            self.resolver.clone(),
        );
        let history = memory.get_buffered_history().await?;

        let bot_uid = cmd.bot_uid();
        let client = self
            .resolver
            .resolve_chat_client(&workspace_uid, bot_uid)
            .await
            .map_err(Error::from_resolution)?;

        let question = self
            .messages
            .add(question_message(account, &conversation, &cmd))
            .await?;
        let request = self.build_request(&history, &question);

        let lease = self.cancellations.mark_active(&conversation.uid);
        let token = lease.token();
        let events =
            pipeline::assemble(ModelEventSource::new(client, request, token.clone()).into_stream());
        let checkpoint =
            MessageCheckpoint::new(bot_uid.unwrap_or(ASSISTANT_SENDER_UID), memory, token)
                .with_lease(lease);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let task = tokio::spawn(checkpoint.run(events, tx));

        tracing::info!(
            conversation_uid = %conversation.uid,
            %workspace_uid,
            bot_uid = bot_uid.unwrap_or("-"),
            history = history.messages.len(),
            summarized = history.summary.is_some(),
            "generation started"
        );

        Ok(Generation {
            conversation,
            frames: rx,
            task,
        })
    }

    /// Ask the live generation of a conversation to stop.
    ///
    /// Returns whether a live generation was signalled; it does not wait for
    /// the generation to wind down.
    pub async fn stop_generate(&self, account: &Account, conversation_uid: &str) -> Result<bool> {
        self.owned_conversation(account, conversation_uid).await?;
        Ok(self.cancellations.stop_generate(conversation_uid))
    }

    /// Start a fresh memory window without deleting history.
    ///
    /// Returns the reset marker written, or nothing if the conversation is
    /// already at a reset boundary.
    pub async fn clear_memory(
        &self,
        account: &Account,
        conversation_uid: &str,
    ) -> Result<Vec<Message>> {
        let conversation = self.owned_conversation(account, conversation_uid).await?;
        let reset = conversation.reset_message_uid.as_deref();

        if self
            .messages
            .find_latest(conversation_uid, 1, reset)
            .await?
            .is_empty()
        {
            return Ok(Vec::new());
        }

        let marker = self
            .messages
            .add(Message::system(conversation_uid, RESET_MARKER))
            .await?;
        self.conversations
            .update_reset_message_uid(conversation_uid, &marker.message_uid)
            .await?;

        // An empty summary at the marker keeps older summaries out of the new window.
        let summary_order = self
            .summaries
            .get_latest(conversation_uid)
            .await?
            .map_or(1, |s| s.summary_order + 1);
        self.summaries
            .add(MessageSummary {
                conversation_uid: conversation_uid.to_string(),
                summary: String::new(),
                last_message_uid: marker.message_uid.clone(),
                summary_order,
            })
            .await?;

        tracing::info!(
            conversation_uid,
            reset_message_uid = %marker.message_uid,
            "conversation memory cleared"
        );
        Ok(vec![marker])
    }

    async fn owned_conversation(
        &self,
        account: &Account,
        conversation_uid: &str,
    ) -> Result<Conversation> {
        self.conversations
            .get_by_uid(&account.uid, conversation_uid)
            .await?
            .ok_or_else(|| {
                Error::Unauthorized(format!(
                    "conversation '{conversation_uid}' is not accessible"
                ))
            })
    }

    async fn init_conversation(
        &self,
        account: &Account,
        workspace_uid: &str,
        conversation_uid: Option<&str>,
        first_text: &str,
    ) -> Result<Conversation> {
        match conversation_uid {
            Some(uid) => self.owned_conversation(account, uid).await,
            None => {
                let conversation = self
                    .conversations
                    .create(Conversation::new(
                        account.uid.clone(),
                        workspace_uid,
                        conversation_name(first_text),
                    ))
                    .await?;
                tracing::debug!(conversation_uid = %conversation.uid, "conversation created");
                Ok(conversation)
            }
        }
    }

    fn build_request(&self, history: &BufferedHistory, question: &Message) -> ChatRequest {
        let system_prompt = match &history.summary {
            Some(summary) => format!(
                "{}\n\n{}",
                self.config.system_prompt,
                prompt::summary_history_prompt(summary)
            ),
            None => self.config.system_prompt.clone(),
        };

        let mut request = ChatRequest::with_system(system_prompt);
        for message in history.chat_messages() {
            request.push(message);
        }
        for message in to_chat_messages(question) {
            request.push(message);
        }
        request
    }
}

/// Name a new conversation after its first question
fn conversation_name(first_text: &str) -> String {
    let name: String = first_text
        .replace(['\r', '\n'], " ")
        .chars()
        .take(CONVERSATION_NAME_LEN)
        .collect();
    let name = name.trim();
    if name.is_empty() {
        "Conversation".to_string()
    } else {
        name.to_string()
    }
}

/// The user's turn: referenced items first, then inputs, one section each
fn question_message(account: &Account, conversation: &Conversation, cmd: &GenerateCmd) -> Message {
    let mut message = Message::new(conversation.uid.clone(), account.uid.clone(), SenderRole::User);
    let refers = cmd.query.refers.iter().map(|item| {
        (
            ContentType::Refer(item.item_type.clone()),
            item.content_text(),
        )
    });
    let inputs = cmd
        .query
        .inputs
        .iter()
        .map(|item| (ContentType::from(item.item_type.clone()), item.content_text()));
    message.blocks = refers
        .chain(inputs)
        .map(|(content_type, content)| {
            MessageBlock::new(BlockType::Question, content_type, content, new_uid())
        })
        .collect();
    message
}
