//! Checkpoint accumulator: folds generation events into wire frames and one
//! persisted assistant message.
//!
//! State machine: `Idle -> Streaming -> {Completed, Cancelled, Failed}`. Every
//! terminal state persists the message exactly once; events arriving after a
//! terminal state are ignored.

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    cancel::GenerationLease,
    events::GenerationEvent,
    memory::ConversationMemory,
    models::{BlockType, ContentType, Message, MessageBlock, SenderRole, new_uid, now_millis},
    pipeline::EventStream,
    prompt::STOP_MARKER,
    wire::{MessageEventData, WireFrame},
};

/// A stream of wire frames for one generation
pub type FrameStream = Pin<Box<dyn Stream<Item = WireFrame> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl CheckpointState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointState::Completed | CheckpointState::Cancelled | CheckpointState::Failed
        )
    }
}

pub struct MessageCheckpoint {
    message: Message,
    memory: ConversationMemory,
    cancel: CancellationToken,
    state: CheckpointState,
    persisted: bool,
    lease: Option<GenerationLease>,
}

impl MessageCheckpoint {
    pub fn new(
        sender_uid: impl Into<String>,
        memory: ConversationMemory,
        cancel: CancellationToken,
    ) -> Self {
        let message = Message::new(
            memory.conversation().uid.clone(),
            sender_uid,
            SenderRole::Assistant,
        );
        Self {
            message,
            memory,
            cancel,
            state: CheckpointState::Idle,
            persisted: false,
            lease: None,
        }
    }

    /// Hold a registry lease; it is released on entering a terminal state,
    /// before the terminal frames are sent
    pub fn with_lease(mut self, lease: GenerationLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn state(&self) -> CheckpointState {
        self.state
    }

    /// The assistant message as assembled so far
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Fold one event, returning the frames to send
    pub async fn process(&mut self, event: GenerationEvent) -> Vec<WireFrame> {
        if self.state.is_terminal() {
            tracing::trace!(state = ?self.state, "ignoring event after terminal state");
            return Vec::new();
        }

        if !matches!(event, GenerationEvent::Start { .. }) && self.cancel.is_cancelled() {
            return self.cancelled().await;
        }

        match event {
            GenerationEvent::Start { section_uid } => {
                self.state = CheckpointState::Streaming;
                self.message.message_time = now_millis();
                tracing::debug!(message_uid = %self.message.message_uid, "assistant message started");
                let block = MessageBlock::new(BlockType::Answer, ContentType::Text, "", section_uid);
                vec![self.frame(block, false)]
            }
            GenerationEvent::Chunk { section_uid, text } => {
                self.state = CheckpointState::Streaming;
                match self
                    .message
                    .blocks
                    .iter_mut()
                    .find(|b| b.section_uid == section_uid)
                {
                    Some(block) => block.content.push_str(&text),
                    None => self.message.blocks.push(MessageBlock::new(
                        BlockType::Answer,
                        ContentType::Text,
                        text.clone(),
                        section_uid.clone(),
                    )),
                }
                let delta = MessageBlock::new(BlockType::Answer, ContentType::Text, text, section_uid);
                vec![self.frame(delta, false)]
            }
            GenerationEvent::End { .. } => {
                self.finish(CheckpointState::Completed).await;
                vec![WireFrame::Done]
            }
            GenerationEvent::Error { section_uid, cause } => {
                let block = MessageBlock::new(BlockType::Answer, ContentType::Error, cause, section_uid);
                self.message.blocks.push(block.clone());
                self.finish(CheckpointState::Failed).await;
                vec![WireFrame::Error(self.data(block, true))]
            }
        }
    }

    async fn cancelled(&mut self) -> Vec<WireFrame> {
        let block = MessageBlock::new(BlockType::System, ContentType::Text, STOP_MARKER, new_uid());
        self.message.blocks.push(block.clone());
        self.finish(CheckpointState::Cancelled).await;
        vec![self.frame(block, true), WireFrame::Done]
    }

    async fn finish(&mut self, state: CheckpointState) {
        self.state = state;
        self.lease = None;
        if self.persisted {
            return;
        }
        self.persisted = true;

        let conversation_uid = self.message.conversation_uid.clone();
        let message_uid = self.message.message_uid.clone();
        match self
            .memory
            .save_messages(vec![self.message.clone()], true)
            .await
        {
            Ok(_) => tracing::info!(
                %conversation_uid,
                %message_uid,
                state = ?state,
                blocks = self.message.blocks.len(),
                "assistant message persisted"
            ),
            Err(e) => tracing::error!(
                %conversation_uid,
                %message_uid,
                error = %e,
                "failed to persist assistant message"
            ),
        }
    }

    fn data(&self, block: MessageBlock, is_finished: bool) -> MessageEventData {
        MessageEventData::for_block(&self.message, block, is_finished)
    }

    fn frame(&self, block: MessageBlock, is_finished: bool) -> WireFrame {
        WireFrame::Message(self.data(block, is_finished))
    }

    /// Pull-based driver: frames are produced as the consumer polls
    pub fn into_stream(mut self, mut events: EventStream) -> FrameStream {
        Box::pin(stream! {
            while let Some(event) = events.next().await {
                for frame in self.process(event).await {
                    yield frame;
                }
                if self.state.is_terminal() {
                    break;
                }
            }
        })
    }

    /// Push-based driver: sends frames into a bounded channel.
    ///
    /// A closed channel means the client went away; the generation is then
    /// cancelled so it still finalizes and persists once.
    pub async fn run(
        mut self,
        mut events: EventStream,
        frames: mpsc::Sender<WireFrame>,
    ) -> CheckpointState {
        while let Some(event) = events.next().await {
            for frame in self.process(event).await {
                if frames.send(frame).await.is_err() && !self.cancel.is_cancelled() {
                    tracing::info!(
                        conversation_uid = %self.message.conversation_uid,
                        "client disconnected, cancelling generation"
                    );
                    self.cancel.cancel();
                }
            }
            if self.state.is_terminal() {
                break;
            }
        }
        self.state
    }
}
