//! parley-engine: Streaming conversation generation engine
//!
//! This crate turns one chat request into a live stream of wire frames, a
//! checkpointed assistant message, and a bounded, summarized memory window for
//! the next turn. Generations can be stopped from a separate request.

pub mod cancel;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod repository;
pub mod source;
#[cfg(test)]
mod testing;
pub mod wire;
pub mod workspace;

pub use cancel::{CancellationRegistry, GenerationLease};
pub use checkpoint::{CheckpointState, MessageCheckpoint};
pub use engine::{ChatEngine, EngineConfig, Generation};
pub use error::Error;
pub use events::GenerationEvent;
pub use memory::{BufferedHistory, ConversationMemory};
pub use models::{
    Account, BlockType, ContentType, Conversation, GenerateCmd, Item, Mention, Message,
    MessageBlock, MessageSummary, Query, SenderRole,
};
pub use repository::{
    ConversationRepository, InMemoryConversationRepository, InMemoryMessageRepository,
    InMemorySummaryRepository, MessageRepository, MessageSummaryRepository,
};
pub use wire::{MessageEventData, WireFrame};
pub use workspace::{StaticWorkspaces, WorkspaceAccess};
