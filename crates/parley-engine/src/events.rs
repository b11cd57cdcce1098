//! Generation event types

use serde::{Deserialize, Serialize};

use crate::models::new_uid;

/// Events flowing from the model source through the pipeline to the checkpoint.
///
/// Every section of streamed text is keyed by a `section_uid`; chunks sharing a
/// section fold into one message block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// Generation started
    Start { section_uid: String },

    /// A text delta for a section
    Chunk { section_uid: String, text: String },

    /// Generation finished normally
    End { section_uid: String },

    /// Generation failed
    Error { section_uid: String, cause: String },
}

impl GenerationEvent {
    pub fn start() -> Self {
        GenerationEvent::Start {
            section_uid: new_uid(),
        }
    }

    pub fn chunk(section_uid: impl Into<String>, text: impl Into<String>) -> Self {
        GenerationEvent::Chunk {
            section_uid: section_uid.into(),
            text: text.into(),
        }
    }

    pub fn end() -> Self {
        GenerationEvent::End {
            section_uid: new_uid(),
        }
    }

    /// An error event in its own fresh section
    pub fn error(cause: impl std::fmt::Display) -> Self {
        GenerationEvent::Error {
            section_uid: new_uid(),
            cause: cause.to_string(),
        }
    }

    pub fn section_uid(&self) -> &str {
        match self {
            GenerationEvent::Start { section_uid }
            | GenerationEvent::Chunk { section_uid, .. }
            | GenerationEvent::End { section_uid }
            | GenerationEvent::Error { section_uid, .. } => section_uid,
        }
    }

    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationEvent::End { .. } | GenerationEvent::Error { .. }
        )
    }
}
