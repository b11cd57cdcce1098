//! Wire frames sent to the client during a generation

use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageBlock, SenderRole};

/// Payload of `message` and `error` frames.
///
/// `message.content` is incremental for streamed chunks: clients append it to
/// the block with the same `sectionUid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEventData {
    pub conversation_uid: String,
    pub message_uid: String,
    pub message_time: i64,
    pub sender_uid: String,
    pub sender_role: SenderRole,
    pub message: MessageBlock,
    pub is_finished: bool,
}

impl MessageEventData {
    /// Frame one block of `message`
    pub fn for_block(message: &Message, block: MessageBlock, is_finished: bool) -> Self {
        Self {
            conversation_uid: message.conversation_uid.clone(),
            message_uid: message.message_uid.clone(),
            message_time: message.message_time,
            sender_uid: message.sender_uid.clone(),
            sender_role: message.sender_role,
            message: block,
            is_finished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Message(MessageEventData),
    Done,
    Error(MessageEventData),
}

impl WireFrame {
    /// SSE event name
    pub fn event(&self) -> &'static str {
        match self {
            WireFrame::Message(_) => "message",
            WireFrame::Done => "done",
            WireFrame::Error(_) => "error",
        }
    }

    /// JSON payload; `done` frames carry none
    pub fn data(&self) -> Option<String> {
        match self {
            WireFrame::Message(data) | WireFrame::Error(data) => Some(to_json(data)),
            WireFrame::Done => None,
        }
    }

    pub fn payload(&self) -> Option<&MessageEventData> {
        match self {
            WireFrame::Message(data) | WireFrame::Error(data) => Some(data),
            WireFrame::Done => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WireFrame::Done | WireFrame::Error(_))
    }

    /// Encode as a raw `text/event-stream` frame
    pub fn encode(&self) -> String {
        match self.data() {
            Some(data) => format!("event: {}\ndata: {}\n\n", self.event(), data),
            None => format!("event: {}\n\n", self.event()),
        }
    }
}

/// Serialize a frame payload; failures are logged and yield an empty payload
fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to encode wire frame payload");
        String::new()
    })
}
