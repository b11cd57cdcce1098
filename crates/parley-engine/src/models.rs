//! Conversation data model
//!
//! These types are persisted by the repositories and, for [`Message`], also
//! returned to clients, so their serde shape uses camelCase field names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generate a fresh opaque identifier
pub fn new_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uid: String,
}

impl Account {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub uid: String,
    pub creator_uid: String,
    pub workspace_uid: String,
    pub name: String,
    /// Messages before this one are invisible to memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_message_uid: Option<String>,
    pub created_at: i64,
}

impl Conversation {
    pub fn new(
        creator_uid: impl Into<String>,
        workspace_uid: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            uid: new_uid(),
            creator_uid: creator_uid.into(),
            workspace_uid: workspace_uid.into(),
            name: name.into(),
            reset_message_uid: None,
            created_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Question,
    Answer,
    System,
}

/// What a block's content holds.
///
/// Serialized as a plain string: `text`, `mention`, `error`, or `refer:<type>`
/// for referenced material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    Text,
    Mention,
    Error,
    Refer(String),
    Other(String),
}

impl ContentType {
    /// Whether the content is readable text, including referenced text
    pub fn is_text(&self) -> bool {
        match self {
            ContentType::Text => true,
            ContentType::Refer(kind) | ContentType::Other(kind) => kind.contains("text"),
            ContentType::Mention | ContentType::Error => false,
        }
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => ContentType::Text,
            "mention" => ContentType::Mention,
            "error" => ContentType::Error,
            other => match other.strip_prefix("refer:") {
                Some(kind) => ContentType::Refer(kind.to_string()),
                None => ContentType::Other(value),
            },
        }
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        match value {
            ContentType::Text => "text".to_string(),
            ContentType::Mention => "mention".to_string(),
            ContentType::Error => "error".to_string(),
            ContentType::Refer(kind) => format!("refer:{kind}"),
            ContentType::Other(kind) => kind,
        }
    }
}

/// One unit of content within a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBlock {
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub content_type: ContentType,
    pub content: String,
    pub section_uid: String,
}

impl MessageBlock {
    pub fn new(
        block_type: BlockType,
        content_type: ContentType,
        content: impl Into<String>,
        section_uid: impl Into<String>,
    ) -> Self {
        Self {
            block_type,
            content_type,
            content: content.into(),
            section_uid: section_uid.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub conversation_uid: String,
    pub message_uid: String,
    pub message_time: i64,
    pub sender_uid: String,
    pub sender_role: SenderRole,
    pub blocks: Vec<MessageBlock>,
}

impl Message {
    /// An empty message with a fresh uid, stamped now
    pub fn new(
        conversation_uid: impl Into<String>,
        sender_uid: impl Into<String>,
        sender_role: SenderRole,
    ) -> Self {
        Self {
            conversation_uid: conversation_uid.into(),
            message_uid: new_uid(),
            message_time: now_millis(),
            sender_uid: sender_uid.into(),
            sender_role,
            blocks: Vec::new(),
        }
    }

    /// A system message holding a single text block
    pub fn system(conversation_uid: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Message::new(conversation_uid, "system", SenderRole::System);
        message.blocks.push(MessageBlock::new(
            BlockType::System,
            ContentType::Text,
            text,
            new_uid(),
        ));
        message
    }
}

/// A rolling summary covering every message up to `last_message_uid`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub conversation_uid: String,
    pub summary: String,
    pub last_message_uid: String,
    pub summary_order: u64,
}

/// A request to generate the next assistant turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCmd {
    /// Absent to start a new conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_uid: Option<String>,
    pub query: Query,
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

impl GenerateCmd {
    /// A command with a single text input
    pub fn text(conversation_uid: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            conversation_uid: conversation_uid.map(str::to_string),
            query: Query {
                inputs: vec![Item::text(text)],
                refers: Vec::new(),
            },
            mentions: Vec::new(),
        }
    }

    /// The first text input, if any
    pub fn first_text(&self) -> Option<String> {
        self.query
            .inputs
            .iter()
            .find(|item| item.item_type == "text")
            .map(Item::content_text)
    }

    /// The bot addressed by the first mention
    pub fn bot_uid(&self) -> Option<&str> {
        self.mentions.first().map(|m| m.uid.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub inputs: Vec<Item>,
    #[serde(default)]
    pub refers: Vec<Item>,
}

/// A single input or referenced item; unknown fields are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub item_type: String,
    pub content: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Item {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            item_type: "text".to_string(),
            content: Value::String(text.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// Content as text; structured content is kept as compact JSON
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}
