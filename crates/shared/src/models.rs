//! Shared data models for the Haven room and chat agent features.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned message identifier.
pub type MessageId = u64;

// --- Room ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub id: MessageId,
    pub content: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    pub created_at: DateTime<Utc>,
}

/// A message posted to a group room.
///
/// `support_count` and `user_has_supported` are the only fields the client
/// mutates after the message arrives; both are driven by `message_supported`
/// events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub content: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub support_count: u32,
    #[serde(default)]
    pub user_has_supported: bool,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Voice,
}

// --- Chat agent ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a chat agent transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// False while an assistant reply is still streaming in.
    #[serde(default = "default_complete")]
    pub complete: bool,
    pub created_at: DateTime<Utc>,
}

fn default_complete() -> bool {
    true
}

// --- History ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPage<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}
