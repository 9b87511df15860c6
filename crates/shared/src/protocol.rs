//! Wire protocol for the Haven real-time endpoints.
//!
//! Every frame is a single JSON object with a `type` discriminator and
//! snake_case fields, e.g. `{"type":"typing","is_typing":true}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMessage, MessageId, MessageKind, Reply};

/// Close code sent by a client that is shutting down on purpose.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Returns the `type` discriminator of a decoded frame.
pub fn frame_type(frame: &Value) -> Option<&str> {
    frame.get("type").and_then(Value::as_str)
}

/// Liveness probe and its acknowledgment, shared by every endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeepaliveFrame {
    Ping,
    Pong,
}

// --- Group room ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomCommand {
    ChatMessage {
        content: String,
        message_type: MessageKind,
    },
    SupportMessage {
        message_id: MessageId,
    },
    ReplyMessage {
        message_id: MessageId,
        content: String,
    },
    Typing {
        is_typing: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    NewMessage {
        message: ChatMessage,
    },
    MessageSupported {
        message_id: MessageId,
        user_id: String,
    },
    NewReply {
        message_id: MessageId,
        reply: Reply,
    },
    Typing {
        user_id: String,
        #[serde(default)]
        user_name: String,
        is_typing: bool,
    },
    UserJoined {
        user_id: String,
        #[serde(default)]
        user_name: String,
    },
    UserLeft {
        user_id: String,
        #[serde(default)]
        user_name: String,
    },
    Error {
        message: String,
    },
    /// Any discriminator this client does not understand yet.
    #[serde(other)]
    Unknown,
}

// --- Chat agent ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    ChatMessage {
        content: String,
        message_type: MessageKind,
    },
    Typing {
        is_typing: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A complete, non-streamed assistant reply.
    ChatMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    StreamStart {
        message_id: String,
    },
    StreamChunk {
        message_id: String,
        content: String,
    },
    StreamEnd {
        message_id: String,
    },
    Typing {
        is_typing: bool,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}
