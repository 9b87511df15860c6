//! Message store for one group room.
//!
//! Messages arrive from two places: the history endpoint on (re)connect and
//! `new_message` frames while connected. Both go through this store so the
//! list stays deduplicated by id and sorted by `created_at`.

use haven_shared::{ChatMessage, MessageId, Reply};

/// Messages of a single room.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoomMessages {
    /// All messages in this room, sorted by created_at ascending.
    pub messages: Vec<ChatMessage>,
    /// Whether the room history has been fetched from the history endpoint.
    pub is_loaded: bool,
}

impl RoomMessages {
    /// Add a message, maintaining sort order by created_at.
    /// Returns false if a message with the same id already exists.
    pub fn add_message(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }

        // Insert after any message with the same timestamp so arrival order
        // breaks ties.
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(pos, msg);
        true
    }

    /// Replace the stored list with a history page. Messages that arrived live
    /// and are missing from the page are kept; for a repeated id the page's
    /// first copy wins.
    pub fn set_history(&mut self, messages: Vec<ChatMessage>) {
        let live = std::mem::take(&mut self.messages);
        for msg in messages.into_iter().chain(live) {
            self.add_message(msg);
        }
        self.is_loaded = true;
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Applies one support event. Every event counts once; the local flag is
    /// only ever set, never cleared. Returns false for an unknown message.
    pub fn apply_support(&mut self, id: MessageId, by_self: bool) -> bool {
        let Some(msg) = self.get_mut(id) else {
            return false;
        };
        msg.support_count = msg.support_count.saturating_add(1);
        if by_self {
            msg.user_has_supported = true;
        }
        true
    }

    /// Appends a reply to its parent. Returns false if the parent is unknown
    /// or the reply is already present.
    pub fn add_reply(&mut self, parent: MessageId, reply: Reply) -> bool {
        let Some(msg) = self.get_mut(parent) else {
            return false;
        };
        if msg.replies.iter().any(|r| r.id == reply.id) {
            return false;
        }
        msg.replies.push(reply);
        true
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
