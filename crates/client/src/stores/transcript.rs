//! Transcript of a chat agent session.

use chrono::Utc;
use haven_shared::{AgentTurn, Role};
use uuid::Uuid;

/// Ordered turns of one agent session. Assistant turns may be assembled from
/// stream chunks; a turn is open until its `stream_end` (or a complete reply
/// with the same id) arrives.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AgentTranscript {
    pub turns: Vec<AgentTurn>,
    pub is_loaded: bool,
}

impl AgentTranscript {
    /// Appends a user turn with a locally generated id.
    pub fn push_user(&mut self, content: &str) -> &AgentTurn {
        self.push(AgentTurn {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.to_string(),
            complete: true,
            created_at: Utc::now(),
        })
    }

    /// Records a complete assistant reply. If a streamed turn with the same id
    /// is open, the reply replaces its content and closes it.
    pub fn complete_reply(&mut self, message_id: Option<&str>, content: &str) -> &AgentTurn {
        let existing = message_id.and_then(|id| self.position(id));
        match existing {
            Some(idx) => {
                let turn = &mut self.turns[idx];
                turn.content = content.to_string();
                turn.complete = true;
                &self.turns[idx]
            }
            None => self.push(AgentTurn {
                id: message_id
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                role: Role::Assistant,
                content: content.to_string(),
                complete: true,
                created_at: Utc::now(),
            }),
        }
    }

    /// Opens an empty assistant turn. A repeated start for the same id is a
    /// no-op.
    pub fn stream_start(&mut self, message_id: &str) -> &AgentTurn {
        match self.position(message_id) {
            Some(idx) => &self.turns[idx],
            None => self.push(AgentTurn {
                id: message_id.to_string(),
                role: Role::Assistant,
                content: String::new(),
                complete: false,
                created_at: Utc::now(),
            }),
        }
    }

    /// Appends a chunk to an open turn, opening one if the start was missed.
    /// Chunks for a turn that already ended are ignored.
    pub fn stream_chunk(&mut self, message_id: &str, chunk: &str) -> Option<&AgentTurn> {
        let idx = match self.position(message_id) {
            Some(idx) => idx,
            None => {
                self.stream_start(message_id);
                self.turns.len() - 1
            }
        };
        let turn = &mut self.turns[idx];
        if turn.complete {
            return None;
        }
        turn.content.push_str(chunk);
        Some(&self.turns[idx])
    }

    /// Closes a streamed turn. Returns `None` for an unknown id.
    pub fn stream_end(&mut self, message_id: &str) -> Option<&AgentTurn> {
        let idx = self.position(message_id)?;
        self.turns[idx].complete = true;
        Some(&self.turns[idx])
    }

    /// Closes every assistant turn that is still streaming and returns them.
    /// Used when the connection drops, since the server will not finish a
    /// stream across connections.
    pub fn close_open_turns(&mut self) -> Vec<AgentTurn> {
        self.turns
            .iter_mut()
            .filter(|t| t.role == Role::Assistant && !t.complete)
            .map(|t| {
                t.complete = true;
                t.clone()
            })
            .collect()
    }

    /// Replaces the transcript with history, keeping local turns the history
    /// does not know about yet.
    pub fn set_history(&mut self, mut turns: Vec<AgentTurn>) {
        turns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let local = std::mem::replace(&mut self.turns, turns);
        for turn in local {
            if self.position(&turn.id).is_none() {
                self.turns.push(turn);
            }
        }
        self.is_loaded = true;
    }

    /// Whether an assistant reply is still streaming.
    pub fn is_streaming(&self) -> bool {
        self.turns
            .iter()
            .any(|t| t.role == Role::Assistant && !t.complete)
    }

    pub fn last(&self) -> Option<&AgentTurn> {
        self.turns.last()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.turns.iter().position(|t| t.id == id)
    }

    fn push(&mut self, turn: AgentTurn) -> &AgentTurn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }
}
