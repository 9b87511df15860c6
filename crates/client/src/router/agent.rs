//! Chat agent router: streamed assistant replies and the agent typing flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use haven_shared::{frame_type, AgentCommand, AgentEvent, AgentTurn, MessageKind};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{decode, watch_connection_lost};
use crate::error::{ClientError, ClientResult};
use crate::stores::{AgentTranscript, TypingTracker};
use crate::ws::{ConnectionManager, Unsubscribe};

/// Presence key used for the agent's typing indicator.
pub const ASSISTANT_ID: &str = "assistant";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AgentState {
    pub transcript: AgentTranscript,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentUpdate {
    HistoryLoaded { count: usize },
    /// A turn was added or changed; carries its latest content.
    Turn(AgentTurn),
    Error(String),
}

#[derive(Clone)]
struct AgentContext {
    assistant_name: Arc<str>,
    state: Arc<Mutex<AgentState>>,
    typing: TypingTracker,
    updates: broadcast::Sender<AgentUpdate>,
}

impl AgentContext {
    fn lock(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, update: AgentUpdate) {
        let _ = self.updates.send(update);
    }

    fn route(&self, frame: &Value) {
        let Some(event) = decode::<AgentEvent>("agent", frame) else {
            return;
        };

        let turn = match event {
            AgentEvent::ChatMessage {
                content,
                message_id,
            } => {
                self.typing.stop(ASSISTANT_ID);
                Some(
                    self.lock()
                        .transcript
                        .complete_reply(message_id.as_deref(), &content)
                        .clone(),
                )
            }
            AgentEvent::StreamStart { message_id } => {
                self.typing.stop(ASSISTANT_ID);
                Some(self.lock().transcript.stream_start(&message_id).clone())
            }
            AgentEvent::StreamChunk {
                message_id,
                content,
            } => self
                .lock()
                .transcript
                .stream_chunk(&message_id, &content)
                .cloned(),
            AgentEvent::StreamEnd { message_id } => {
                let turn = self.lock().transcript.stream_end(&message_id).cloned();
                if turn.is_none() {
                    debug!(message_id, "Stream end for unknown turn");
                }
                turn
            }
            AgentEvent::Typing { is_typing } => {
                if is_typing {
                    self.typing.start(ASSISTANT_ID, &self.assistant_name);
                } else {
                    self.typing.stop(ASSISTANT_ID);
                }
                None
            }
            AgentEvent::Error { message } => {
                warn!(error = %message, "Agent error from server");
                self.typing.stop(ASSISTANT_ID);
                self.lock().last_error = Some(message.clone());
                self.notify(AgentUpdate::Error(message));
                None
            }
            AgentEvent::Unknown => {
                debug!(
                    frame_type = frame_type(frame).unwrap_or_default(),
                    "Ignoring unknown agent frame"
                );
                None
            }
        };

        if let Some(turn) = turn {
            self.notify(AgentUpdate::Turn(turn));
        }
    }

    fn connection_lost(&self) {
        self.typing.clear();
        let closed = self.lock().transcript.close_open_turns();
        for turn in closed {
            info!(message_id = %turn.id, "Connection lost mid-stream, closing reply");
            self.notify(AgentUpdate::Turn(turn));
        }
    }
}

/// Routes one chat agent session.
pub struct AgentRouter {
    manager: ConnectionManager,
    ctx: AgentContext,
    local_typing: Arc<AtomicBool>,
    subscription: Option<Unsubscribe>,
    watcher: JoinHandle<()>,
}

impl AgentRouter {
    /// Subscribes to `manager`. `assistant_name` is shown in the typing
    /// indicator.
    pub fn attach(
        manager: &ConnectionManager,
        assistant_name: impl Into<String>,
        typing_ttl: Duration,
    ) -> Self {
        let assistant_name: String = assistant_name.into();
        let (updates, _) = broadcast::channel(256);
        let ctx = AgentContext {
            assistant_name: Arc::from(assistant_name),
            state: Arc::default(),
            typing: TypingTracker::new(typing_ttl),
            updates,
        };
        let local_typing = Arc::new(AtomicBool::new(false));

        let subscription = {
            let ctx = ctx.clone();
            manager.subscribe(move |frame| ctx.route(frame))
        };
        let watcher = {
            let ctx = ctx.clone();
            let local_typing = local_typing.clone();
            tokio::spawn(watch_connection_lost(manager.watch(), move || {
                local_typing.store(false, Ordering::SeqCst);
                ctx.connection_lost();
            }))
        };

        Self {
            manager: manager.clone(),
            ctx,
            local_typing,
            subscription: Some(subscription),
            watcher,
        }
    }

    /// Sends a user turn. The turn is only added to the transcript once the
    /// send succeeded.
    pub fn send_message(&self, content: &str) -> ClientResult<AgentTurn> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        self.manager.send(&AgentCommand::ChatMessage {
            content: content.to_string(),
            message_type: MessageKind::Text,
        })?;
        self.local_typing.store(false, Ordering::SeqCst);

        let turn = self.ctx.lock().transcript.push_user(content).clone();
        self.ctx.notify(AgentUpdate::Turn(turn.clone()));
        Ok(turn)
    }

    /// Sends the local typing flag if it changed.
    pub fn set_typing(&self, is_typing: bool) -> ClientResult<bool> {
        if self.local_typing.load(Ordering::SeqCst) == is_typing {
            return Ok(false);
        }
        self.manager.send(&AgentCommand::Typing { is_typing })?;
        self.local_typing.store(is_typing, Ordering::SeqCst);
        Ok(true)
    }

    pub fn bootstrap(&self, history: Vec<AgentTurn>) {
        let count = {
            let mut state = self.ctx.lock();
            state.transcript.set_history(history);
            state.transcript.turns.len()
        };
        self.ctx.notify(AgentUpdate::HistoryLoaded { count });
    }

    pub fn state(&self) -> AgentState {
        self.ctx.lock().clone()
    }

    pub fn turns(&self) -> Vec<AgentTurn> {
        self.ctx.lock().transcript.turns.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.ctx.lock().transcript.is_streaming()
    }

    pub fn is_agent_typing(&self) -> bool {
        self.ctx.typing.is_typing(ASSISTANT_ID)
    }

    pub fn last_error(&self) -> Option<String> {
        self.ctx.lock().last_error.clone()
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.ctx.typing
    }

    pub fn updates(&self) -> broadcast::Receiver<AgentUpdate> {
        self.ctx.updates.subscribe()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn detach(self) {}
}

impl Drop for AgentRouter {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.watcher.abort();
    }
}
