//! Group room router: messages, support, replies, typing and the online set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use haven_shared::{
    frame_type, ChatMessage, MessageId, MessageKind, Participant, Reply, RoomCommand, RoomEvent,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{decode, watch_connection_lost};
use crate::error::{ClientError, ClientResult};
use crate::stores::{OnlineRoster, RoomMessages, TypingTracker};
use crate::ws::{ConnectionManager, Unsubscribe};

/// Local "sending" placeholder for a message the server has not echoed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub nonce: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoomState {
    pub messages: RoomMessages,
    pub pending: Vec<PendingMessage>,
    pub online: OnlineRoster,
    /// Last `error` frame from the server.
    pub last_error: Option<String>,
}

/// Change notification for views.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomUpdate {
    HistoryLoaded { count: usize },
    MessageAdded(ChatMessage),
    Supported {
        message_id: MessageId,
        support_count: u32,
        by_self: bool,
    },
    ReplyAdded { message_id: MessageId, reply: Reply },
    Joined(Participant),
    Left(Participant),
    /// Placeholders dropped because the connection went away.
    PendingRolledBack(Vec<PendingMessage>),
    Error(String),
}

#[derive(Clone)]
struct RoomContext {
    self_id: Arc<str>,
    state: Arc<Mutex<RoomState>>,
    typing: TypingTracker,
    updates: broadcast::Sender<RoomUpdate>,
}

impl RoomContext {
    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, update: RoomUpdate) {
        // No receivers is fine
        let _ = self.updates.send(update);
    }

    fn route(&self, frame: &Value) {
        let Some(event) = decode::<RoomEvent>("room", frame) else {
            return;
        };

        match event {
            RoomEvent::NewMessage { message } => {
                let added = {
                    let mut state = self.lock();
                    if message.author_id == *self.self_id {
                        if let Some(pos) =
                            state.pending.iter().position(|p| p.content == message.content)
                        {
                            state.pending.remove(pos);
                        }
                    }
                    state.messages.add_message(message.clone())
                };
                if added {
                    self.notify(RoomUpdate::MessageAdded(message));
                }
            }
            RoomEvent::MessageSupported {
                message_id,
                user_id,
            } => {
                let by_self = user_id == *self.self_id;
                let support_count = {
                    let mut state = self.lock();
                    if state.messages.apply_support(message_id, by_self) {
                        state.messages.get(message_id).map(|m| m.support_count)
                    } else {
                        None
                    }
                };
                match support_count {
                    Some(support_count) => self.notify(RoomUpdate::Supported {
                        message_id,
                        support_count,
                        by_self,
                    }),
                    None => debug!(message_id, "Support for unknown message"),
                }
            }
            RoomEvent::NewReply { message_id, reply } => {
                if self.lock().messages.add_reply(message_id, reply.clone()) {
                    self.notify(RoomUpdate::ReplyAdded { message_id, reply });
                } else {
                    debug!(message_id, reply_id = reply.id, "Reply not applied");
                }
            }
            RoomEvent::Typing {
                user_id,
                user_name,
                is_typing,
            } => {
                if user_id == *self.self_id {
                    return;
                }
                if is_typing {
                    let name = if user_name.is_empty() { &user_id } else { &user_name };
                    self.typing.start(&user_id, name);
                } else {
                    self.typing.stop(&user_id);
                }
            }
            RoomEvent::UserJoined { user_id, user_name } => {
                let participant = Participant {
                    id: user_id,
                    name: user_name,
                };
                if self.lock().online.join(participant.clone()) {
                    self.notify(RoomUpdate::Joined(participant));
                }
            }
            RoomEvent::UserLeft { user_id, .. } => {
                self.typing.stop(&user_id);
                if let Some(participant) = self.lock().online.leave(&user_id) {
                    self.notify(RoomUpdate::Left(participant));
                }
            }
            RoomEvent::Error { message } => {
                warn!(error = %message, "Room error from server");
                self.lock().last_error = Some(message.clone());
                self.notify(RoomUpdate::Error(message));
            }
            RoomEvent::Unknown => {
                debug!(
                    frame_type = frame_type(frame).unwrap_or_default(),
                    "Ignoring unknown room frame"
                );
            }
        }
    }

    fn connection_lost(&self) {
        let dropped = std::mem::take(&mut self.lock().pending);
        self.typing.clear();
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Connection lost, dropping unsent messages");
            self.notify(RoomUpdate::PendingRolledBack(dropped));
        }
    }
}

/// Routes one room connection.
///
/// Dropping the router unsubscribes it from the manager.
pub struct RoomRouter {
    manager: ConnectionManager,
    ctx: RoomContext,
    local_typing: Arc<AtomicBool>,
    subscription: Option<Unsubscribe>,
    watcher: JoinHandle<()>,
}

impl RoomRouter {
    /// Subscribes to `manager`. `self_id` is the local participant, used to
    /// ignore our own typing frames and to reconcile placeholders.
    pub fn attach(
        manager: &ConnectionManager,
        self_id: impl Into<String>,
        typing_ttl: Duration,
    ) -> Self {
        let self_id: String = self_id.into();
        let (updates, _) = broadcast::channel(256);
        let ctx = RoomContext {
            self_id: Arc::from(self_id),
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

    /// Sends a text message and records a placeholder for it. Nothing is
    /// recorded when the send fails.
    pub fn send_message(&self, content: &str) -> ClientResult<Uuid> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        self.manager.send(&RoomCommand::ChatMessage {
            content: content.to_string(),
            message_type: MessageKind::Text,
        })?;

        let pending = PendingMessage {
            nonce: Uuid::new_v4(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let nonce = pending.nonce;
        self.ctx.lock().pending.push(pending);
        Ok(nonce)
    }

    /// Supports a message. Returns `Ok(false)` without sending if we already
    /// support it. The count only changes when the server echoes the event.
    pub fn toggle_support(&self, message_id: MessageId) -> ClientResult<bool> {
        let already = self
            .ctx
            .lock()
            .messages
            .get(message_id)
            .is_some_and(|m| m.user_has_supported);
        if already {
            return Ok(false);
        }
        self.manager.send(&RoomCommand::SupportMessage { message_id })?;
        Ok(true)
    }

    pub fn reply(&self, message_id: MessageId, content: &str) -> ClientResult<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        self.manager.send(&RoomCommand::ReplyMessage {
            message_id,
            content: content.to_string(),
        })
    }

    /// Sends the local typing flag if it changed. Returns whether a frame
    /// was sent.
    pub fn set_typing(&self, is_typing: bool) -> ClientResult<bool> {
        if self.local_typing.load(Ordering::SeqCst) == is_typing {
            return Ok(false);
        }
        self.manager.send(&RoomCommand::Typing { is_typing })?;
        self.local_typing.store(is_typing, Ordering::SeqCst);
        Ok(true)
    }

    /// Loads history fetched after (re)connecting.
    pub fn bootstrap(&self, history: Vec<ChatMessage>) {
        let count = {
            let mut state = self.ctx.lock();
            state.messages.set_history(history);
            state.messages.len()
        };
        self.ctx.notify(RoomUpdate::HistoryLoaded { count });
    }

    pub fn state(&self) -> RoomState {
        self.ctx.lock().clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.ctx.lock().messages.messages.clone()
    }

    pub fn message(&self, id: MessageId) -> Option<ChatMessage> {
        self.ctx.lock().messages.get(id).cloned()
    }

    pub fn pending(&self) -> Vec<PendingMessage> {
        self.ctx.lock().pending.clone()
    }

    pub fn online(&self) -> Vec<Participant> {
        self.ctx.lock().online.participants()
    }

    pub fn last_error(&self) -> Option<String> {
        self.ctx.lock().last_error.clone()
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.ctx.typing
    }

    pub fn typing_summary(&self) -> Option<String> {
        self.ctx.typing.summary()
    }

    pub fn updates(&self) -> broadcast::Receiver<RoomUpdate> {
        self.ctx.updates.subscribe()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn self_id(&self) -> &str {
        &self.ctx.self_id
    }

    /// Unsubscribes from the manager. Same as dropping the router.
    pub fn detach(self) {}
}

impl Drop for RoomRouter {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.watcher.abort();
    }
}
