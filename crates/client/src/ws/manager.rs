//! Connection manager: one owned connection with keepalive and auto-reconnect.
//!
//! All lifecycle mutations happen on a single actor task. The
//! [`ConnectionManager`] handle talks to it through an unbounded command
//! channel and observes it through a watch channel, so `send` never blocks and
//! every status change is visible to any number of observers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use haven_shared::{frame_type, KeepaliveFrame, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::connection::{
    ConnectionSnapshot, ConnectionState, ConnectionStatus, Endpoint, ReconnectConfig, RetryState,
};
use super::keepalive::Keepalive;
use super::transport::{Frame, InboundEvent, Transport, TransportSocket};
use crate::error::{ClientError, ClientResult};

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct SubscriberSet {
    next_id: u64,
    handlers: BTreeMap<u64, Handler>,
}

/// Registry of data-frame handlers, shared by the handle and the actor.
#[derive(Clone, Default)]
struct Subscribers {
    inner: Arc<Mutex<SubscriberSet>>,
}

impl Subscribers {
    fn add(&self, handler: Handler) -> Unsubscribe {
        let id = match self.inner.lock() {
            Ok(mut set) => {
                let id = set.next_id;
                set.next_id += 1;
                set.handlers.insert(id, handler);
                id
            }
            Err(_) => u64::MAX,
        };
        Unsubscribe {
            id,
            subscribers: Arc::downgrade(&self.inner),
        }
    }

    fn dispatch(&self, frame: &Value) {
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<Handler> = match self.inner.lock() {
            Ok(set) => set.handlers.values().cloned().collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(frame);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().map(|set| set.handlers.len()).unwrap_or(0)
    }
}

/// Removes a handler registered with [`ConnectionManager::subscribe`].
///
/// Dropping this value keeps the handler registered.
#[must_use = "call `unsubscribe` to remove the handler"]
#[derive(Debug)]
pub struct Unsubscribe {
    id: u64,
    subscribers: Weak<Mutex<SubscriberSet>>,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.subscribers.upgrade() {
            if let Ok(mut set) = inner.lock() {
                set.handlers.remove(&self.id);
            }
        }
    }
}

enum Command {
    Send(String),
    Disconnect,
    ForceReconnect,
}

/// Handle to a connection manager. Cheap to clone; the connection is torn
/// down when the last handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: UnboundedSender<Command>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    subscribers: Subscribers,
    endpoint: Arc<str>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

impl ConnectionManager {
    /// Spawns the connection actor. The first connect happens after
    /// `config.connect_delay`. Must be called inside a tokio runtime.
    pub fn connect<T: Transport>(config: ReconnectConfig, transport: T, endpoint: Endpoint) -> Self {
        let (commands, command_rx) = unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ConnectionSnapshot {
            status: ConnectionStatus::Connecting,
            ..ConnectionSnapshot::default()
        });
        let subscribers = Subscribers::default();
        let label: Arc<str> = endpoint.display_url().into();

        let actor = ConnectionActor {
            keepalive: Keepalive::new(config.keepalive_interval),
            config,
            transport,
            endpoint,
            commands: command_rx,
            snapshot: snapshot_tx,
            subscribers: subscribers.clone(),
            state: ConnectionState::Idle,
            status: ConnectionStatus::Connecting,
            retry: RetryState::default(),
            socket: None,
            scheduled: None,
            generation: 0,
            opened: 0,
        };
        tokio::spawn(actor.run());

        Self {
            commands,
            snapshot,
            subscribers,
            endpoint: label,
        }
    }

    /// Serializes and sends a command. Fails fast unless the connection is
    /// open; nothing is queued for later.
    pub fn send<C: Serialize + ?Sized>(&self, command: &C) -> ClientResult<()> {
        if !self.snapshot.borrow().is_connected() {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(command)?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Registers a handler for every inbound data frame, called in arrival
    /// order on the manager's task. Keepalive acknowledgments are not
    /// delivered.
    pub fn subscribe(&self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Unsubscribe {
        self.subscribers.add(Arc::new(handler))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Closes the connection with a normal-closure code and cancels every
    /// pending timer. Calling it again has no effect.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// User-initiated retry: drops the current socket, clears the consecutive
    /// failure count and connects again after a short fixed delay.
    pub fn force_reconnect(&self) {
        let _ = self.commands.send(Command::ForceReconnect);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.snapshot.borrow().is_connecting()
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot.borrow().retry.last_error.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Waits until the connection is open, or fails once the manager reaches
    /// a state that needs a manual retry.
    pub async fn wait_connected(&self) -> ClientResult<()> {
        let mut rx = self.snapshot.clone();
        let status = {
            let snapshot = rx
                .wait_for(|s| s.is_connected() || s.status.needs_manual_retry())
                .await
                .map_err(|_| ClientError::NotConnected)?;
            if snapshot.is_connected() {
                return Ok(());
            }
            snapshot.status.clone()
        };
        match status {
            ConnectionStatus::GaveUp { attempts } => Err(ClientError::RetryExhausted { attempts }),
            _ => Err(ClientError::NotConnected),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledConnect {
    at: Instant,
    generation: u64,
}

struct ConnectionActor<T: Transport> {
    config: ReconnectConfig,
    transport: T,
    endpoint: Endpoint,
    commands: UnboundedReceiver<Command>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    subscribers: Subscribers,
    state: ConnectionState,
    status: ConnectionStatus,
    retry: RetryState,
    socket: Option<TransportSocket>,
    keepalive: Keepalive,
    scheduled: Option<ScheduledConnect>,
    /// Bumped whenever a scheduled connect is superseded.
    generation: u64,
    opened: u64,
}

impl<T: Transport> ConnectionActor<T> {
    async fn run(mut self) {
        info!(endpoint = %self.endpoint.display_url(), "Starting connection manager");
        self.schedule_connect(self.config.connect_delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All manager handles dropped; shutting down");
                        self.shutdown();
                        break;
                    }
                },
                event = next_socket_event(&mut self.socket) => self.handle_socket_event(event),
                () = self.keepalive.tick() => self.send_probe(),
                generation = wait_scheduled(self.scheduled) => self.start_connect(generation),
            }
        }

        info!(endpoint = %self.endpoint.display_url(), "Connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(text) => match (&self.state, &self.socket) {
                (ConnectionState::Open, Some(socket)) => {
                    trace!(frame = %text, "Sending frame");
                    if !socket.send(text) {
                        warn!("Transport gone, frame dropped");
                    }
                }
                _ => debug!(state = ?self.state, "Connection not open, frame dropped"),
            },
            Command::Disconnect => self.disconnect(),
            Command::ForceReconnect => self.force_reconnect(),
        }
    }

    fn handle_socket_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Opened => {
                if self.state != ConnectionState::Connecting {
                    debug!(state = ?self.state, "Ignoring open signal");
                    return;
                }
                self.state = ConnectionState::Open;
                self.opened += 1;
                self.retry.consecutive_failures = 0;
                self.retry.last_error = None;
                self.keepalive.start();
                self.status = ConnectionStatus::Connected;
                info!(endpoint = %self.endpoint.display_url(), "Connected");
                self.publish();
            }
            InboundEvent::Data(frame) => self.dispatch(frame),
            InboundEvent::Closed { code, reason } => {
                if code != NORMAL_CLOSURE {
                    self.retry.last_error = Some(if reason.is_empty() {
                        format!("connection closed (code {code})")
                    } else {
                        format!("connection closed (code {code}): {reason}")
                    });
                }
                self.connection_lost(code, &reason);
            }
            InboundEvent::Error { detail } => {
                let err = ClientError::Transport(detail);
                warn!(error = %err, "Transport error");
                self.retry.last_error = Some(err.to_string());
                self.connection_lost(ABNORMAL_CLOSURE, "transport error");
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        let decoded = match &frame {
            Frame::Text(text) => serde_json::from_str::<Value>(text),
            Frame::Binary(bytes) => serde_json::from_slice::<Value>(bytes),
        };
        let value = match decoded {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %ClientError::MalformedFrame(e.to_string()), "Dropping frame");
                return;
            }
        };
        match frame_type(&value) {
            Some("pong") => {
                trace!("Keepalive acknowledged");
                self.keepalive.record_ack();
            }
            Some(_) => self.subscribers.dispatch(&value),
            None => {
                let err = ClientError::MalformedFrame("missing type discriminator".to_string());
                warn!(error = %err, "Dropping frame");
            }
        }
    }

    fn send_probe(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        match serde_json::to_string(&KeepaliveFrame::Ping) {
            Ok(probe) => {
                trace!("Sending keepalive probe");
                if !socket.send(probe) {
                    debug!("Transport gone, keepalive probe dropped");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode keepalive probe"),
        }
    }

    fn start_connect(&mut self, generation: u64) {
        self.scheduled = None;
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring superseded connect");
            return;
        }

        // Never more than one live socket
        self.teardown_socket(None);

        match self.endpoint.url() {
            Ok(url) => {
                self.state = ConnectionState::Connecting;
                if self.retry.consecutive_failures == 0 {
                    self.status = ConnectionStatus::Connecting;
                }
                debug!(
                    endpoint = %self.endpoint.display_url(),
                    attempt = self.retry.total_attempts,
                    "Opening transport socket"
                );
                self.socket = Some(self.transport.open(&url));
                self.publish();
            }
            Err(e) => {
                warn!(error = %e, "Cannot build endpoint URL");
                self.retry.last_error = Some(e.to_string());
                self.state = ConnectionState::Connecting;
                self.connection_lost(ABNORMAL_CLOSURE, "no endpoint url");
            }
        }
    }

    /// Shared path for every close that the manager did not initiate.
    fn connection_lost(&mut self, code: u16, reason: &str) {
        self.teardown_socket(None);
        self.state = ConnectionState::Closed;

        if code == NORMAL_CLOSURE {
            info!(reason, "Connection closed normally");
            self.status = ConnectionStatus::Disconnected;
            self.publish();
            return;
        }

        if self.retry.total_attempts >= self.config.max_attempts {
            let err = ClientError::RetryExhausted {
                attempts: self.retry.total_attempts,
            };
            error!(error = %err, "Giving up on connection");
            self.status = ConnectionStatus::GaveUp {
                attempts: self.retry.total_attempts,
            };
            self.publish();
            return;
        }

        let delay = self.config.backoff.delay(self.retry.consecutive_failures);
        self.retry.consecutive_failures = self.retry.consecutive_failures.saturating_add(1);
        self.retry.total_attempts += 1;
        self.schedule_connect(delay);
        self.status = ConnectionStatus::Reconnecting {
            attempt: self.retry.total_attempts,
            ceiling: self.config.max_attempts,
            delay,
        };
        warn!(
            code,
            reason,
            delay_ms = delay.as_millis() as u64,
            attempt = self.retry.total_attempts,
            ceiling = self.config.max_attempts,
            "Connection lost, reconnecting"
        );
        self.publish();
    }

    fn disconnect(&mut self) {
        self.generation += 1;
        self.scheduled = None;
        self.keepalive.stop();

        let had_socket = self.socket.is_some();
        if !had_socket
            && self.state == ConnectionState::Closed
            && self.status == ConnectionStatus::Disconnected
        {
            debug!("Already disconnected");
            return;
        }
        if had_socket {
            self.state = ConnectionState::Closing;
            self.publish();
            self.teardown_socket(Some("client disconnect"));
        }

        self.state = ConnectionState::Closed;
        self.status = ConnectionStatus::Disconnected;
        info!(endpoint = %self.endpoint.display_url(), "Disconnected");
        self.publish();
    }

    fn force_reconnect(&mut self) {
        info!(endpoint = %self.endpoint.display_url(), "Manual reconnect requested");
        self.teardown_socket(Some("client reconnect"));
        if self.state != ConnectionState::Idle {
            self.state = ConnectionState::Closed;
        }
        self.retry.consecutive_failures = 0;
        self.schedule_connect(self.config.retry_delay);
        self.status = ConnectionStatus::Connecting;
        self.publish();
    }

    fn shutdown(&mut self) {
        self.generation += 1;
        self.scheduled = None;
        self.teardown_socket(Some("client shutdown"));
        self.state = ConnectionState::Closed;
        self.status = ConnectionStatus::Disconnected;
        self.publish();
    }

    /// Stops the keepalive and drops the socket, optionally sending a
    /// normal-closure frame first.
    fn teardown_socket(&mut self, close_reason: Option<&str>) {
        self.keepalive.stop();
        if let Some(socket) = self.socket.take() {
            if let Some(reason) = close_reason {
                socket.close(NORMAL_CLOSURE, reason);
            }
        }
    }

    /// Replaces any pending connect; the old one can no longer fire.
    fn schedule_connect(&mut self, delay: std::time::Duration) {
        self.generation += 1;
        self.scheduled = Some(ScheduledConnect {
            at: Instant::now() + delay,
            generation: self.generation,
        });
    }

    fn publish(&self) {
        self.snapshot.send_replace(ConnectionSnapshot {
            state: self.state,
            status: self.status.clone(),
            retry: self.retry.clone(),
            opened: self.opened,
        });
    }
}

async fn next_socket_event(socket: &mut Option<TransportSocket>) -> InboundEvent {
    match socket {
        Some(socket) => socket.next_event().await,
        None => std::future::pending().await,
    }
}

async fn wait_scheduled(scheduled: Option<ScheduledConnect>) -> u64 {
    match scheduled {
        Some(scheduled) => {
            sleep_until(scheduled.at).await;
            scheduled.generation
        }
        None => std::future::pending().await,
    }
}
