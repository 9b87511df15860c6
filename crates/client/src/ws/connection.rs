//! Connection lifecycle types shared by the manager and its consumers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::backoff::BackoffPolicy;
use crate::auth_session::TokenSource;
use crate::error::{ClientError, ClientResult};

/// Lifecycle state of the single connection a manager owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Failure bookkeeping owned by the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Failures since the last successful open.
    pub consecutive_failures: u32,
    /// Reconnects scheduled over the manager's lifetime; never decreases.
    pub total_attempts: u32,
    pub last_error: Option<String>,
}

/// User-visible connection status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
        ceiling: u32,
        delay: Duration,
    },
    /// Closed on purpose (locally or with a normal-closure code).
    Disconnected,
    /// Reconnect ceiling reached; only `force_reconnect` leaves this state.
    GaveUp { attempts: u32 },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. }
        )
    }

    /// Whether a retry control should be offered.
    pub fn needs_manual_retry(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::GaveUp { .. } | ConnectionStatus::Disconnected
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "idle"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting {
                attempt, ceiling, ..
            } => write!(f, "reconnecting (attempt {attempt}/{ceiling})"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::GaveUp { .. } => {
                write!(f, "connection lost, manual refresh required")
            }
        }
    }
}

/// Everything an observer may read about a manager at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub status: ConnectionStatus,
    pub retry: RetryState,
    /// Number of times the connection has reached `Open`. Lets an observer
    /// that missed intermediate values tell a reconnect from a steady state.
    pub opened: u64,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            status: ConnectionStatus::Idle,
            retry: RetryState::default(),
            opened: 0,
        }
    }
}

impl ConnectionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_connecting(&self) -> bool {
        self.status.is_connecting()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.retry.last_error.as_deref()
    }
}

/// Configuration for connect, keepalive and auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub backoff: BackoffPolicy,
    /// Maximum number of reconnects over the manager's lifetime
    pub max_attempts: u32,
    /// Fixed delay before the first connect after construction
    pub connect_delay: Duration,
    /// Fixed delay before a user-initiated reconnect
    pub retry_delay: Duration,
    pub keepalive_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: 10,
            connect_delay: Duration::from_millis(100),
            retry_delay: Duration::from_millis(100),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> ClientResult<()> {
        if self.backoff.base.is_zero() {
            return Err(ClientError::InvalidConfig(
                "backoff base must be > 0".to_string(),
            ));
        }
        if self.backoff.cap < self.backoff.base {
            return Err(ClientError::InvalidConfig(
                "backoff cap must be >= backoff base".to_string(),
            ));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "keepalive interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Real-time endpoint: a target path under a base URL plus a bearer credential
/// looked up fresh for every connection attempt.
#[derive(Clone)]
pub struct Endpoint {
    base: Url,
    path: String,
    tokens: Arc<dyn TokenSource>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base", &self.base.as_str())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub fn new(base: Url, path: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            base,
            path: path.into(),
            tokens,
        }
    }

    /// Group room endpoint: `{base}ws/rooms/{room_id}`.
    pub fn room(base: Url, room_id: &str, tokens: Arc<dyn TokenSource>) -> Self {
        Self::new(
            base,
            format!("ws/rooms/{}", urlencoding::encode(room_id)),
            tokens,
        )
    }

    /// Chat agent endpoint: `{base}ws/chat/{session_id}`.
    pub fn agent_session(base: Url, session_id: &str, tokens: Arc<dyn TokenSource>) -> Self {
        Self::new(
            base,
            format!("ws/chat/{}", urlencoding::encode(session_id)),
            tokens,
        )
    }

    /// Builds the URL for the next connection attempt.
    pub fn url(&self) -> ClientResult<Url> {
        let token = self
            .tokens
            .token()
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingCredential)?;
        let mut url = self.base.join(&self.path)?;
        url.query_pairs_mut().append_pair("token", &token);
        Ok(url)
    }

    /// URL without the credential, for logs.
    pub fn display_url(&self) -> String {
        self.base
            .join(&self.path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.base, self.path))
    }
}
