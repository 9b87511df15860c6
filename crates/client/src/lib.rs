//! Haven real-time client.
//!
//! Keeps one WebSocket connection per feature (a group room or a chat agent
//! session) alive with keepalive probes and capped exponential backoff, and
//! routes the typed frames it receives into per-feature state.
//!
//! ```rust,ignore
//! let config = ClientConfig::from_env()?;
//! let session = SharedSession::new(Some(session));
//! let endpoint = Endpoint::room(config.ws_url.clone(), "morning-circle", Arc::new(session));
//! let manager = ConnectionManager::connect(config.reconnect.clone(), TungsteniteTransport, endpoint);
//! let room = RoomRouter::attach(&manager, user_id, config.typing_ttl);
//! manager.wait_connected().await?;
//! room.send_message("Good morning")?;
//! ```

pub mod api_client;
pub mod auth_session;
pub mod breathing;
pub mod config;
pub mod error;
pub mod logging;
pub mod router;
pub mod stores;
pub mod ws;

pub use api_client::HistoryClient;
pub use auth_session::{AuthSession, SharedSession, TokenSource};
pub use breathing::{BreathingDriver, BreathingPattern, BreathingSession, BreathingSnapshot, Phase};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use router::{AgentRouter, AgentUpdate, RoomRouter, RoomUpdate};
pub use ws::{
    ConnectionManager, ConnectionSnapshot, ConnectionState, ConnectionStatus, Endpoint,
    ReconnectConfig, TungsteniteTransport,
};
