//! Real-time connection to a Haven endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐  send / disconnect / force_reconnect
//! │  ConnectionManager   │──────────────────────────────┐
//! │  (cloneable handle)  │                              ▼
//! └──────────────────────┘                  ┌──────────────────────┐
//!    ▲ watch(snapshot)                      │   connection actor   │
//!    │                                      │ keepalive + backoff  │
//!    └──────────────────────────────────────│ generation counter   │
//!                                           └──────────────────────┘
//!                                                │            ▲
//!                               subscriber fan-out           │ InboundEvent
//!                                                ▼            │
//!                                     ┌────────────┐  ┌────────────────┐
//!                                     │  routers   │  │TransportSocket │
//!                                     └────────────┘  └────────────────┘
//! ```
//!
//! Routers subscribe to decoded data frames and keep their own state; they
//! never reach into the manager's lifecycle.

mod backoff;
mod connection;
mod keepalive;
mod manager;
mod transport;

pub use backoff::BackoffPolicy;
pub use connection::{
    ConnectionSnapshot, ConnectionState, ConnectionStatus, Endpoint, ReconnectConfig, RetryState,
};
pub use keepalive::Keepalive;
pub use manager::{ConnectionManager, Unsubscribe};
pub use transport::{
    Frame, InboundEvent, SocketCommand, SocketPeer, Transport, TransportSocket,
    TungsteniteTransport,
};
