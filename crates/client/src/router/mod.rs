//! Feature routers: turn decoded frames into state changes and user actions
//! into typed commands.
//!
//! A router subscribes once to its manager and keeps its own state behind a
//! mutex. The subscription closure never captures the manager, so dropping
//! every manager handle still tears the connection down.

pub mod agent;
pub mod room;

pub use agent::{AgentRouter, AgentState, AgentUpdate, ASSISTANT_ID};
pub use room::{PendingMessage, RoomRouter, RoomState, RoomUpdate};

use haven_shared::frame_type;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::error::ClientError;
use crate::ws::ConnectionSnapshot;

/// Decodes a frame into a feature vocabulary. Known types with the wrong
/// shape are logged and dropped.
fn decode<E: DeserializeOwned>(feature: &'static str, frame: &Value) -> Option<E> {
    match E::deserialize(frame) {
        Ok(event) => Some(event),
        Err(e) => {
            let err = ClientError::MalformedFrame(e.to_string());
            warn!(
                feature,
                frame_type = frame_type(frame).unwrap_or_default(),
                error = %err,
                "Dropping frame"
            );
            None
        }
    }
}

/// Calls `on_lost` every time the connection leaves `Open`. Ends when the
/// manager's actor stops.
///
/// The watch channel only keeps the latest snapshot, so a drop and reopen
/// that both happen before this task runs shows up as a new `opened` count
/// rather than as a closed state.
async fn watch_connection_lost(
    mut status: watch::Receiver<ConnectionSnapshot>,
    on_lost: impl Fn() + Send + 'static,
) {
    let (mut was_open, mut opened) = {
        let snapshot = status.borrow_and_update();
        (snapshot.is_connected(), snapshot.opened)
    };
    while status.changed().await.is_ok() {
        let (open, now_opened) = {
            let snapshot = status.borrow_and_update();
            (snapshot.is_connected(), snapshot.opened)
        };
        if was_open && (!open || now_opened != opened) {
            on_lost();
        }
        was_open = open;
        opened = now_opened;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::ws::{ConnectionState, ConnectionStatus};

    fn snapshot(state: ConnectionState, opened: u64) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state,
            status: if state == ConnectionState::Open {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Connecting
            },
            opened,
            ..ConnectionSnapshot::default()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn reopen_missed_by_the_watcher_still_counts_as_lost() {
        let (tx, rx) = watch::channel(snapshot(ConnectionState::Connecting, 0));
        let lost = Arc::new(AtomicUsize::new(0));
        let counter = lost.clone();
        let watcher = tokio::spawn(watch_connection_lost(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tx.send_replace(snapshot(ConnectionState::Open, 1));
        settle().await;
        assert_eq!(lost.load(Ordering::SeqCst), 0);

        // Both values land before the watcher is polled again.
        tx.send_replace(snapshot(ConnectionState::Closed, 1));
        tx.send_replace(snapshot(ConnectionState::Open, 2));
        settle().await;
        assert_eq!(lost.load(Ordering::SeqCst), 1);

        tx.send_replace(snapshot(ConnectionState::Closed, 2));
        settle().await;
        assert_eq!(lost.load(Ordering::SeqCst), 2);

        drop(tx);
        watcher.await.unwrap();
    }
}
