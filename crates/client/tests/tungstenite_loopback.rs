mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{recorder, wait_for};
use futures_util::{SinkExt, StreamExt};
use haven_client::ws::{ConnectionManager, ConnectionStatus, Endpoint, ReconnectConfig};
use haven_client::TungsteniteTransport;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Echoes text frames, answers `ping` with `pong` and closes normally on
/// `done`.
async fn echo_server(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        match frame["type"].as_str() {
            Some("done") => {
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "bye".into(),
                };
                let _ = ws.close(Some(close)).await;
                break;
            }
            Some("ping") => {
                ws.send(Message::Text(json!({"type": "pong"}).to_string().into()))
                    .await
                    .unwrap();
            }
            _ => ws.send(Message::Text(text)).await.unwrap(),
        }
    }
}

#[tokio::test]
async fn round_trip_over_real_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(echo_server(listener));

    let endpoint = Endpoint::room(
        Url::parse(&format!("ws://{addr}/")).unwrap(),
        "r1",
        Arc::new(|| Some("tok".to_string())),
    );
    let config = ReconnectConfig {
        connect_delay: Duration::from_millis(10),
        ..ReconnectConfig::default()
    };
    let manager = ConnectionManager::connect(config, TungsteniteTransport, endpoint);
    let (seen, handler) = recorder();
    let _subscription = manager.subscribe(handler);

    timeout(Duration::from_secs(10), manager.wait_connected())
        .await
        .unwrap()
        .unwrap();

    manager.send(&json!({"type": "ping"})).unwrap();
    manager
        .send(&json!({"type": "new_message", "message": {"id": 1}}))
        .unwrap();
    manager.send(&json!({"type": "done"})).unwrap();

    let snapshot = timeout(Duration::from_secs(10), wait_for(&manager, |s| !s.is_connected()))
        .await
        .unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);

    // The pong is consumed by the manager; only the echo reaches subscribers.
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!({"type": "new_message", "message": {"id": 1}})]
    );
    server.await.unwrap();
}
