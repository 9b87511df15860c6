#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use haven_client::ws::{
    ConnectionManager, ConnectionSnapshot, Endpoint, Frame, InboundEvent, SocketCommand,
    SocketPeer, Transport, TransportSocket,
};
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use url::Url;

/// Transport that hands every opened socket's far side to the test.
pub struct ScriptedTransport {
    opened: UnboundedSender<(Url, SocketPeer)>,
}

impl Transport for ScriptedTransport {
    fn open(&self, url: &Url) -> TransportSocket {
        let (socket, peer) = TransportSocket::pair();
        let _ = self.opened.send((url.clone(), peer));
        socket
    }
}

pub type Peers = UnboundedReceiver<(Url, SocketPeer)>;

pub fn scripted() -> (ScriptedTransport, Peers) {
    let (opened, peers) = unbounded_channel();
    (ScriptedTransport { opened }, peers)
}

pub fn room_endpoint() -> Endpoint {
    Endpoint::room(
        Url::parse("ws://haven.test/").unwrap(),
        "r1",
        Arc::new(|| Some("tok".to_string())),
    )
}

pub async fn next_peer(peers: &mut Peers) -> SocketPeer {
    let (_url, peer) = timeout(Duration::from_secs(600), peers.recv())
        .await
        .expect("no socket opened")
        .expect("transport dropped");
    peer
}

/// Waits until the snapshot matches `pred`; paused time advances meanwhile.
pub async fn wait_for(
    manager: &ConnectionManager,
    pred: impl FnMut(&ConnectionSnapshot) -> bool,
) -> ConnectionSnapshot {
    let mut rx = manager.watch();
    let snapshot = timeout(Duration::from_secs(600), rx.wait_for(pred))
        .await
        .expect("timed out waiting for status")
        .expect("manager stopped")
        .clone();
    snapshot
}

/// Lets the actor and router tasks drain their queues without moving the
/// clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn open(peer: &SocketPeer) {
    peer.events.send(InboundEvent::Opened).unwrap();
}

pub fn push(peer: &SocketPeer, frame: Value) {
    peer.events
        .send(InboundEvent::Data(Frame::Text(frame.to_string())))
        .unwrap();
}

pub fn drop_connection(peer: &SocketPeer) {
    peer.events
        .send(InboundEvent::Closed {
            code: 1006,
            reason: "network lost".into(),
        })
        .unwrap();
}

/// Outbound frames written so far, decoded.
pub fn sent_frames(peer: &mut SocketPeer) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(command) = peer.commands.try_recv() {
        if let SocketCommand::Send(text) = command {
            frames.push(serde_json::from_str(&text).unwrap());
        }
    }
    frames
}

/// Handler that records every frame it sees.
pub fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |frame: &Value| sink.lock().unwrap().push(frame.clone()))
}
