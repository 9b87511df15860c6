//! Transport sockets: one physical connection each.
//!
//! A [`TransportSocket`] is the manager's side of a connection: a command
//! sender for outbound frames and close requests, and a receiver of
//! [`InboundEvent`]s in the order the wire produced them. The concrete
//! transport owns the other side ([`SocketPeer`]).

use futures_util::{SinkExt, StreamExt};
use haven_shared::ABNORMAL_CLOSURE;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use url::Url;

/// Raw payload of a data event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Signal produced by a transport socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Opened,
    Data(Frame),
    Closed { code: u16, reason: String },
    Error { detail: String },
}

/// Request from the manager to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Send(String),
    Close { code: u16, reason: String },
}

/// Opens transport sockets. Implementations must not block; the connection
/// attempt itself runs in the background and reports through events.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &Url) -> TransportSocket;
}

/// Manager-side handle of one connection.
#[derive(Debug)]
pub struct TransportSocket {
    commands: UnboundedSender<SocketCommand>,
    events: UnboundedReceiver<InboundEvent>,
}

/// Transport-side handle of one connection.
#[derive(Debug)]
pub struct SocketPeer {
    pub commands: UnboundedReceiver<SocketCommand>,
    pub events: UnboundedSender<InboundEvent>,
}

impl TransportSocket {
    /// Creates a connected socket/peer pair.
    pub fn pair() -> (TransportSocket, SocketPeer) {
        let (command_tx, command_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        (
            TransportSocket {
                commands: command_tx,
                events: event_rx,
            },
            SocketPeer {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    /// Queues a text frame. Returns false if the transport is gone.
    pub fn send(&self, text: String) -> bool {
        self.commands.send(SocketCommand::Send(text)).is_ok()
    }

    /// Asks the transport to close; the socket should be dropped afterwards.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.commands.send(SocketCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next event; a vanished transport reads as an abnormal close.
    pub async fn next_event(&mut self) -> InboundEvent {
        self.events.recv().await.unwrap_or(InboundEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: "transport dropped".to_string(),
        })
    }
}

/// Native WebSocket transport built on tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, url: &Url) -> TransportSocket {
        let (socket, peer) = TransportSocket::pair();
        tokio::spawn(run_socket(url.to_string(), peer));
        socket
    }
}

async fn run_socket(url: String, peer: SocketPeer) {
    let SocketPeer {
        mut commands,
        events,
    } = peer;

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket connect failed");
            let _ = events.send(InboundEvent::Error {
                detail: e.to_string(),
            });
            let _ = events.send(InboundEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: e.to_string(),
            });
            return;
        }
    };

    if events.send(InboundEvent::Opened).is_err() {
        return;
    }
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        tracing::debug!(error = %e, "WebSocket send failed");
                        let _ = events.send(InboundEvent::Error { detail: e.to_string() });
                        break;
                    }
                }
                Some(SocketCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    // Manager dropped the socket without closing it
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(InboundEvent::Data(Frame::Text(text.as_str().to_string())));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(InboundEvent::Data(Frame::Binary(data.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                    let _ = events.send(InboundEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {
                    // Protocol-level ping/pong is answered by tungstenite
                }
                Some(Err(e)) => {
                    let _ = events.send(InboundEvent::Error { detail: e.to_string() });
                    break;
                }
                None => {
                    let _ = events.send(InboundEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
        }
    }
}
