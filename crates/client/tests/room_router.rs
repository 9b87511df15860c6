mod common;

use std::time::Duration;

use common::*;
use haven_client::router::{RoomRouter, RoomUpdate};
use haven_client::ws::{ConnectionManager, ReconnectConfig, SocketPeer};
use haven_client::ClientError;
use serde_json::{json, Value};
use tokio::time::sleep;

const SELF_ID: &str = "u-self";

fn message(id: u64, author: &str, content: &str) -> Value {
    json!({
        "id": id,
        "content": content,
        "author_id": author,
        "author_name": author.trim_start_matches("u-"),
        "created_at": format!("2024-05-01T08:{:02}:00Z", id % 60),
    })
}

async fn connected_room() -> (ConnectionManager, RoomRouter, SocketPeer, Peers) {
    let (transport, mut peers) = scripted();
    let manager = ConnectionManager::connect(ReconnectConfig::default(), transport, room_endpoint());
    let room = RoomRouter::attach(&manager, SELF_ID, Duration::from_secs(3));
    let peer = next_peer(&mut peers).await;
    open(&peer);
    wait_for(&manager, |s| s.is_connected()).await;
    settle().await;
    (manager, room, peer, peers)
}

#[tokio::test(start_paused = true)]
async fn send_during_outage_fails_without_touching_state() {
    let (manager, room, peer, _peers) = connected_room().await;
    drop_connection(&peer);
    wait_for(&manager, |s| !s.is_connected()).await;

    assert!(matches!(
        room.send_message("anyone up?"),
        Err(ClientError::NotConnected)
    ));
    assert!(room.pending().is_empty());
    assert!(room.messages().is_empty());
    assert!(matches!(room.set_typing(true), Err(ClientError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn own_message_echo_reconciles_placeholder() {
    let (_manager, room, mut peer, _peers) = connected_room().await;

    room.send_message("  good morning  ").unwrap();
    assert_eq!(room.pending().len(), 1);
    assert_eq!(room.pending()[0].content, "good morning");
    settle().await;
    assert_eq!(
        sent_frames(&mut peer),
        vec![json!({"type": "chat_message", "content": "good morning", "message_type": "text"})]
    );

    push(&peer, json!({"type": "new_message", "message": message(1, SELF_ID, "good morning")}));
    settle().await;
    assert!(room.pending().is_empty());
    assert_eq!(room.messages().len(), 1);
    assert_eq!(room.messages()[0].content, "good morning");
}

#[tokio::test(start_paused = true)]
async fn placeholders_roll_back_when_connection_drops() {
    let (manager, room, peer, _peers) = connected_room().await;
    let mut updates = room.updates();

    room.send_message("is this thing on").unwrap();
    drop_connection(&peer);
    wait_for(&manager, |s| !s.is_connected()).await;
    settle().await;

    assert!(room.pending().is_empty());
    match updates.try_recv().unwrap() {
        RoomUpdate::PendingRolledBack(dropped) => {
            assert_eq!(dropped.len(), 1);
            assert_eq!(dropped[0].content, "is this thing on");
        }
        other => panic!("unexpected update {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_message_is_rejected_locally() {
    let (_manager, room, mut peer, _peers) = connected_room().await;
    assert!(matches!(room.send_message("   "), Err(ClientError::EmptyMessage)));
    assert!(matches!(room.reply(1, ""), Err(ClientError::EmptyMessage)));
    settle().await;
    assert!(sent_frames(&mut peer).is_empty());
}

#[tokio::test(start_paused = true)]
async fn support_is_driven_by_server_events() {
    let (_manager, room, mut peer, _peers) = connected_room().await;
    push(&peer, json!({"type": "new_message", "message": message(7, "u-ana", "rough night")}));
    push(&peer, json!({"type": "new_message", "message": message(8, "u-ben", "same here")}));
    settle().await;

    assert!(room.toggle_support(7).unwrap());
    settle().await;
    assert_eq!(
        sent_frames(&mut peer),
        vec![json!({"type": "support_message", "message_id": 7})]
    );
    // Nothing changes until the server confirms.
    assert_eq!(room.message(7).unwrap().support_count, 0);

    push(&peer, json!({"type": "message_supported", "message_id": 7, "user_id": SELF_ID}));
    settle().await;
    let supported = room.message(7).unwrap();
    assert_eq!(supported.support_count, 1);
    assert!(supported.user_has_supported);

    assert!(!room.toggle_support(7).unwrap());
    settle().await;
    assert!(sent_frames(&mut peer).is_empty());

    push(&peer, json!({"type": "message_supported", "message_id": 7, "user_id": "u-ben"}));
    push(&peer, json!({"type": "message_supported", "message_id": 7, "user_id": SELF_ID}));
    settle().await;
    let supported = room.message(7).unwrap();
    assert_eq!(supported.support_count, 3);
    assert!(supported.user_has_supported);

    let untouched = room.message(8).unwrap();
    assert_eq!(untouched.support_count, 0);
    assert!(!untouched.user_has_supported);
}

#[tokio::test(start_paused = true)]
async fn replies_attach_to_their_parent() {
    let (_manager, room, mut peer, _peers) = connected_room().await;
    push(&peer, json!({"type": "new_message", "message": message(3, "u-ana", "hello")}));

    room.reply(3, "hi Ana").unwrap();
    settle().await;
    assert_eq!(
        sent_frames(&mut peer),
        vec![json!({"type": "reply_message", "message_id": 3, "content": "hi Ana"})]
    );

    let reply = json!({
        "id": 30,
        "content": "hi Ana",
        "author_id": SELF_ID,
        "author_name": "me",
        "created_at": "2024-05-01T08:04:00Z",
    });
    push(&peer, json!({"type": "new_reply", "message_id": 3, "reply": reply}));
    push(&peer, json!({"type": "new_reply", "message_id": 3, "reply": reply}));
    settle().await;
    assert_eq!(room.message(3).unwrap().replies.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_typing_expires_and_own_is_ignored() {
    let (_manager, room, peer, _peers) = connected_room().await;

    push(&peer, json!({"type": "typing", "user_id": SELF_ID, "user_name": "me", "is_typing": true}));
    push(&peer, json!({"type": "typing", "user_id": "u-ben", "user_name": "Ben", "is_typing": true}));
    settle().await;
    assert_eq!(room.typing_summary().as_deref(), Some("Ben is typing"));

    sleep(Duration::from_secs(2)).await;
    push(&peer, json!({"type": "typing", "user_id": "u-ben", "user_name": "Ben", "is_typing": true}));
    settle().await;
    sleep(Duration::from_secs(2)).await;
    assert!(room.typing().is_typing("u-ben"));

    sleep(Duration::from_millis(1100)).await;
    assert_eq!(room.typing_summary(), None);

    push(&peer, json!({"type": "typing", "user_id": "u-ben", "user_name": "Ben", "is_typing": true}));
    push(&peer, json!({"type": "typing", "user_id": "u-ben", "user_name": "Ben", "is_typing": false}));
    settle().await;
    assert_eq!(room.typing_summary(), None);
}

#[tokio::test(start_paused = true)]
async fn local_typing_is_sent_only_on_change() {
    let (_manager, room, mut peer, _peers) = connected_room().await;

    assert!(room.set_typing(true).unwrap());
    assert!(!room.set_typing(true).unwrap());
    assert!(room.set_typing(false).unwrap());
    settle().await;
    assert_eq!(
        sent_frames(&mut peer),
        vec![
            json!({"type": "typing", "is_typing": true}),
            json!({"type": "typing", "is_typing": false}),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn roster_and_errors() {
    let (manager, room, peer, _peers) = connected_room().await;

    push(&peer, json!({"type": "user_joined", "user_id": "u-ben", "user_name": "Ben"}));
    push(&peer, json!({"type": "user_joined", "user_id": "u-ana", "user_name": "Ana"}));
    push(&peer, json!({"type": "user_left", "user_id": "u-ben", "user_name": "Ben"}));
    push(&peer, json!({"type": "error", "message": "Slow down a little"}));
    settle().await;

    let names: Vec<String> = room.online().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Ana"]);
    assert_eq!(room.last_error().as_deref(), Some("Slow down a little"));
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn unknown_and_malformed_frames_are_dropped() {
    let (manager, room, peer, _peers) = connected_room().await;

    push(&peer, json!({"type": "poll_created", "poll": {"id": 1}}));
    push(&peer, json!({"type": "new_message"}));
    push(&peer, json!({"type": "message_supported", "message_id": "seven"}));
    push(&peer, json!({"type": "new_message", "message": message(1, "u-ana", "still here")}));
    settle().await;

    assert_eq!(room.messages().len(), 1);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn history_bootstrap_merges_with_live_messages() {
    let (_manager, room, peer, _peers) = connected_room().await;
    push(&peer, json!({"type": "new_message", "message": message(9, "u-ana", "live")}));
    settle().await;

    let history = vec![
        serde_json::from_value(message(2, "u-ben", "older")).unwrap(),
        serde_json::from_value(message(1, "u-ben", "oldest")).unwrap(),
    ];
    room.bootstrap(history);

    let ids: Vec<u64> = room.messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 9]);
    assert!(room.state().messages.is_loaded);
}

#[tokio::test(start_paused = true)]
async fn dropped_router_stops_receiving() {
    let (manager, room, _peer, _peers) = connected_room().await;
    assert_eq!(manager.subscriber_count(), 1);
    room.detach();
    assert_eq!(manager.subscriber_count(), 0);
}
