/// Realtime channel lifecycle against an in-process Socket.IO server
mod common;

use chatsync_core::error::SyncError;
use chatsync_core::realtime::{
    ConnectionState, InboundEvent, InboundEventKind, OutboundEvent, RealtimeChannel, SocketPacket,
};
use chatsync_core::Session;
use common::{message_json, FakeServer, NAMESPACE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn channel(server: &FakeServer) -> RealtimeChannel {
    RealtimeChannel::new(Arc::new(server.clone()), NAMESPACE, Duration::from_secs(2))
}

async fn wait_for_state(channel: &RealtimeChannel, expected: ConnectionState) -> bool {
    for _ in 0..100 {
        if channel.state().await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_connect_sends_token_and_records_socket_id() {
    let server = FakeServer::new();
    let channel = channel(&server);
    assert_eq!(channel.state().await, ConnectionState::Disconnected);

    channel.connect(&Session::new("tok-1")).await.unwrap();

    assert_eq!(channel.state().await, ConnectionState::Connected);
    assert_eq!(channel.socket_id().await.as_deref(), Some("sock-1"));
    match &server.received()[0] {
        SocketPacket::Connect { namespace, data } => {
            assert_eq!(namespace, NAMESPACE);
            assert_eq!(data.as_ref().unwrap()["token"], "tok-1");
        }
        other => panic!("expected namespace connect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connect_is_noop_when_connected() {
    let server = FakeServer::new();
    let channel = channel(&server);
    let session = Session::new("tok");

    channel.connect(&session).await.unwrap();
    channel.connect(&session).await.unwrap();

    assert_eq!(server.opens(), 1);
    assert!(channel.is_connected().await);
}

#[tokio::test]
async fn test_connect_without_token_fails() {
    let server = FakeServer::new();
    let channel = channel(&server);

    let err = channel.connect(&Session::anonymous()).await.unwrap_err();

    assert!(matches!(err, SyncError::NotAuthenticated));
    assert_eq!(channel.state().await, ConnectionState::Disconnected);
    assert_eq!(server.opens(), 0);
}

#[tokio::test]
async fn test_rejected_connect_leaves_channel_disconnected() {
    let server = FakeServer::new();
    server.reject_with(Some("invalid token"));
    let channel = channel(&server);
    let session = Session::new("bad");

    let err = channel.connect(&session).await.unwrap_err();
    assert!(matches!(err, SyncError::Channel(ref m) if m == "invalid token"));
    assert_eq!(channel.state().await, ConnectionState::Disconnected);

    // A later attempt may succeed
    server.reject_with(None);
    channel.connect(&session).await.unwrap();
    assert!(channel.is_connected().await);
}

#[tokio::test]
async fn test_emit_requires_connection() {
    let server = FakeServer::new();
    let channel = channel(&server);
    let join = OutboundEvent::JoinGroup {
        conversation_id: "g1".to_string(),
    };

    assert!(matches!(channel.emit(&join).await, Err(SyncError::ChannelClosed)));

    channel.connect(&Session::new("tok")).await.unwrap();
    channel.emit(&join).await.unwrap();
    let emitted = server.wait_for_emitted(1).await;
    assert_eq!(emitted, vec![("join_group".to_string(), "g1".to_string())]);
}

#[tokio::test]
async fn test_events_reach_matching_subscribers_only() {
    let server = FakeServer::new();
    let channel = channel(&server);
    channel.connect(&Session::new("tok")).await.unwrap();

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let (conv_tx, mut conv_rx) = mpsc::unbounded_channel();
    channel.subscribe(InboundEventKind::NewMessage, msg_tx).await;
    channel.subscribe(InboundEventKind::GroupNewMessage, conv_tx).await;

    server.push("new_message", message_json("m1", "g1"));
    server.push(
        "group_new_message",
        serde_json::json!({ "id": "g2", "name": "Ops", "type": "group" }),
    );

    let event = timeout(Duration::from_secs(1), msg_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, InboundEvent::NewMessage(ref m) if m.id == "m1"));
    let event = timeout(Duration::from_secs(1), conv_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, InboundEvent::GroupNewMessage(ref c) if c.id == "g2"));
    assert!(msg_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let server = FakeServer::new();
    let channel = channel(&server);
    channel.connect(&Session::new("tok")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.subscribe(InboundEventKind::NewMessage, tx).await;

    server.push("new_message", serde_json::json!({ "nonsense": true }));
    server.push("new_message", message_json("m2", "g1"));

    let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, InboundEvent::NewMessage(ref m) if m.id == "m2"));
    assert!(channel.is_connected().await);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let server = FakeServer::new();
    let channel = channel(&server);
    channel.connect(&Session::new("tok")).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = channel.subscribe(InboundEventKind::NewMessage, tx).await;
    assert_eq!(channel.subscription_count().await, 1);

    assert!(channel.unsubscribe(&sub).await);
    assert!(!channel.unsubscribe(&sub).await);
    assert_eq!(channel.subscription_count().await, 0);

    server.push("new_message", message_json("m1", "g1"));
    // The handler was dropped along with its subscription
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_disconnect_invalidates_subscriptions_and_allows_reconnect() {
    let server = FakeServer::new();
    let channel = channel(&server);
    let session = Session::new("tok");
    channel.connect(&session).await.unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    channel.subscribe(InboundEventKind::NewMessage, tx).await;

    channel.disconnect().await;

    assert_eq!(channel.state().await, ConnectionState::Disconnected);
    assert_eq!(channel.subscription_count().await, 0);
    assert!(channel.socket_id().await.is_none());

    channel.connect(&session).await.unwrap();
    assert_eq!(server.opens(), 2);
    assert_eq!(channel.socket_id().await.as_deref(), Some("sock-2"));
}

#[tokio::test]
async fn test_transport_loss_moves_to_disconnected() {
    let server = FakeServer::new();
    let channel = channel(&server);
    channel.connect(&Session::new("tok")).await.unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    channel.subscribe(InboundEventKind::GroupNewMessage, tx).await;

    server.drop_connection();

    assert!(wait_for_state(&channel, ConnectionState::Disconnected).await);
    assert_eq!(channel.subscription_count().await, 0);
    assert!(matches!(
        channel
            .emit(&OutboundEvent::LeaveGroup {
                conversation_id: "g1".to_string()
            })
            .await,
        Err(SyncError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_server_error_event_keeps_channel_open() {
    let server = FakeServer::new();
    let channel = channel(&server);
    channel.connect(&Session::new("tok")).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.subscribe(InboundEventKind::NewMessage, tx).await;

    server.push("error", serde_json::json!({ "message": "rate limited" }));
    server.push("new_message", message_json("m1", "g1"));

    let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, InboundEvent::NewMessage(ref m) if m.id == "m1"));
    assert!(channel.is_connected().await);
    assert_eq!(channel.subscription_count().await, 1);
}

#[tokio::test]
async fn test_state_changes_are_broadcast() {
    let server = FakeServer::new();
    let channel = channel(&server);
    let mut states = channel.watch_state();

    channel.connect(&Session::new("tok")).await.unwrap();
    assert_eq!(states.recv().await.unwrap(), ConnectionState::Connected);

    server.drop_connection();
    let lost = timeout(Duration::from_secs(1), states.recv()).await.unwrap().unwrap();
    assert_eq!(lost, ConnectionState::Disconnected);

    // Refused attempts are reported to the caller only
    server.reject_with(Some("nope"));
    assert!(channel.connect(&Session::new("tok")).await.is_err());
    assert!(states.try_recv().is_err());
}
