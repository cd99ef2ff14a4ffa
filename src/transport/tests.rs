use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::client::Client;
use crate::config::{BrokerSettings, ServerSettings};
use crate::persistence::MemoryStore;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::transport::websocket::handle_client_message;
use crate::utils::error::BrokerError;

fn setup(password: Option<&str>) -> (Broker, ServerSettings, Client, UnboundedReceiver<WsMessage>) {
    let broker = Broker::new(Arc::new(MemoryStore::new()), &BrokerSettings::default());
    let settings = ServerSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        password: password.map(str::to_string),
        keepalive_secs: 0,
    };
    let (tx, rx) = mpsc::unbounded_channel();
    (broker, settings, Client::new(tx), rx)
}

// Parses a raw frame the way the read loop does before dispatching it.
async fn handle_message(
    broker: &Broker,
    client: &mut Client,
    settings: &ServerSettings,
    msg: serde_json::Value,
) -> Result<Option<ServerMessage>, BrokerError> {
    let request: ClientMessage = serde_json::from_value(msg).unwrap();
    handle_client_message(broker, client, settings, request).await
}

#[test]
fn test_client_message_defaults() {
    let bind: ClientMessage = serde_json::from_str(r#"{"type":"bind","queue":"q"}"#).unwrap();
    assert_eq!(
        bind,
        ClientMessage::Bind {
            queue: "q".to_string(),
            routing_key: String::new(),
            no_ack: false,
        }
    );

    let unbind: ClientMessage = serde_json::from_str(r#"{"type":"unbind"}"#).unwrap();
    assert_eq!(unbind, ClientMessage::Unbind { queue: String::new() });

    let heartbeat: ClientMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
    assert_eq!(heartbeat, ClientMessage::Heartbeat);

    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe","topic":"t"}"#).is_err());
}

#[tokio::test]
async fn test_handle_bind_and_publish() {
    let (broker, settings, mut client, mut rx) = setup(None);

    let reply = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "bind", "queue": "jobs", "routing_key": "k" }),
    )
    .await
    .unwrap();
    assert_eq!(reply, Some(ServerMessage::BindOk { queue: "jobs".to_string() }));
    assert!(client.channel("jobs").is_some());

    let reply = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({
            "type": "publish",
            "queue": "jobs",
            "routing_key": "k",
            "publish_type": "Direct",
            "payload": "hello"
        }),
    )
    .await
    .unwrap();
    let Some(ServerMessage::PublishOk { msg_id }) = reply else {
        panic!("expected publish_ok, got {reply:?}");
    };

    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let push: ServerMessage = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert!(matches!(
        push,
        ServerMessage::Push { msg_id: id, ref payload, .. } if id == msg_id && payload == "hello"
    ));

    let reply = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "ack", "queue": "jobs", "msg_id": msg_id }),
    )
    .await
    .unwrap();
    assert_eq!(reply, None);

    let stats = broker.registry().get("jobs", "k").stats().await.unwrap();
    assert_eq!(stats.backlog, 0);
}

#[tokio::test]
async fn test_handle_unbind() {
    let (broker, settings, mut client, _rx) = setup(None);

    handle_message(&broker, &mut client, &settings, json!({ "type": "bind", "queue": "jobs" }))
        .await
        .unwrap();
    let reply = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "unbind", "queue": "jobs" }),
    )
    .await
    .unwrap();

    assert_eq!(reply, Some(ServerMessage::UnbindOk { queue: "jobs".to_string() }));
    assert!(client.channel("jobs").is_none());
}

#[tokio::test]
async fn test_handle_invalid_publish_type() {
    let (broker, settings, mut client, _rx) = setup(None);

    let err = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "publish", "queue": "q", "publish_type": "topic", "payload": "x" }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), 400);
    assert_eq!(err.to_string(), "invalid publish type topic");
}

#[tokio::test]
async fn test_handle_ack_unbound_queue() {
    let (broker, settings, mut client, _rx) = setup(None);

    let err = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "ack", "queue": "nowhere", "msg_id": 1 }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), 403);
}

#[tokio::test]
async fn test_heartbeat_has_no_reply() {
    let (broker, settings, mut client, _rx) = setup(None);
    let reply = handle_message(&broker, &mut client, &settings, json!({ "type": "heartbeat" }))
        .await
        .unwrap();
    assert_eq!(reply, None);
}

#[tokio::test]
async fn test_auth_required_first() {
    let (broker, settings, mut client, _rx) = setup(Some("secret"));

    let err = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "bind", "queue": "q" }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), 401);
    assert_eq!(err.to_string(), "must auth first");

    let err = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "auth", "password": "wrong" }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), 401);
    assert!(!client.authenticated);

    let reply = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "auth", "password": "secret" }),
    )
    .await
    .unwrap();
    assert_eq!(reply, Some(ServerMessage::AuthOk));
    assert!(client.authenticated);

    let reply = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "bind", "queue": "q" }),
    )
    .await
    .unwrap();
    assert_eq!(reply, Some(ServerMessage::BindOk { queue: "q".to_string() }));
}

#[tokio::test]
async fn test_auth_without_password_configured() {
    let (broker, settings, mut client, _rx) = setup(None);
    let reply = handle_message(
        &broker,
        &mut client,
        &settings,
        json!({ "type": "auth", "password": "anything" }),
    )
    .await
    .unwrap();
    assert_eq!(reply, Some(ServerMessage::AuthOk));
}
