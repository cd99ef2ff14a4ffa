use serde::{Deserialize, Serialize};

use crate::broker::message::MessageId;

/// Frames a peer sends to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "auth")]
    Auth { password: String },

    #[serde(rename = "publish")]
    Publish {
        queue: String,
        #[serde(default)]
        routing_key: String,
        /// `direct` or `fanout`; anything else is rejected with a 400.
        publish_type: String,
        payload: String,
    },

    #[serde(rename = "bind")]
    Bind {
        queue: String,
        #[serde(default)]
        routing_key: String,
        #[serde(default)]
        no_ack: bool,
    },

    /// An empty queue unbinds every queue on the connection.
    #[serde(rename = "unbind")]
    Unbind {
        #[serde(default)]
        queue: String,
    },

    #[serde(rename = "ack")]
    Ack { queue: String, msg_id: MessageId },

    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Frames the server sends to a peer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth_ok")]
    AuthOk,

    #[serde(rename = "publish_ok")]
    PublishOk { msg_id: MessageId },

    #[serde(rename = "bind_ok")]
    BindOk { queue: String },

    #[serde(rename = "unbind_ok")]
    UnbindOk { queue: String },

    #[serde(rename = "push")]
    Push {
        queue: String,
        routing_key: String,
        msg_id: MessageId,
        payload: String,
        no_ack: bool,
    },

    #[serde(rename = "error")]
    Error { code: u16, message: String },
}
