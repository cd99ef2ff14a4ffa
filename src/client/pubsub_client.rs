use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::channel::{Channel, Pusher};
use crate::broker::message::Message;
use crate::transport::message::ServerMessage;
use crate::utils::error::TransportError;

/// Represents a connected WebSocket client.
///
/// Holds the connection's identity, whether it has authenticated, and the
/// channels it has bound, keyed by queue name. The socket itself is owned
/// by the connection's writer task; everything here writes through
/// `Outbound`.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for the client.
    pub id: String,

    pub authenticated: bool,

    outbound: Arc<Outbound>,

    channels: HashMap<String, Arc<Channel>>,
}

impl Client {
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        let id = format!("client-{}", uuid::Uuid::new_v4());
        Self {
            outbound: Arc::new(Outbound {
                client_id: id.clone(),
                sender,
            }),
            id,
            authenticated: false,
            channels: HashMap::new(),
        }
    }

    /// Queue a frame for the writer task.
    pub fn send(&self, msg: &ServerMessage) -> Result<(), TransportError> {
        self.outbound.send(msg)
    }

    /// Push capability handed to new channels.
    pub fn pusher(&self) -> Arc<dyn Pusher> {
        self.outbound.clone()
    }

    pub fn channel(&self, queue: &str) -> Option<&Arc<Channel>> {
        self.channels.get(queue)
    }

    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn insert_channel(&mut self, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        self.channels.insert(channel.queue().to_string(), channel)
    }

    pub fn remove_channel(&mut self, queue: &str) -> Option<Arc<Channel>> {
        self.channels.remove(queue)
    }

    pub fn take_channels(&mut self) -> Vec<Arc<Channel>> {
        self.channels.drain().map(|(_, channel)| channel).collect()
    }
}

/// Write half shared between the connection and its channels.
#[derive(Debug)]
pub struct Outbound {
    client_id: String,
    sender: UnboundedSender<WsMessage>,
}

impl Outbound {
    fn send(&self, msg: &ServerMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg)?;
        self.sender
            .send(WsMessage::text(text))
            .map_err(|_| TransportError::Closed(self.client_id.clone()))
    }
}

impl Pusher for Outbound {
    fn push(&self, channel: &Channel, message: &Message) -> Result<(), TransportError> {
        self.send(&ServerMessage::Push {
            queue: channel.queue().to_string(),
            routing_key: message.routing_key.clone(),
            msg_id: message.id,
            payload: String::from_utf8_lossy(&message.body).into_owned(),
            no_ack: channel.no_ack(),
        })
    }
}
