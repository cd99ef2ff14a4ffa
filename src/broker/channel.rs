//! Subscriber bindings
//!
//! A `Channel` is one connection's binding to a (queue, routing key). Route
//! queues keep `Arc<Channel>`s in their rotation and deliver through the
//! channel's `Pusher`, which the connection implements. A connection holds
//! at most one channel per queue name, so the channel id is
//! (client id, queue).

use std::fmt;
use std::sync::{Arc, Weak};

use crate::broker::message::{Message, MessageId};
use crate::broker::registry::QueueRegistry;
use crate::broker::route_queue::RouteQueue;
use crate::utils::error::{BrokerError, TransportError};

/// Write capability a connection exposes to route queues.
///
/// Called from route queue workers; must not block on the socket.
pub trait Pusher: Send + Sync {
    fn push(&self, channel: &Channel, message: &Message) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub client: String,
    pub queue: String,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.client, self.queue)
    }
}

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The peer must ack before the route moves on.
    AwaitingAck,
    /// No-ack binding: the write itself counts as the ack.
    AutoAcked,
}

pub struct Channel {
    id: ChannelId,
    routing_key: String,
    no_ack: bool,
    pusher: Arc<dyn Pusher>,
    registry: Weak<QueueRegistry>,
}

impl Channel {
    pub fn new(
        client: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        no_ack: bool,
        pusher: Arc<dyn Pusher>,
        registry: &Arc<QueueRegistry>,
    ) -> Self {
        Self {
            id: ChannelId {
                client: client.into(),
                queue: queue.into(),
            },
            routing_key: routing_key.into(),
            no_ack,
            pusher,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.id.queue
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn no_ack(&self) -> bool {
        self.no_ack
    }

    pub fn push(&self, message: &Message) -> Result<Delivery, TransportError> {
        self.pusher.push(self, message)?;
        if self.no_ack {
            Ok(Delivery::AutoAcked)
        } else {
            Ok(Delivery::AwaitingAck)
        }
    }

    /// Acknowledge `id` on the route this channel is bound to.
    pub async fn ack(&self, id: MessageId) -> Result<(), BrokerError> {
        self.route()?.ack(id).await
    }

    /// Remove this channel from its route. A route that is already gone
    /// has nothing left to unbind.
    pub async fn close(&self) -> Result<(), BrokerError> {
        match self.route() {
            Ok(route) => route.unbind(self.id.clone()).await,
            Err(_) => Ok(()),
        }
    }

    fn route(&self) -> Result<RouteQueue, BrokerError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| BrokerError::RouteClosed(self.route_name()))?;
        registry
            .lookup(self.queue(), &self.routing_key)
            .ok_or_else(|| BrokerError::RouteClosed(self.route_name()))
    }

    fn route_name(&self) -> String {
        format!("{}/{}", self.id.queue, self.routing_key)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("routing_key", &self.routing_key)
            .field("no_ack", &self.no_ack)
            .finish()
    }
}
