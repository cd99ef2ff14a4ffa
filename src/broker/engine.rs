use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::broker::channel::Channel;
use crate::broker::message::{Message, MessageId, PublishType};
use crate::broker::registry::QueueRegistry;
use crate::broker::route_queue::RouteSettings;
use crate::client::Client;
use crate::config::BrokerSettings;
use crate::persistence::Store;
use crate::utils::error::BrokerError;

/// Longest accepted queue name, in bytes.
pub const MAX_QUEUE_NAME: usize = 128;
/// Longest accepted routing key, in bytes.
pub const MAX_ROUTING_KEY: usize = 128;

/// Entry point for connection handlers.
///
/// Validates requests, persists published messages and forwards everything
/// else to the route queues through the registry. A connection's channels
/// live on its `Client`, so the broker itself keeps no per-connection state.
pub struct Broker {
    store: Arc<dyn Store>,
    registry: Arc<QueueRegistry>,
}

impl Broker {
    pub fn new(store: Arc<dyn Store>, settings: &BrokerSettings) -> Self {
        Self::with_route_settings(store, RouteSettings::from(settings))
    }

    /// Build a broker with explicit route timings.
    pub fn with_route_settings(store: Arc<dyn Store>, settings: RouteSettings) -> Self {
        let registry = QueueRegistry::new(Arc::clone(&store), settings);
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Save `body` to the (queue, routing key) backlog and wake its route.
    ///
    /// The message is durable once this returns; delivery is asynchronous.
    pub async fn publish(
        &self,
        queue: &str,
        routing_key: &str,
        publish_type: PublishType,
        body: Bytes,
    ) -> Result<MessageId, BrokerError> {
        if body.is_empty() {
            return Err(BrokerError::forbidden("publish empty data forbidden"));
        }
        check_route(queue, routing_key)?;

        let id = self.store.generate_id()?;
        let message = Message::new(id, publish_type, routing_key, body);
        self.store.save(queue, routing_key, &message)?;

        let route = self.registry.get(queue, routing_key);
        if route.push(message.clone()).await.is_err() {
            // the route retired between get and push; its successor reads
            // the backlog from the store either way
            self.registry.get(queue, routing_key).push(message).await?;
        }

        debug!(queue, routing_key, msg_id = id, %publish_type, "message published");
        Ok(id)
    }

    /// Bind `client` to (queue, routing key).
    ///
    /// Binding a queue the client already holds under another routing key
    /// moves the binding; the same key just updates `no_ack`.
    pub async fn bind(
        &self,
        client: &mut Client,
        queue: &str,
        routing_key: &str,
        no_ack: bool,
    ) -> Result<(), BrokerError> {
        check_route(queue, routing_key)?;

        if let Some(old) = client.channel(queue).cloned() {
            if old.routing_key() != routing_key {
                client.remove_channel(queue);
                if let Err(e) = old.close().await {
                    warn!(client = %client.id, queue, "failed to unbind old route: {e}");
                }
            }
        }

        let channel = Arc::new(Channel::new(
            client.id.clone(),
            queue,
            routing_key,
            no_ack,
            client.pusher(),
            &self.registry,
        ));

        let route = self.registry.get(queue, routing_key);
        if route.bind(Arc::clone(&channel)).await.is_err() {
            self.registry
                .get(queue, routing_key)
                .bind(Arc::clone(&channel))
                .await?;
        }
        client.insert_channel(channel);

        info!(client = %client.id, queue, routing_key, no_ack, "bound");
        Ok(())
    }

    /// Unbind `queue`, or every queue when `queue` is empty.
    pub async fn unbind(&self, client: &mut Client, queue: &str) -> Result<(), BrokerError> {
        if queue.is_empty() {
            self.unbind_all(client).await;
            return Ok(());
        }

        if let Some(channel) = client.remove_channel(queue) {
            channel.close().await?;
            info!(client = %client.id, queue, "unbound");
        }
        Ok(())
    }

    /// Unbind every channel the client holds. Used on unbind-all and on
    /// disconnect.
    pub async fn unbind_all(&self, client: &mut Client) {
        for channel in client.take_channels() {
            if let Err(e) = channel.close().await {
                warn!(client = %client.id, queue = channel.queue(), "failed to unbind: {e}");
            }
        }
        debug!(client = %client.id, "all channels unbound");
    }

    pub async fn ack(
        &self,
        client: &Client,
        queue: &str,
        id: MessageId,
    ) -> Result<(), BrokerError> {
        let channel = client
            .channel(queue)
            .ok_or_else(|| BrokerError::NotBound(queue.to_string()))?;
        channel.ack(id).await
    }
}

fn check_route(queue: &str, routing_key: &str) -> Result<(), BrokerError> {
    if queue.is_empty() {
        return Err(BrokerError::forbidden("queue must not be empty"));
    }
    if queue.len() > MAX_QUEUE_NAME {
        return Err(BrokerError::bad_request(format!(
            "queue name longer than {MAX_QUEUE_NAME} bytes"
        )));
    }
    if routing_key.len() > MAX_ROUTING_KEY {
        return Err(BrokerError::bad_request(format!(
            "routing key longer than {MAX_ROUTING_KEY} bytes"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("routes", &self.registry.len())
            .finish()
    }
}
