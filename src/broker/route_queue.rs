//! Route queues
//!
//! One actor per (queue, routing key). The worker task owns all delivery
//! state for its route: the subscriber rotation, the pending delivery and
//! the idle clock. Everything else talks to it through `RouteQueue`, a
//! cheap handle around the bounded mailbox, so every operation on a route
//! is applied in submission order without locks.
//!
//! The backlog itself lives in the `Store`: the head of the route's backlog
//! is `Store::front`. Publishers save before they push, so a route that is
//! reclaimed and recreated never loses a message. A saved message is only
//! dispatched once the worker has admitted it, either through its `Push` or
//! because it was already in the backlog when the worker started. Commands
//! queued ahead of that `Push` therefore never see it.
//!
//! Delivery rules:
//! - at most one message awaits an ack at any time; nothing else is
//!   dispatched on the route until it is acked, its holders unbind, or the
//!   ack grace period runs out
//! - direct messages go to the least recently served subscriber that
//!   accepts them; a message nobody accepts is discarded
//! - fanout messages go to every subscriber; if nobody accepts, the message
//!   stays at the head until someone binds or it expires
//! - subscribers whose push fails are dropped from the rotation

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::channel::{Channel, ChannelId, Delivery};
use crate::broker::message::{Message, MessageId, PublishType};
use crate::broker::registry::QueueRegistry;
use crate::config::BrokerSettings;
use crate::persistence::Store;
use crate::utils::error::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub queue: String,
    pub routing_key: String,
}

impl RouteKey {
    pub fn new(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.queue, self.routing_key)
    }
}

/// Timing and sizing for route queues, derived from `BrokerSettings`.
#[derive(Debug, Clone)]
pub struct RouteSettings {
    pub max_queue_size: usize,
    pub message_timeout: Duration,
    pub idle_grace: Duration,
    pub ack_grace: Duration,
    pub mailbox_capacity: usize,
}

impl From<&BrokerSettings> for RouteSettings {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            max_queue_size: settings.max_queue_size.max(1),
            message_timeout: Duration::from_secs(settings.message_timeout_secs),
            idle_grace: Duration::from_secs(settings.route_idle_secs.max(1)),
            ack_grace: Duration::from_secs(settings.ack_timeout_secs.max(1)),
            mailbox_capacity: settings.mailbox_capacity.max(1),
        }
    }
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

/// Point-in-time view of a route, answered by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStats {
    pub subscribers: usize,
    pub pending_ack: Option<MessageId>,
    pub backlog: usize,
}

enum Command {
    /// Replies once the channel is in the rotation.
    Bind(Arc<Channel>, oneshot::Sender<()>),
    Unbind(ChannelId),
    Push(Message),
    Ack(MessageId),
    Stats(oneshot::Sender<RouteStats>),
}

/// Handle to a route queue worker.
#[derive(Clone)]
pub struct RouteQueue {
    inner: Arc<Handle>,
}

struct Handle {
    key: RouteKey,
    instance: u64,
    mailbox: mpsc::Sender<Command>,
}

impl RouteQueue {
    /// Start the worker task. Only the registry calls this, under its lock.
    pub(crate) fn spawn(
        key: RouteKey,
        instance: u64,
        store: Arc<dyn Store>,
        settings: RouteSettings,
        registry: Weak<QueueRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.mailbox_capacity);

        // Everything saved before the route existed is deliverable.
        let admitted = match store.back(&key.queue, &key.routing_key) {
            Ok(newest) => newest.map(|message| message.id),
            Err(e) => {
                warn!(route = %key, "failed to load backlog: {e}");
                None
            }
        };

        let worker = Worker {
            key: key.clone(),
            instance,
            store,
            settings,
            registry,
            subscribers: VecDeque::new(),
            pending: None,
            admitted,
            last_activity: Instant::now(),
        };

        tokio::spawn(supervise(worker, rx));
        debug!(route = %key, instance, "route queue started");

        Self {
            inner: Arc::new(Handle {
                key,
                instance,
                mailbox: tx,
            }),
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.inner.key
    }

    pub fn instance(&self) -> u64 {
        self.inner.instance
    }

    pub fn same_instance(&self, other: &RouteQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add `channel` to the rotation. Returns once the worker has applied it.
    pub async fn bind(&self, channel: Arc<Channel>) -> Result<(), BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Bind(channel, tx)).await?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn unbind(&self, channel: ChannelId) -> Result<(), BrokerError> {
        self.send(Command::Unbind(channel)).await
    }

    /// Tell the route a message was saved to its backlog.
    pub async fn push(&self, message: Message) -> Result<(), BrokerError> {
        self.send(Command::Push(message)).await
    }

    pub async fn ack(&self, id: MessageId) -> Result<(), BrokerError> {
        self.send(Command::Ack(id)).await
    }

    pub async fn stats(&self) -> Result<RouteStats, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx)).await?;
        rx.await.map_err(|_| self.closed())
    }

    async fn send(&self, command: Command) -> Result<(), BrokerError> {
        self.inner
            .mailbox
            .send(command)
            .await
            .map_err(|_| self.closed())
    }

    fn closed(&self) -> BrokerError {
        BrokerError::RouteClosed(self.inner.key.to_string())
    }
}

impl fmt::Debug for RouteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteQueue")
            .field("key", &self.inner.key)
            .field("instance", &self.inner.instance)
            .finish()
    }
}

/// Runs the worker and tears the route down if it panics.
async fn supervise(worker: Worker, mailbox: mpsc::Receiver<Command>) {
    let key = worker.key.clone();
    let instance = worker.instance;
    let registry = worker.registry.clone();

    if let Err(panic) = AssertUnwindSafe(worker.run(mailbox)).catch_unwind().await {
        error!(
            route = %key,
            instance,
            "route queue worker panicked: {}",
            panic_message(panic.as_ref())
        );
        if let Some(registry) = registry.upgrade() {
            registry.delete(&key, instance);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

struct PendingAck {
    id: MessageId,
    /// Channels that received the message and may still ack it.
    holders: Vec<ChannelId>,
    since: Instant,
}

enum Dispatched {
    Pending(Vec<ChannelId>),
    Completed,
    Undelivered,
}

struct Worker {
    key: RouteKey,
    instance: u64,
    store: Arc<dyn Store>,
    settings: RouteSettings,
    registry: Weak<QueueRegistry>,
    /// Front is the least recently served subscriber.
    subscribers: VecDeque<Arc<Channel>>,
    pending: Option<PendingAck>,
    /// Highest message id this worker may dispatch.
    admitted: Option<MessageId>,
    last_activity: Instant,
}

impl Worker {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                command = mailbox.recv() => match command {
                    Some(command) => {
                        self.last_activity = Instant::now();
                        self.handle(command);
                    }
                    // every handle is gone, including the registry's
                    None => return,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    self.on_timer();
                    if self.last_activity.elapsed() >= self.settings.idle_grace {
                        if self.is_drained() {
                            self.retire(mailbox).await;
                            return;
                        }
                        self.last_activity = Instant::now();
                    }
                }
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let idle = self.last_activity + self.settings.idle_grace;
        match &self.pending {
            Some(pending) => idle.min(pending.since + self.settings.ack_grace),
            None => idle,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Bind(channel, applied) => {
                self.bind(channel);
                let _ = applied.send(());
            }
            Command::Unbind(id) => self.unbind(&id),
            Command::Push(message) => {
                debug!(route = %self.key, msg_id = message.id, "message queued");
                self.admitted = self.admitted.max(Some(message.id));
                self.enforce_limit();
                self.dispatch();
            }
            Command::Ack(id) => self.ack(id),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn bind(&mut self, channel: Arc<Channel>) {
        match self.subscribers.iter().position(|c| c.id() == channel.id()) {
            Some(idx) => self.subscribers[idx] = channel,
            None => {
                debug!(route = %self.key, channel = %channel.id(), "subscriber bound");
                self.subscribers.push_back(channel);
            }
        }
        self.dispatch();
    }

    fn unbind(&mut self, id: &ChannelId) {
        self.subscribers.retain(|c| c.id() != id);
        debug!(route = %self.key, channel = %id, "subscriber unbound");

        if let Some(pending) = &mut self.pending {
            pending.holders.retain(|h| h != id);
            if pending.holders.is_empty() {
                debug!(
                    route = %self.key,
                    msg_id = pending.id,
                    "last holder left, releasing delivery"
                );
                self.pending = None;
            }
        }
        self.dispatch();
    }

    fn ack(&mut self, id: MessageId) {
        match &self.pending {
            Some(pending) if pending.id == id => {}
            _ => {
                debug!(route = %self.key, msg_id = id, "ignoring stale ack");
                return;
            }
        }

        self.pending = None;
        self.remove(id);
        self.dispatch();
    }

    fn on_timer(&mut self) {
        if let Some(pending) = &self.pending {
            if pending.since.elapsed() >= self.settings.ack_grace {
                warn!(
                    route = %self.key,
                    msg_id = pending.id,
                    "ack not received in time, redelivering"
                );
                self.pending = None;
            }
        }
        self.purge_expired();
        self.dispatch();
    }

    fn is_admitted(&self, id: MessageId) -> bool {
        self.admitted.is_some_and(|newest| id <= newest)
    }

    /// Delete expired messages from the head of the backlog, subscribers or
    /// not. The pending delivery is left to its ack or the ack grace period.
    fn purge_expired(&mut self) {
        let timeout_ms = self.settings.message_timeout.as_millis() as i64;
        loop {
            let message = match self.store.front(&self.key.queue, &self.key.routing_key) {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(e) => {
                    warn!(route = %self.key, "failed to read backlog head: {e}");
                    return;
                }
            };

            let now_ms = chrono::Utc::now().timestamp_millis();
            if !self.is_admitted(message.id)
                || self.pending.as_ref().is_some_and(|p| p.id == message.id)
                || !message.is_expired(now_ms, timeout_ms)
            {
                return;
            }

            debug!(route = %self.key, msg_id = message.id, "message expired");
            if !self.remove(message.id) {
                return;
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.subscribers.is_empty()
            && self.pending.is_none()
            && self
                .store
                .is_empty(&self.key.queue, &self.key.routing_key)
                .unwrap_or(false)
    }

    /// Deregister and hand anything that raced into the mailbox to the
    /// route's next instance.
    async fn retire(&mut self, mut mailbox: mpsc::Receiver<Command>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        registry.delete(&self.key, self.instance);
        mailbox.close();

        while let Ok(command) = mailbox.try_recv() {
            let successor = registry.get(&self.key.queue, &self.key.routing_key);
            if let Err(e) = successor.send(command).await {
                warn!(route = %self.key, "failed to forward command to successor: {e}");
            }
        }

        info!(route = %self.key, instance = self.instance, "idle route queue reclaimed");
    }

    /// Drop the oldest messages while the backlog is over its cap. Evicting
    /// the pending message counts as its ack.
    fn enforce_limit(&mut self) {
        let (queue, routing_key) = (&self.key.queue, &self.key.routing_key);
        loop {
            let len = match self.store.len(queue, routing_key) {
                Ok(len) => len,
                Err(e) => {
                    warn!(route = %self.key, "failed to read backlog length: {e}");
                    return;
                }
            };
            if len <= self.settings.max_queue_size {
                return;
            }

            let oldest = match self.store.front(queue, routing_key) {
                Ok(Some(message)) => message.id,
                Ok(None) => return,
                Err(e) => {
                    warn!(route = %self.key, "failed to read backlog head: {e}");
                    return;
                }
            };
            if let Err(e) = self.store.pop(queue, routing_key) {
                warn!(route = %self.key, "failed to evict message: {e}");
                return;
            }

            warn!(route = %self.key, msg_id = oldest, "backlog full, dropped oldest message");
            if self.pending.as_ref().is_some_and(|p| p.id == oldest) {
                self.pending = None;
            }
        }
    }

    fn dispatch(&mut self) {
        let timeout_ms = self.settings.message_timeout.as_millis() as i64;

        while self.pending.is_none() && !self.subscribers.is_empty() {
            let message = match self.store.front(&self.key.queue, &self.key.routing_key) {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(e) => {
                    warn!(route = %self.key, "failed to read backlog head: {e}");
                    return;
                }
            };
            if !self.is_admitted(message.id) {
                // its Push is still in the mailbox
                return;
            }

            let now_ms = chrono::Utc::now().timestamp_millis();
            if message.is_expired(now_ms, timeout_ms) {
                debug!(route = %self.key, msg_id = message.id, "message expired");
                if !self.remove(message.id) {
                    return;
                }
                continue;
            }

            let outcome = match message.publish_type {
                PublishType::Direct => self.dispatch_direct(&message),
                PublishType::Fanout => self.dispatch_fanout(&message),
            };

            match outcome {
                Dispatched::Pending(holders) => {
                    debug!(route = %self.key, msg_id = message.id, "delivered, awaiting ack");
                    self.pending = Some(PendingAck {
                        id: message.id,
                        holders,
                        since: Instant::now(),
                    });
                }
                Dispatched::Completed => {
                    if !self.remove(message.id) {
                        return;
                    }
                }
                Dispatched::Undelivered => match message.publish_type {
                    PublishType::Direct => {
                        debug!(
                            route = %self.key,
                            msg_id = message.id,
                            "no subscriber accepted message, discarding"
                        );
                        if !self.remove(message.id) {
                            return;
                        }
                    }
                    PublishType::Fanout => return,
                },
            }
        }
    }

    fn dispatch_direct(&mut self, message: &Message) -> Dispatched {
        let mut idx = 0;
        while idx < self.subscribers.len() {
            let channel = Arc::clone(&self.subscribers[idx]);
            if channel.routing_key() != self.key.routing_key {
                idx += 1;
                continue;
            }

            match channel.push(message) {
                Ok(delivery) => {
                    if let Some(served) = self.subscribers.remove(idx) {
                        self.subscribers.push_back(served);
                    }
                    return match delivery {
                        Delivery::AutoAcked => Dispatched::Completed,
                        Delivery::AwaitingAck => Dispatched::Pending(vec![channel.id().clone()]),
                    };
                }
                Err(e) => {
                    warn!(
                        route = %self.key,
                        channel = %channel.id(),
                        "push failed, dropping subscriber: {e}"
                    );
                    self.subscribers.remove(idx);
                }
            }
        }
        Dispatched::Undelivered
    }

    fn dispatch_fanout(&mut self, message: &Message) -> Dispatched {
        let key = &self.key;
        let mut holders = Vec::new();
        let mut auto_acked = false;

        self.subscribers.retain(|channel| {
            if channel.routing_key() != key.routing_key {
                return true;
            }
            match channel.push(message) {
                Ok(Delivery::AwaitingAck) => {
                    holders.push(channel.id().clone());
                    true
                }
                Ok(Delivery::AutoAcked) => {
                    auto_acked = true;
                    true
                }
                Err(e) => {
                    warn!(
                        route = %key,
                        channel = %channel.id(),
                        "push failed, dropping subscriber: {e}"
                    );
                    false
                }
            }
        });

        if auto_acked {
            Dispatched::Completed
        } else if holders.is_empty() {
            Dispatched::Undelivered
        } else {
            Dispatched::Pending(holders)
        }
    }

    /// Delete `id` from the backlog; false if the store refused.
    fn remove(&self, id: MessageId) -> bool {
        match self.store.delete(&self.key.queue, &self.key.routing_key, id) {
            Ok(()) => true,
            Err(e) => {
                error!(route = %self.key, msg_id = id, "failed to delete message: {e}");
                false
            }
        }
    }

    fn stats(&self) -> RouteStats {
        RouteStats {
            subscribers: self.subscribers.len(),
            pending_ack: self.pending.as_ref().map(|p| p.id),
            backlog: self
                .store
                .len(&self.key.queue, &self.key.routing_key)
                .unwrap_or(0),
        }
    }
}
