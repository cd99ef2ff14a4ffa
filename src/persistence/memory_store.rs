use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{Store, StoreError};
use crate::broker::message::{Message, MessageId};

type Backlogs = HashMap<(String, String), VecDeque<Message>>;

/// In-process backlogs, each kept in message id order like the sled trees.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    backlogs: Mutex<Backlogs>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_backlogs<T>(&self, f: impl FnOnce(&mut Backlogs) -> T) -> Result<T, StoreError> {
        let mut backlogs = self.backlogs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut backlogs))
    }
}

fn key(queue: &str, routing_key: &str) -> (String, String) {
    (queue.to_string(), routing_key.to_string())
}

impl Store for MemoryStore {
    fn generate_id(&self) -> Result<MessageId, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn save(&self, queue: &str, routing_key: &str, message: &Message) -> Result<(), StoreError> {
        self.with_backlogs(|backlogs| {
            let backlog = backlogs.entry(key(queue, routing_key)).or_default();
            let at = backlog.partition_point(|m| m.id < message.id);
            backlog.insert(at, message.clone());
        })
    }

    fn delete(&self, queue: &str, routing_key: &str, id: MessageId) -> Result<(), StoreError> {
        self.with_backlogs(|backlogs| {
            let k = key(queue, routing_key);
            if let Some(backlog) = backlogs.get_mut(&k) {
                backlog.retain(|m| m.id != id);
                if backlog.is_empty() {
                    backlogs.remove(&k);
                }
            }
        })
    }

    fn pop(&self, queue: &str, routing_key: &str) -> Result<(), StoreError> {
        self.with_backlogs(|backlogs| {
            let k = key(queue, routing_key);
            if let Some(backlog) = backlogs.get_mut(&k) {
                backlog.pop_front();
                if backlog.is_empty() {
                    backlogs.remove(&k);
                }
            }
        })
    }

    fn front(&self, queue: &str, routing_key: &str) -> Result<Option<Message>, StoreError> {
        self.with_backlogs(|backlogs| {
            backlogs
                .get(&key(queue, routing_key))
                .and_then(|backlog| backlog.front().cloned())
        })
    }

    fn back(&self, queue: &str, routing_key: &str) -> Result<Option<Message>, StoreError> {
        self.with_backlogs(|backlogs| {
            backlogs
                .get(&key(queue, routing_key))
                .and_then(|backlog| backlog.back().cloned())
        })
    }

    fn len(&self, queue: &str, routing_key: &str) -> Result<usize, StoreError> {
        self.with_backlogs(|backlogs| {
            backlogs
                .get(&key(queue, routing_key))
                .map_or(0, VecDeque::len)
        })
    }
}
