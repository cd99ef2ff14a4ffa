//! Persistence layer backed by `sled`
//!
//! Each route gets its own tree. Keys are the big-endian message id, so a
//! forward scan yields the backlog oldest first and `first()` is the head.
//! Values are the binary message envelope. Ids come from sled's own
//! persistent generator and keep increasing across restarts.

use sled::{Db, Tree};

use super::{Store, StoreError};
use crate::broker::message::{Message, MessageId};

#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Tree name for a route. The queue length prefix keeps
    /// ("a:b", "c") and ("a", "b:c") apart.
    fn tree(&self, queue: &str, routing_key: &str) -> Result<Tree, StoreError> {
        let name = format!("route:{}:{}:{}", queue.len(), queue, routing_key);
        Ok(self.db.open_tree(name)?)
    }

    /// Force pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl Store for SledStore {
    fn generate_id(&self) -> Result<MessageId, StoreError> {
        // sled starts at 0; message ids start at 1.
        Ok(self.db.generate_id()? as MessageId + 1)
    }

    fn save(&self, queue: &str, routing_key: &str, message: &Message) -> Result<(), StoreError> {
        let tree = self.tree(queue, routing_key)?;
        let encoded = message.encode()?;
        tree.insert(message.id.to_be_bytes(), encoded.as_ref())?;
        Ok(())
    }

    fn delete(&self, queue: &str, routing_key: &str, id: MessageId) -> Result<(), StoreError> {
        self.tree(queue, routing_key)?.remove(id.to_be_bytes())?;
        Ok(())
    }

    fn pop(&self, queue: &str, routing_key: &str) -> Result<(), StoreError> {
        self.tree(queue, routing_key)?.pop_min()?;
        Ok(())
    }

    fn front(&self, queue: &str, routing_key: &str) -> Result<Option<Message>, StoreError> {
        match self.tree(queue, routing_key)?.first()? {
            Some((_, value)) => Ok(Some(Message::decode(&value)?)),
            None => Ok(None),
        }
    }

    fn back(&self, queue: &str, routing_key: &str) -> Result<Option<Message>, StoreError> {
        match self.tree(queue, routing_key)?.last()? {
            Some((_, value)) => Ok(Some(Message::decode(&value)?)),
            None => Ok(None),
        }
    }

    fn len(&self, queue: &str, routing_key: &str) -> Result<usize, StoreError> {
        Ok(self.tree(queue, routing_key)?.len())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
