//! The `persistence` module holds route backlogs.
//!
//! Every backend implements [`Store`]: an ordered, id-keyed backlog per
//! (queue, routing key) plus a store-wide id generator. Backends are opened
//! by name through [`StoreDrivers`], driven by the `store.driver` setting.
//!
//! - `memory`: process-local, lost on restart.
//! - `sled`: embedded key-value store, one tree per route.

pub mod memory_store;
pub mod sled_store;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::broker::message::{CodecError, Message, MessageId};
use crate::config::StoreSettings;

pub use memory_store::MemoryStore;
pub use sled_store::SledStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt message: {0}")]
    Codec(#[from] CodecError),

    #[error("store driver '{0}' has not been registered")]
    UnknownDriver(String),

    #[error("store driver '{0}' has already been registered")]
    DuplicateDriver(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Backlog storage shared by every route queue.
///
/// Implementations synchronize internally; route queue workers call into a
/// store concurrently from different tasks.
pub trait Store: Send + Sync {
    /// Next message id. Unique and increasing for the lifetime of the store.
    fn generate_id(&self) -> Result<MessageId, StoreError>;

    /// Append `message` to the route's backlog.
    fn save(&self, queue: &str, routing_key: &str, message: &Message) -> Result<(), StoreError>;

    /// Remove the message with `id`. Missing ids are not an error.
    fn delete(&self, queue: &str, routing_key: &str, id: MessageId) -> Result<(), StoreError>;

    /// Drop the oldest message, if any.
    fn pop(&self, queue: &str, routing_key: &str) -> Result<(), StoreError>;

    /// Oldest message still in the backlog.
    fn front(&self, queue: &str, routing_key: &str) -> Result<Option<Message>, StoreError>;

    /// Newest message in the backlog.
    fn back(&self, queue: &str, routing_key: &str) -> Result<Option<Message>, StoreError>;

    fn len(&self, queue: &str, routing_key: &str) -> Result<usize, StoreError>;

    fn is_empty(&self, queue: &str, routing_key: &str) -> Result<bool, StoreError> {
        Ok(self.len(queue, routing_key)? == 0)
    }
}

type StoreConstructor = fn(&StoreSettings) -> Result<Arc<dyn Store>, StoreError>;

/// Named store constructors.
pub struct StoreDrivers {
    drivers: HashMap<String, StoreConstructor>,
}

impl StoreDrivers {
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, open: StoreConstructor) -> Result<(), StoreError> {
        if self.drivers.contains_key(name) {
            return Err(StoreError::DuplicateDriver(name.to_string()));
        }
        self.drivers.insert(name.to_string(), open);
        Ok(())
    }

    pub fn open(&self, settings: &StoreSettings) -> Result<Arc<dyn Store>, StoreError> {
        let open = self
            .drivers
            .get(&settings.driver)
            .ok_or_else(|| StoreError::UnknownDriver(settings.driver.clone()))?;
        open(settings)
    }
}

impl Default for StoreDrivers {
    fn default() -> Self {
        let mut drivers = Self::empty();
        drivers.drivers.insert("memory".to_string(), |_| {
            Ok(Arc::new(MemoryStore::new()) as Arc<dyn Store>)
        });
        drivers.drivers.insert("sled".to_string(), |settings| {
            Ok(Arc::new(SledStore::open(&settings.path)?) as Arc<dyn Store>)
        });
        drivers
    }
}

/// Open the backend named by `settings.driver` from the built-in drivers.
pub fn open_store(settings: &StoreSettings) -> Result<Arc<dyn Store>, StoreError> {
    StoreDrivers::default().open(settings)
}

#[cfg(test)]
mod tests;
