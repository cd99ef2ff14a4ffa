//! Queue registry
//!
//! Maps (queue, routing key) to its live route queue, creating routes on
//! first use. Routes deregister themselves when they go idle or their worker
//! dies; `delete` only removes the exact instance asking, so a retiring
//! route can never evict its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::broker::route_queue::{RouteKey, RouteQueue, RouteSettings};
use crate::persistence::Store;

pub struct QueueRegistry {
    routes: Mutex<HashMap<RouteKey, RouteQueue>>,
    store: Arc<dyn Store>,
    settings: RouteSettings,
    next_instance: AtomicU64,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn Store>, settings: RouteSettings) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            store,
            settings,
            next_instance: AtomicU64::new(1),
        })
    }

    /// Live route for (queue, routing key), started if absent.
    pub fn get(self: &Arc<Self>, queue: &str, routing_key: &str) -> RouteQueue {
        let key = RouteKey::new(queue, routing_key);
        let mut routes = self.lock();

        if let Some(route) = routes.get(&key) {
            return route.clone();
        }

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let route = RouteQueue::spawn(
            key.clone(),
            instance,
            Arc::clone(&self.store),
            self.settings.clone(),
            Arc::downgrade(self),
        );
        routes.insert(key, route.clone());
        route
    }

    /// Live route for (queue, routing key), if one is registered.
    pub fn lookup(&self, queue: &str, routing_key: &str) -> Option<RouteQueue> {
        self.lock()
            .get(&RouteKey::new(queue, routing_key))
            .cloned()
    }

    /// Deregister `key` if it still maps to `instance`.
    pub fn delete(&self, key: &RouteKey, instance: u64) -> bool {
        let mut routes = self.lock();
        match routes.get(key) {
            Some(route) if route.instance() == instance => {
                routes.remove(key);
                debug!(route = %key, instance, "route deregistered");
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &RouteSettings {
        &self.settings
    }

    // The map stays consistent across a panic: every critical section is a
    // single insert or remove.
    fn lock(&self) -> MutexGuard<'_, HashMap<RouteKey, RouteQueue>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
