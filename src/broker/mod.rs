//! The `broker` module routes messages from publishers to subscribers.
//!
//! - `message`: the message envelope and its binary encoding.
//! - `channel`: one connection's binding to a route.
//! - `route_queue`: the per-(queue, routing key) delivery actor.
//! - `registry`: live route queues by key.
//! - `engine`: the `Broker` facade connection handlers call into.

pub mod channel;
pub mod engine;
pub mod message;
pub mod registry;
pub mod route_queue;

pub use channel::{Channel, ChannelId, Delivery, Pusher};
pub use engine::Broker;
pub use message::{Message, MessageId, PublishType};
pub use registry::QueueRegistry;
pub use route_queue::{RouteKey, RouteQueue, RouteSettings, RouteStats};
