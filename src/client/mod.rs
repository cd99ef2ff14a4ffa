//! The `client` module defines the server-side state of one connection.
//!
//! It provides the `Client` struct, which holds the connection's identity,
//! its authentication state and the channels it has bound, and `Outbound`,
//! the write half route queues push deliveries through.

pub mod pubsub_client;
pub use pubsub_client::{Client, Outbound};
