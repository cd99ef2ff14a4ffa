//! # RouteMQ
//!
//! `routemq` is a lightweight message broker built with Rust. Publishers send
//! messages to a (queue, routing key); subscribers bind to one and receive
//! them with at-least-once delivery, one unacknowledged message at a time.
//! Messages are either direct (round-robin to one subscriber) or fanout (to
//! every subscriber). Clients talk JSON over WebSockets.
//!
//! ## Core Modules
//!
//! - `broker`: route queues, the registry that owns them, subscriber channels
//!   and the `Broker` facade.
//! - `client`: server-side state of one connection.
//! - `config`: loading and validating server configuration.
//! - `persistence`: the `Store` trait and its in-memory and `sled` backends.
//! - `transport`: the WebSocket server and wire protocol.
//! - `utils`: shared error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;
