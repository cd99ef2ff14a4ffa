//! The `transport` module is responsible for handling network communication
//! with clients over WebSockets.
//!
//! It defines the JSON frames exchanged with peers and implements the
//! WebSocket server: one read loop and one writer task per connection,
//! keepalive enforcement, optional password authentication, and the
//! mapping from client requests to broker calls.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use websocket::{handle_client_message, serve, start_websocket_server};

#[cfg(test)]
mod tests;
