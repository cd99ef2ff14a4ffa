//! Error types shared by the broker, the transport and the binary.
//!
//! `TransportError` stays local to a single subscriber channel (the route
//! queue evicts the channel). `BrokerError` is what a connection handler
//! turns into an `error` frame for its own peer.

use thiserror::Error;

use crate::persistence::StoreError;

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_INTERNAL: u16 = 500;
pub const STATUS_UNAVAILABLE: u16 = 503;

/// Failure to hand a message to a subscriber connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(String),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{message}")]
    Protocol { code: u16, message: String },

    /// The route queue behind a binding is gone; the peer must rebind.
    #[error("route {0} is closed")]
    RouteClosed(String),

    #[error("queue {0} is not bound on this connection")]
    NotBound(String),
}

impl BrokerError {
    pub fn protocol(code: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::protocol(STATUS_BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::protocol(STATUS_FORBIDDEN, message)
    }

    /// Status code reported to the peer in an `error` frame.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol { code, .. } => *code,
            Self::Store(_) => STATUS_INTERNAL,
            Self::RouteClosed(_) => STATUS_UNAVAILABLE,
            Self::NotBound(_) => STATUS_FORBIDDEN,
        }
    }
}
