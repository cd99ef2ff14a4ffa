//! Message envelope
//!
//! `Message` is the immutable unit the broker routes. It is owned by the
//! store until acknowledged or expired; route queues and channels only read
//! it while a delivery is in flight.
//!
//! The binary envelope (big-endian) is:
//!
//! ```text
//! | total_len u32 | id i64 | created_at i64 | type u8 | key_len u16 | routing key | body |
//! ```
//!
//! `total_len` covers the whole buffer, header included.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub type MessageId = i64;

const HEADER_LEN: usize = 4 + 8 + 8 + 1 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishType {
    /// Delivered to exactly one subscriber, round-robin.
    Direct,
    /// Delivered to every bound subscriber.
    Fanout,
}

impl PublishType {
    fn as_byte(self) -> u8 {
        match self {
            PublishType::Direct => 0,
            PublishType::Fanout => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self, CodecError> {
        match b {
            0 => Ok(PublishType::Direct),
            1 => Ok(PublishType::Fanout),
            other => Err(CodecError::PublishType(other)),
        }
    }
}

impl FromStr for PublishType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(PublishType::Direct),
            "fanout" => Ok(PublishType::Fanout),
            _ => Err(format!("invalid publish type {s}")),
        }
    }
}

impl fmt::Display for PublishType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishType::Direct => f.write_str("direct"),
            PublishType::Fanout => f.write_str("fanout"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: {0} bytes")]
    TooShort(usize),

    #[error("length prefix {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown publish type {0}")]
    PublishType(u8),

    #[error("routing key is not valid utf-8")]
    RoutingKey,

    #[error("message too large to encode")]
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Milliseconds since the UNIX epoch.
    pub created_at: i64,
    pub publish_type: PublishType,
    pub routing_key: String,
    pub body: Bytes,
}

impl Message {
    /// Build a message stamped with the current time.
    pub fn new(
        id: MessageId,
        publish_type: PublishType,
        routing_key: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            id,
            created_at: chrono::Utc::now().timestamp_millis(),
            publish_type,
            routing_key: routing_key.into(),
            body: body.into(),
        }
    }

    /// True once the message has sat in the backlog longer than `timeout_ms`.
    pub fn is_expired(&self, now_ms: i64, timeout_ms: i64) -> bool {
        self.created_at.saturating_add(timeout_ms) < now_ms
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let key = self.routing_key.as_bytes();
        let key_len = u16::try_from(key.len()).map_err(|_| CodecError::TooLarge)?;
        let total = HEADER_LEN + key.len() + self.body.len();
        let total_len = u32::try_from(total).map_err(|_| CodecError::TooLarge)?;

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(total_len);
        buf.put_i64(self.id);
        buf.put_i64(self.created_at);
        buf.put_u8(self.publish_type.as_byte());
        buf.put_u16(key_len);
        buf.put_slice(key);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() < HEADER_LEN {
            return Err(CodecError::TooShort(raw.len()));
        }

        let mut buf = raw;
        let declared = buf.get_u32() as usize;
        if declared != raw.len() {
            return Err(CodecError::LengthMismatch {
                declared,
                actual: raw.len(),
            });
        }

        let id = buf.get_i64();
        let created_at = buf.get_i64();
        let publish_type = PublishType::from_byte(buf.get_u8())?;
        let key_len = buf.get_u16() as usize;
        if buf.remaining() < key_len {
            return Err(CodecError::TooShort(raw.len()));
        }

        let routing_key = std::str::from_utf8(&buf[..key_len])
            .map_err(|_| CodecError::RoutingKey)?
            .to_string();
        buf.advance(key_len);

        Ok(Self {
            id,
            created_at,
            publish_type,
            routing_key,
            body: Bytes::copy_from_slice(buf),
        })
    }
}
