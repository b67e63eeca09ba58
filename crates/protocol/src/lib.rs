//! # Protocol - ShardKV wire format
//!
//! Every exchange between a client and a ShardKV server is a [`Message`]:
//! a fixed 20-byte header followed by the key and value payloads. The same
//! shape carries requests (`op` meaningful) and responses (`status`
//! meaningful, `op` echoed).
//!
//! ## Frame layout
//!
//! ```text
//! | 0             | 1             | 2             | 3             |
//! +---------------+---------------+---------------+---------------+
//! | OP            | STATUS        | KEY LEN (u16 BE)              |
//! | VALUE LEN (u64 BE)                                            |
//! |                                                               |
//! | EXPIRES (u64 BE, unix seconds, 0 = never)                     |
//! |                                                               |
//! +---------------------------------------------------------------+
//!   KEY   (KEY LEN bytes, UTF-8)
//!   VALUE (VALUE LEN bytes)
//! ```
//!
//! This crate also defines the persisted [`Manifest`] shape, since it is the
//! other format that outlives a single process.
//!
//! ## Example
//!
//! ```rust
//! use protocol::{Message, Op};
//!
//! let req = Message::request(Op::Set, "greeting", b"hello".to_vec());
//! let mut wire = Vec::new();
//! req.write_to(&mut wire).unwrap();
//! let back = Message::read_from(&mut wire.as_slice()).unwrap();
//! assert_eq!(back, req);
//! ```

mod manifest;
mod message;

pub use manifest::{BlockManifest, Manifest, PartManifest};
pub use message::{Header, Message, HEADER_LEN, MAX_KEY_LEN};

use std::io;
use thiserror::Error;

/// Request operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Close = 0,
    Set = 1,
    Get = 2,
    Del = 3,
    List = 4,
    Count = 5,
    Ping = 6,
}

impl Op {
    /// Decodes a raw op byte, `None` for codes this server does not know.
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Op::Close,
            1 => Op::Set,
            2 => Op::Get,
            3 => Op::Del,
            4 => Op::List,
            5 => Op::Count,
            6 => Op::Ping,
            _ => return None,
        })
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error = 1,
    NotFound = 2,
    /// Terminates a multi-message response such as a key listing.
    StreamEnd = 3,
}

impl Status {
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Status::Ok,
            1 => Status::Error,
            2 => Status::NotFound,
            3 => Status::StreamEnd,
            _ => return None,
        })
    }
}

/// Errors that can occur while framing a [`Message`].
///
/// Any of these leaves the stream at an unknown offset; the connection must
/// be dropped rather than resynchronized.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream before sending any header byte.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended part way through the 20-byte header.
    #[error("truncated header: read {read} of 20 bytes")]
    TruncatedHeader { read: usize },

    /// The stream ended before the announced key or value was complete.
    #[error("truncated payload: read {read} of {expected} bytes")]
    TruncatedPayload { expected: u64, read: u64 },

    /// The key does not fit the 16-bit length field.
    #[error("key too long: {0} bytes (max 65535)")]
    KeyTooLong(usize),

    /// The announced value length cannot be addressed on this platform.
    #[error("value too large: {0} bytes")]
    ValueTooLarge(u64),

    /// The key bytes are not valid UTF-8.
    #[error("key is not valid utf-8")]
    InvalidKey,
}

#[cfg(test)]
mod tests;
