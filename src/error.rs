//! # Error Types
//!
//! Error handling for the protocol orchestration core.
//!
//! Most failures in this crate are *per event* or *per request*: a malformed
//! datagram, a stale session token or a request aimed at a protocol that is
//! already gone. Those are logged and dropped inside the scheduling cycles and
//! never abort processing of other protocols. The variants below are what
//! callers see when they invoke the public API directly (decoding a message,
//! sending through a transport, loading configuration).
//!
//! ## Error Categories
//! - **Framing Errors**: undersized messages, bad marker byte, unknown types
//! - **Session Errors**: token mismatch, unset token, unknown or disconnected peers
//! - **Lifecycle Errors**: stopped manager, exhausted id space
//! - **Transport Errors**: send failures, oversized packets, socket I/O
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use session_protocol::core::message::TokenMessage;
//! use session_protocol::error::ProtocolError;
//!
//! match TokenMessage::decode(&[4, 0, 0]) {
//!     Err(ProtocolError::Undersized { len, min }) => assert!(len < min),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use crate::transport::PeerId;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Manager-related error messages
    pub const ERR_INDEX_READ_LOCK: &str = "Failed to acquire read lock on protocol index";
    pub const ERR_REQUEST_QUEUE: &str = "Lifecycle request queue is closed";
    pub const ERR_EVENT_QUEUE: &str = "Inbound event queue is closed";

    /// Validation errors
    pub const ERR_BAD_TOKEN: &str = "Peer sent a token that does not match its session";
    pub const ERR_UNKNOWN_TYPE: &str = "Unknown message type";

    /// Transport errors
    pub const ERR_PEER_GONE: &str = "Peer is no longer connected";
    pub const ERR_SEND_WOULD_BLOCK: &str = "Socket not ready for sending";
    pub const ERR_PEER_TABLE_FULL: &str = "Peer table is full";
}

/// Primary error type for all orchestration operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Message too short: {len} bytes (minimum {min})")]
    Undersized { len: usize, min: usize },

    #[error("Invalid message marker: {0:#04x}")]
    InvalidMarker(u8),

    #[error("Session token mismatch: expected {expected:#010x}, got {actual:#010x}")]
    TokenMismatch { expected: u32, actual: u32 },

    #[error("Peer {0} has no session token")]
    TokenUnset(PeerId),

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Unknown protocol category: {0:#04x}")]
    UnknownCategory(u8),

    #[error("Unexpected byte at position {position}: {actual} (expected {expected})")]
    UnexpectedByte {
        position: usize,
        expected: u8,
        actual: u8,
    },

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer {0} disconnected")]
    PeerDisconnected(PeerId),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,

    #[error("Protocol manager is stopped")]
    ManagerStopped,

    #[error("Protocol id space exhausted")]
    IdsExhausted,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// True for the per-event validation failures that the dispatch path drops
    /// after logging (malformed frame, token mismatch, unknown type).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtocolError::Undersized { .. }
                | ProtocolError::InvalidMarker(_)
                | ProtocolError::TokenMismatch { .. }
                | ProtocolError::TokenUnset(_)
                | ProtocolError::UnknownMessageType(_)
                | ProtocolError::UnknownCategory(_)
                | ProtocolError::UnexpectedByte { .. }
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
