use crate::core::message::{self, TokenMessage, MESSAGE_HEADER_LEN, TOKEN_FRAME_LEN};
use crate::error::{ProtocolError, Result};
use crate::protocol::ProtocolCategory;
use crate::transport::{PeerHandle, PeerId};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What happened on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Message,
}

/// Event as produced by a transport, before routing.
///
/// For `Message` events `data` starts with the sender's category byte.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub kind: EventKind,
    pub peer: PeerHandle,
    pub data: Bytes,
}

impl RawEvent {
    pub fn connected(peer: PeerHandle) -> Self {
        Self {
            kind: EventKind::Connected,
            peer,
            data: Bytes::new(),
        }
    }

    pub fn disconnected(peer: PeerHandle) -> Self {
        Self {
            kind: EventKind::Disconnected,
            peer,
            data: Bytes::new(),
        }
    }

    pub fn message(peer: PeerHandle, data: impl Into<Bytes>) -> Self {
        Self {
            kind: EventKind::Message,
            peer,
            data: data.into(),
        }
    }
}

/// A routed event as protocols see it.
///
/// Message events have already passed the frame and token checks when they
/// reach [`Protocol::on_event`](crate::protocol::Protocol::on_event); `data`
/// starts at the token marker.
#[derive(Debug)]
pub struct InboundEvent {
    kind: EventKind,
    peer: PeerHandle,
    category: Option<ProtocolCategory>,
    data: Bytes,
    arrival: Instant,
}

impl InboundEvent {
    pub(crate) fn new(
        kind: EventKind,
        peer: PeerHandle,
        category: Option<ProtocolCategory>,
        data: Bytes,
    ) -> Self {
        Self {
            kind,
            peer,
            category,
            data,
            arrival: Instant::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.id()
    }

    /// Category the message was addressed to; `None` for connect/disconnect
    pub fn category(&self) -> Option<ProtocolCategory> {
        self.category
    }

    /// Raw application message, starting at the token marker
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn arrival(&self) -> Instant {
        self.arrival
    }

    pub fn age(&self) -> Duration {
        self.arrival.elapsed()
    }

    pub fn token(&self) -> Option<u32> {
        message::read_token(&self.data).ok()
    }

    pub fn message_type(&self) -> Option<u8> {
        self.data.get(TOKEN_FRAME_LEN).copied()
    }

    /// Bytes following the message type
    pub fn payload(&self) -> &[u8] {
        self.data.get(MESSAGE_HEADER_LEN..).unwrap_or(&[])
    }

    /// Decode the full message (requires a type byte).
    pub fn message(&self) -> Result<TokenMessage> {
        TokenMessage::decode_bytes(&self.data)
    }

    /// Check that the message holds at least `min_size` bytes, starts with the
    /// token marker and carries the current token of the sending peer.
    pub fn check_size_and_token(&self, min_size: usize) -> Result<()> {
        let min = min_size.max(TOKEN_FRAME_LEN);
        if self.data.len() < min {
            warn!(
                peer = %self.peer.id(),
                len = self.data.len(),
                min,
                "Receiving a badly formatted message"
            );
            return Err(ProtocolError::Undersized {
                len: self.data.len(),
                min,
            });
        }
        let expected = self
            .peer
            .session_token()
            .ok_or(ProtocolError::TokenUnset(self.peer.id()))?;
        message::check_frame(&self.data, expected).inspect_err(|e| {
            warn!(peer = %self.peer.id(), error = %e, "Peer sending bad token, request aborted");
        })
    }

    /// Check a single byte of the message.
    pub fn is_byte_correct(&self, position: usize, expected: u8) -> Result<()> {
        let actual = self.data.get(position).copied().ok_or(ProtocolError::Undersized {
            len: self.data.len(),
            min: position.saturating_add(1),
        })?;
        if actual != expected {
            info!(position, actual, expected, "Bad byte in message");
            return Err(ProtocolError::UnexpectedByte {
                position,
                expected,
                actual,
            });
        }
        Ok(())
    }
}
