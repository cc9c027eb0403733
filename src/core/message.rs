//! Token-framed application messages.
//!
//! Every message exchanged between protocols starts with a one byte marker
//! (`4`), followed by the peer's 32-bit session token in big-endian order, a
//! message-type byte and a type specific payload:
//!
//! ```text
//! [Marker(1)] [Token(4)] [Type(1)] [Payload(N)]
//! ```
//!
//! A frame is only considered well-formed if it is at least
//! [`TOKEN_FRAME_LEN`] bytes long, starts with [`TOKEN_MARKER`] and carries the
//! token of the peer it came from.

use crate::error::{ProtocolError, Result};
use crate::protocol::ProtocolCategory;
use bytes::{BufMut, Bytes, BytesMut};

/// Marker byte announcing a session token
pub const TOKEN_MARKER: u8 = 4;

/// Marker plus token
pub const TOKEN_FRAME_LEN: usize = 5;

/// Marker, token and message type
pub const MESSAGE_HEADER_LEN: usize = TOKEN_FRAME_LEN + 1;

/// A decoded application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMessage {
    pub token: u32,
    pub message_type: u8,
    pub payload: Bytes,
}

impl TokenMessage {
    pub fn new(token: u32, message_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            token,
            message_type,
            payload: payload.into(),
        }
    }

    /// Size of the encoded message in bytes
    #[inline]
    pub fn encoded_len(&self) -> usize {
        MESSAGE_HEADER_LEN + self.payload.len()
    }

    /// Append the wire representation to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(TOKEN_MARKER);
        dst.put_u32(self.token);
        dst.put_u8(self.message_type);
        dst.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode a message, validating the frame but not the token value.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let token = read_token(buf)?;
        if buf.len() < MESSAGE_HEADER_LEN {
            return Err(ProtocolError::Undersized {
                len: buf.len(),
                min: MESSAGE_HEADER_LEN,
            });
        }
        Ok(Self {
            token,
            message_type: buf[TOKEN_FRAME_LEN],
            payload: Bytes::copy_from_slice(&buf[MESSAGE_HEADER_LEN..]),
        })
    }

    /// Zero-copy variant of [`TokenMessage::decode`] for shared buffers.
    pub fn decode_bytes(buf: &Bytes) -> Result<Self> {
        let token = read_token(buf)?;
        if buf.len() < MESSAGE_HEADER_LEN {
            return Err(ProtocolError::Undersized {
                len: buf.len(),
                min: MESSAGE_HEADER_LEN,
            });
        }
        Ok(Self {
            token,
            message_type: buf[TOKEN_FRAME_LEN],
            payload: buf.slice(MESSAGE_HEADER_LEN..),
        })
    }
}

/// Read the session token out of a frame after checking size and marker.
pub fn read_token(buf: &[u8]) -> Result<u32> {
    if buf.len() < TOKEN_FRAME_LEN {
        return Err(ProtocolError::Undersized {
            len: buf.len(),
            min: TOKEN_FRAME_LEN,
        });
    }
    if buf[0] != TOKEN_MARKER {
        return Err(ProtocolError::InvalidMarker(buf[0]));
    }
    Ok(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]))
}

/// Validate a frame against the token the sender is expected to use.
pub fn check_frame(buf: &[u8], expected: u32) -> Result<()> {
    let actual = read_token(buf)?;
    if actual != expected {
        return Err(ProtocolError::TokenMismatch { expected, actual });
    }
    Ok(())
}

/// Prefix a message with the routing category of its sender.
pub fn with_category(category: ProtocolCategory, message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.len() + 1);
    buf.put_u8(category.as_byte());
    buf.extend_from_slice(message);
    buf.freeze()
}

/// Split the routing category off an inbound packet.
pub fn split_category(packet: &Bytes) -> Result<(ProtocolCategory, Bytes)> {
    let Some(&first) = packet.first() else {
        return Err(ProtocolError::Undersized { len: 0, min: 1 });
    };
    let category =
        ProtocolCategory::from_byte(first).ok_or(ProtocolError::UnknownCategory(first))?;
    Ok((category, packet.slice(1..)))
}
