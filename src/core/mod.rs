//! # Core Wire Components
//!
//! Low-level framing for application messages and datagrams.
//!
//! ## Components
//! - **Message**: token-framed application messages and the category routing header
//! - **Codec**: Tokio codec turning received datagrams into packets
//!
//! ## Wire Format
//! ```text
//! [Category(1)] [Marker = 4 (1)] [Token BE(4)] [Type(1)] [Payload(N)]
//! ```
//! The category byte is added and stripped by the protocol manager; protocols
//! only ever see the part starting at the marker.
//!
//! ## Security
//! - Every message carries the sender's session token; mismatches are dropped
//! - Datagrams above the configured maximum are rejected before decoding

pub mod codec;
pub mod message;
