//! # Transport Layer
//!
//! The seam between the protocol manager and the network.
//!
//! The manager never assumes a concrete transport. It needs to send bytes to
//! one peer, to every peer or to every peer but one, and to poll for inbound
//! events without blocking. Transports own their [`Peer`] objects and hand out
//! [`PeerHandle`]s, which stop resolving once the peer disconnects.
//!
//! ## Implementations
//! - **Memory**: in-process transport with inspectable outboxes
//! - **UDP**: datagram transport on a Tokio socket
//!
//! ## Reliability
//! The `reliable` flag is forwarded as given. Whether it is honored is up to
//! the transport; the UDP transport treats it as advisory.

pub mod memory;
pub mod peer;
pub mod udp;

pub use memory::{MemoryTransport, SentPacket};
pub use peer::{Peer, PeerHandle, PeerId};
pub use udp::UdpTransport;

use crate::error::{ProtocolError, Result};
use crate::protocol::RawEvent;
use tracing::warn;

/// Operations the protocol manager needs from the network.
pub trait Transport: Send + Sync {
    /// Send to a single peer.
    fn send(&self, peer: PeerId, data: &[u8], reliable: bool) -> Result<()>;

    /// Drain whatever arrived since the last call. Must not block.
    fn poll_inbound_events(&self) -> Vec<RawEvent>;

    /// Currently connected peers
    fn peers(&self) -> Vec<PeerHandle>;

    fn peer(&self, id: PeerId) -> Option<PeerHandle> {
        self.peers().into_iter().find(|peer| peer.id() == id)
    }

    /// Send to every connected peer. Every peer is attempted; the first
    /// failure is reported.
    fn send_to_all(&self, data: &[u8], reliable: bool) -> Result<()> {
        broadcast(self, None, data, reliable)
    }

    /// Send to every connected peer except `except`.
    fn send_to_all_except(&self, except: PeerId, data: &[u8], reliable: bool) -> Result<()> {
        broadcast(self, Some(except), data, reliable)
    }
}

fn broadcast<T: Transport + ?Sized>(
    transport: &T,
    except: Option<PeerId>,
    data: &[u8],
    reliable: bool,
) -> Result<()> {
    let mut first_error: Option<ProtocolError> = None;
    for peer in transport.peers() {
        if Some(peer.id()) == except {
            continue;
        }
        if let Err(e) = transport.send(peer.id(), data, reliable) {
            warn!(peer = %peer.id(), error = %e, "Broadcast send failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
