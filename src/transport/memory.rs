//! In-process transport.
//!
//! Keeps every sent packet in an outbox and lets the embedding code inject
//! inbound events, which makes it the transport of choice for tests, replays
//! and local single-process sessions.

use crate::core::message::{with_category, TokenMessage};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{ProtocolCategory, RawEvent};
use crate::transport::{Peer, PeerHandle, PeerId, Transport};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// A packet handed to the memory transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub peer: PeerId,
    pub data: Bytes,
    pub reliable: bool,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    peers: RwLock<BTreeMap<PeerId, Arc<Peer>>>,
    next_peer: AtomicU64,
    inbound: Mutex<VecDeque<RawEvent>>,
    sent: Mutex<Vec<SentPacket>>,
    fail_sends: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and queue its `Connected` event.
    pub fn connect(&self, address: SocketAddr) -> PeerHandle {
        let id = PeerId::new(self.next_peer.fetch_add(1, Ordering::Relaxed) + 1);
        let peer = Arc::new(Peer::new(id, address));
        let handle = peer.handle();
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, peer);
        self.push_inbound(RawEvent::connected(handle.clone()));
        debug!(peer = %id, %address, "Memory peer connected");
        handle
    }

    /// Register a peer with an already negotiated session token.
    pub fn connect_with_token(&self, address: SocketAddr, token: u32) -> PeerHandle {
        let handle = self.connect(address);
        if let Some(peer) = handle.upgrade() {
            peer.set_session_token(token);
        }
        handle
    }

    /// Drop a peer and queue its `Disconnected` event.
    pub fn disconnect(&self, id: PeerId) -> Result<()> {
        let peer = self
            .peers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .remove(&id)
            .ok_or(ProtocolError::UnknownPeer(id))?;
        peer.mark_disconnected();
        self.push_inbound(RawEvent::disconnected(peer.handle()));
        debug!(peer = %id, "Memory peer disconnected");
        Ok(())
    }

    /// Queue raw inbound bytes (routing header included) from a peer.
    pub fn inject(&self, peer: PeerId, data: impl Into<Bytes>) -> Result<()> {
        let handle = self.peer(peer).ok_or(ProtocolError::UnknownPeer(peer))?;
        self.push_inbound(RawEvent::message(handle, data));
        Ok(())
    }

    /// Queue a framed message addressed to `category`.
    pub fn inject_message(
        &self,
        peer: PeerId,
        category: ProtocolCategory,
        message: &TokenMessage,
    ) -> Result<()> {
        self.inject(peer, with_category(category, &message.encode()))
    }

    /// Everything sent since the last call
    pub fn take_sent(&self) -> Vec<SentPacket> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Make every subsequent send fail, to exercise error paths.
    pub fn set_send_failure(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    fn push_inbound(&self, event: RawEvent) {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, peer: PeerId, data: &[u8], reliable: bool) -> Result<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(ProtocolError::TransportError(
                "memory transport configured to fail".to_string(),
            ));
        }
        let connected = self
            .peers
            .read()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .get(&peer)
            .is_some_and(|p| p.is_connected());
        if !connected {
            debug!(peer = %peer, "{}", constants::ERR_PEER_GONE);
            return Err(ProtocolError::PeerDisconnected(peer));
        }
        self.sent
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .push(SentPacket {
                peer,
                data: Bytes::copy_from_slice(data),
                reliable,
            });
        Ok(())
    }

    fn poll_inbound_events(&self) -> Vec<RawEvent> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    fn peers(&self) -> Vec<PeerHandle> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Peer::handle)
            .collect()
    }

    fn peer(&self, id: PeerId) -> Option<PeerHandle> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(Peer::handle)
    }
}
