use crate::error::{ProtocolError, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Bit marking the token word as set; the low 32 bits hold the token.
const TOKEN_SET: u64 = 1 << 32;

/// Stable identity of a remote endpoint for the life of its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u64);

impl PeerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// One remote endpoint. Owned by the transport.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    address: SocketAddr,
    token: AtomicU64,
    connected: AtomicBool,
}

impl Peer {
    pub fn new(id: PeerId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            token: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Current session token, if one has been negotiated
    pub fn session_token(&self) -> Option<u32> {
        let word = self.token.load(Ordering::Acquire);
        (word & TOKEN_SET != 0).then_some(word as u32)
    }

    pub fn set_session_token(&self, token: u32) {
        self.token
            .store(TOKEN_SET | u64::from(token), Ordering::Release);
    }

    /// Pick a fresh random token for this peer and make it current.
    ///
    /// Used by the side that hands out tokens during connection setup; the
    /// returned value is what has to be told to the remote end.
    pub fn renew_session_token(&self) -> u32 {
        let token = rand::random::<u32>();
        self.set_session_token(token);
        token
    }

    pub fn unset_session_token(&self) {
        self.token.store(0, Ordering::Release);
    }

    /// Compare a received token with the current session.
    pub fn verify_token(&self, actual: u32) -> Result<()> {
        match self.session_token() {
            Some(expected) if expected == actual => Ok(()),
            Some(expected) => Err(ProtocolError::TokenMismatch { expected, actual }),
            None => Err(ProtocolError::TokenUnset(self.id)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Called by the transport once the connection is gone.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.unset_session_token();
    }

    pub fn handle(self: &Arc<Self>) -> PeerHandle {
        PeerHandle {
            id: self.id,
            peer: Arc::downgrade(self),
        }
    }
}

/// Non-owning reference to a peer.
///
/// Valid while the transport keeps the peer; after a disconnect every
/// accessor reports the peer as gone.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    peer: Weak<Peer>,
}

impl PeerHandle {
    /// Handle that never resolves, for events about peers already released
    pub fn detached(id: PeerId) -> Self {
        Self {
            id,
            peer: Weak::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Arc<Peer>> {
        self.peer.upgrade().filter(|peer| peer.is_connected())
    }

    pub fn is_connected(&self) -> bool {
        self.upgrade().is_some()
    }

    pub fn session_token(&self) -> Option<u32> {
        self.upgrade().and_then(|peer| peer.session_token())
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.upgrade().map(|peer| peer.address())
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Arc<Peer> {
        Arc::new(Peer::new(PeerId::new(1), "127.0.0.1:2757".parse().unwrap()))
    }

    #[test]
    fn test_token_lifecycle() {
        let peer = peer();
        assert_eq!(peer.session_token(), None);
        assert!(matches!(peer.verify_token(0), Err(ProtocolError::TokenUnset(_))));

        peer.set_session_token(0);
        assert_eq!(peer.session_token(), Some(0));
        assert!(peer.verify_token(0).is_ok());

        peer.set_session_token(u32::MAX);
        assert!(matches!(
            peer.verify_token(7),
            Err(ProtocolError::TokenMismatch {
                expected: u32::MAX,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_renewed_token_becomes_current() {
        let peer = peer();
        let token = peer.renew_session_token();
        assert_eq!(peer.session_token(), Some(token));
        assert!(peer.verify_token(token).is_ok());
    }

    #[test]
    fn test_handle_invalidated_on_disconnect() {
        let peer = peer();
        peer.set_session_token(9);
        let handle = peer.handle();
        assert_eq!(handle.session_token(), Some(9));

        peer.mark_disconnected();
        assert!(!handle.is_connected());
        assert_eq!(handle.session_token(), None);
        assert_eq!(handle.id(), PeerId::new(1));
    }

    #[test]
    fn test_handle_invalidated_on_drop() {
        let peer = peer();
        let handle = peer.handle();
        drop(peer);
        assert!(handle.upgrade().is_none());
    }
}
