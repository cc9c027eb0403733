use crate::error::Result;
use crate::manager::ManagerHandle;
use crate::protocol::{Protocol, ProtocolCategory, ProtocolId, ProtocolState};
use crate::transport::{PeerHandle, PeerId};

/// What a protocol gets to talk back to its manager.
///
/// Passed into every protocol callback. Lifecycle requests made through it are
/// queued and applied on the next synchronous cycle; sends go straight to the
/// transport with this protocol's category as routing header.
#[derive(Clone)]
pub struct ProtocolContext {
    id: ProtocolId,
    category: ProtocolCategory,
    handle: ManagerHandle,
}

impl ProtocolContext {
    pub(crate) fn new(id: ProtocolId, category: ProtocolCategory, handle: ManagerHandle) -> Self {
        Self {
            id,
            category,
            handle,
        }
    }

    pub fn id(&self) -> ProtocolId {
        self.id
    }

    pub fn category(&self) -> ProtocolCategory {
        self.category
    }

    /// Handle usable outside of protocol callbacks, e.g. from completion
    /// callbacks fired on another thread.
    pub fn handle(&self) -> &ManagerHandle {
        &self.handle
    }

    pub fn request_pause(&self) -> Result<()> {
        self.handle.pause(self.id)
    }

    pub fn request_unpause(&self) -> Result<()> {
        self.handle.unpause(self.id)
    }

    pub fn request_terminate(&self) -> Result<()> {
        self.handle.terminate(self.id)
    }

    /// Start another protocol (e.g. a sub-protocol this one depends on).
    pub fn request_start(&self, protocol: Box<dyn Protocol>) -> Result<ProtocolId> {
        self.handle.start(protocol)
    }

    pub fn state_of(&self, id: ProtocolId) -> ProtocolState {
        self.handle.state_of(id)
    }

    pub fn peers(&self) -> Vec<PeerHandle> {
        self.handle.peers()
    }

    pub fn send(&self, peer: PeerId, message: &[u8], reliable: bool) -> Result<()> {
        self.handle.send_message(self.category, peer, message, reliable)
    }

    pub fn send_to_all(&self, message: &[u8], reliable: bool) -> Result<()> {
        self.handle.send_to_all(self.category, message, reliable)
    }

    pub fn send_to_all_except(&self, peer: PeerId, message: &[u8], reliable: bool) -> Result<()> {
        self.handle.send_to_all_except(self.category, peer, message, reliable)
    }

    /// Send one message per connected peer, each framed with that peer's own
    /// session token. Returns how many peers were reached.
    pub fn send_to_peers_with_token(&self, message_type: u8, payload: &[u8]) -> Result<usize> {
        self.handle.send_to_peers_with_token(self.category, message_type, payload)
    }
}
