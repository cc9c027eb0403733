use crate::protocol::{Protocol, ProtocolCategory, ProtocolId, ProtocolState, TerminationCallback};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-protocol storage shared between the index and in-flight cycles.
///
/// The protocol mutex is what sequences calls into one protocol: every call
/// and every state change happens while holding it. The state itself is kept
/// in an atomic so that queries never wait for a protocol callback to return.
pub(crate) struct ProtocolSlot {
    state: AtomicU8,
    protocol: Mutex<Box<dyn Protocol>>,
    on_terminated: Mutex<Option<TerminationCallback>>,
}

impl ProtocolSlot {
    fn new(protocol: Box<dyn Protocol>, on_terminated: Option<TerminationCallback>) -> Self {
        Self {
            state: AtomicU8::new(ProtocolState::Initializing as u8),
            protocol: Mutex::new(protocol),
            on_terminated: Mutex::new(on_terminated),
        }
    }

    pub(crate) fn state(&self) -> ProtocolState {
        ProtocolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Only called with the protocol lock held.
    pub(crate) fn set_state(&self, state: ProtocolState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// A panic inside a protocol callback poisons the mutex; the protocol's
    /// own state is still the best we have, so keep using it.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn Protocol>> {
        self.protocol.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn take_callback(&self) -> Option<TerminationCallback> {
        self.on_terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Bookkeeping for one active protocol: `{id, state, protocol}`.
#[derive(Clone)]
pub(crate) struct ProtocolRecord {
    pub(crate) id: ProtocolId,
    pub(crate) category: ProtocolCategory,
    pub(crate) slot: Arc<ProtocolSlot>,
}

impl ProtocolRecord {
    pub(crate) fn new(
        id: ProtocolId,
        protocol: Box<dyn Protocol>,
        on_terminated: Option<TerminationCallback>,
    ) -> Self {
        Self {
            id,
            category: protocol.category(),
            slot: Arc::new(ProtocolSlot::new(protocol, on_terminated)),
        }
    }

    pub(crate) fn state(&self) -> ProtocolState {
        self.slot.state()
    }
}
