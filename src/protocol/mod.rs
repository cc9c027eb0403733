//! # Protocols
//!
//! A protocol is a self-contained unit of session behavior (connecting to a
//! server, discovering the public address, relaying in-game events, ...).
//! Application code builds a protocol, hands it to the
//! [`ProtocolManager`](crate::manager::ProtocolManager) and from then on only
//! talks to it through lifecycle requests.
//!
//! ## Lifecycle
//! ```text
//! Initializing -> Running <-> Paused -> Terminated
//! ```
//! A protocol never changes its own state. It asks the manager through its
//! [`ProtocolContext`], and the manager applies the request during its next
//! synchronous cycle.
//!
//! ## Routing
//! Every protocol declares a [`ProtocolCategory`]. Inbound messages carry the
//! category of the protocol that sent them and are delivered to the local
//! protocols of the same category only.

pub mod context;
pub mod event;
pub mod request;

pub use context::ProtocolContext;
pub use event::{EventKind, InboundEvent, RawEvent};
pub use request::{LifecycleRequest, RequestKind, TerminationCallback};

use std::fmt;
use std::time::Duration;

/// Identifier assigned by the manager when a protocol is started.
///
/// Ids are allocated in strictly increasing order and never reused while the
/// manager lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolId(u32);

impl ProtocolId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolState {
    /// Waiting for its start request to be applied
    Initializing = 0,
    /// Updated every cycle and receiving events
    Running = 1,
    /// Neither updated nor receiving events
    Paused = 2,
    /// Finished; the manager no longer knows about it
    Terminated = 3,
}

impl ProtocolState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ProtocolState::Initializing,
            1 => ProtocolState::Running,
            2 => ProtocolState::Paused,
            _ => ProtocolState::Terminated,
        }
    }

    /// Running or paused
    pub fn is_active(self) -> bool {
        matches!(self, ProtocolState::Running | ProtocolState::Paused)
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolState::Initializing => "initializing",
            ProtocolState::Running => "running",
            ProtocolState::Paused => "paused",
            ProtocolState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Behavior category a protocol declares; drives event routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolCategory {
    /// Connection establishment with a server or client
    Connection,
    /// Public address discovery
    PublicAddress,
    LobbyRoom,
    StartGame,
    Synchronization,
    KartUpdate,
    /// In-game events (items collected, ...)
    GameEvents,
    ControllerEvents,
    /// Orderly end of a session
    Stop,
    /// Receives no routed events at all
    Silent,
}

impl ProtocolCategory {
    /// Wire byte used in the routing header
    pub fn as_byte(self) -> u8 {
        match self {
            ProtocolCategory::Connection => 0x01,
            ProtocolCategory::PublicAddress => 0x02,
            ProtocolCategory::LobbyRoom => 0x03,
            ProtocolCategory::StartGame => 0x04,
            ProtocolCategory::Synchronization => 0x05,
            ProtocolCategory::KartUpdate => 0x06,
            ProtocolCategory::GameEvents => 0x07,
            ProtocolCategory::ControllerEvents => 0x08,
            ProtocolCategory::Stop => 0x09,
            ProtocolCategory::Silent => 0xFF,
        }
    }

    /// Category from its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ProtocolCategory::Connection),
            0x02 => Some(ProtocolCategory::PublicAddress),
            0x03 => Some(ProtocolCategory::LobbyRoom),
            0x04 => Some(ProtocolCategory::StartGame),
            0x05 => Some(ProtocolCategory::Synchronization),
            0x06 => Some(ProtocolCategory::KartUpdate),
            0x07 => Some(ProtocolCategory::GameEvents),
            0x08 => Some(ProtocolCategory::ControllerEvents),
            0x09 => Some(ProtocolCategory::Stop),
            0xFF => Some(ProtocolCategory::Silent),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolCategory::Connection => "connect",
            ProtocolCategory::PublicAddress => "public-address",
            ProtocolCategory::LobbyRoom => "lobby-room",
            ProtocolCategory::StartGame => "start-game",
            ProtocolCategory::Synchronization => "synchronization",
            ProtocolCategory::KartUpdate => "kart-update",
            ProtocolCategory::GameEvents => "game-events",
            ProtocolCategory::ControllerEvents => "controller-events",
            ProtocolCategory::Stop => "stop",
            ProtocolCategory::Silent => "silent",
        }
    }

    /// Whether routed events may ever reach protocols of this category
    pub fn receives_events(self) -> bool {
        self != ProtocolCategory::Silent
    }
}

impl fmt::Display for ProtocolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability set every protocol implements.
///
/// The manager guarantees that no two methods of the same protocol instance
/// run at the same time, so implementations can keep plain mutable state.
/// None of the methods may block: they run inside the scheduling cycles.
pub trait Protocol: Send + 'static {
    /// Routing category; read once when the protocol is started.
    fn category(&self) -> ProtocolCategory;

    /// Called once, right after the protocol first enters `Running`.
    fn setup(&mut self, _ctx: &ProtocolContext) {}

    /// Called once per synchronous cycle while `Running`.
    fn update(&mut self, ctx: &ProtocolContext, delta: Duration);

    /// Called from the asynchronous cycle, independently of the tick rate.
    fn asynchronous_update(&mut self, _ctx: &ProtocolContext) {}

    /// Handle a routed event. The return value tells whether the event was
    /// fully consumed and is only used for diagnostics.
    fn on_event(&mut self, _ctx: &ProtocolContext, _event: &InboundEvent) -> bool {
        true
    }

    /// Notification that a pause request was applied.
    fn paused(&mut self, _ctx: &ProtocolContext) {}

    /// Notification that an unpause request was applied.
    fn unpaused(&mut self, _ctx: &ProtocolContext) {}

    /// Final notification before the manager drops the protocol.
    fn terminated(&mut self, _ctx: &ProtocolContext) {}

    /// Keep receiving `asynchronous_update` calls while paused.
    fn updates_while_paused(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_byte_roundtrip() {
        for category in [
            ProtocolCategory::Connection,
            ProtocolCategory::PublicAddress,
            ProtocolCategory::LobbyRoom,
            ProtocolCategory::StartGame,
            ProtocolCategory::Synchronization,
            ProtocolCategory::KartUpdate,
            ProtocolCategory::GameEvents,
            ProtocolCategory::ControllerEvents,
            ProtocolCategory::Stop,
            ProtocolCategory::Silent,
        ] {
            assert_eq!(ProtocolCategory::from_byte(category.as_byte()), Some(category));
        }
        assert_eq!(ProtocolCategory::from_byte(0x00), None);
    }

    #[test]
    fn test_state_from_u8() {
        for state in [
            ProtocolState::Initializing,
            ProtocolState::Running,
            ProtocolState::Paused,
            ProtocolState::Terminated,
        ] {
            assert_eq!(ProtocolState::from_u8(state as u8), state);
        }
        assert!(ProtocolState::Paused.is_active());
        assert!(!ProtocolState::Terminated.is_active());
    }
}
