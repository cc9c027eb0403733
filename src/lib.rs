//! # Session Protocol
//!
//! Protocol orchestration for real-time multiplayer sessions.
//!
//! A session is made of small, independent protocols (connecting, lobby,
//! synchronization, in-game events, ...). The [`ProtocolManager`] owns them,
//! moves them through their lifecycle and routes network events to them.
//!
//! ## Driving a manager
//! - Call [`ProtocolManager::run_synchronous_cycle`] once per simulation tick.
//! - Call [`ProtocolManager::run_asynchronous_cycle`] as often as network input
//!   warrants, or let [`ProtocolManager::spawn_asynchronous_loop`] do it.
//!
//! ## Example
//! ```
//! use session_protocol::protocols::GameEventsProtocol;
//! use session_protocol::{ManagerConfig, MemoryTransport, ProtocolManager, ProtocolState};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let manager = ProtocolManager::new(ManagerConfig::default(), transport);
//!
//! let (protocol, _events) = GameEventsProtocol::channel();
//! let id = manager.start(Box::new(protocol)).unwrap();
//! assert_eq!(manager.state_of(id), ProtocolState::Initializing);
//!
//! manager.run_synchronous_cycle(Duration::from_millis(16)).unwrap();
//! assert_eq!(manager.state_of(id), ProtocolState::Running);
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod core;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod protocols;
pub mod transport;
pub mod utils;

pub use config::ManagerConfig;
pub use error::{ProtocolError, Result};
pub use manager::{AsyncRunner, ManagerHandle, ProtocolManager};
pub use protocol::{
    EventKind, InboundEvent, Protocol, ProtocolCategory, ProtocolContext, ProtocolId,
    ProtocolState, RawEvent,
};
pub use transport::{MemoryTransport, PeerHandle, PeerId, Transport, UdpTransport};
