//! Shared fixtures for the integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use session_protocol::protocol::{EventKind, InboundEvent, ProtocolCategory, ProtocolContext};
use session_protocol::{ManagerConfig, MemoryTransport, Protocol, ProtocolManager};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TICK: Duration = Duration::from_millis(16);

/// One observed call into a protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Setup,
    Update,
    AsyncUpdate,
    Event(EventKind, Vec<u8>),
    Paused,
    Unpaused,
    Terminated,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Protocol that records every call it receives
pub struct Recorder {
    category: ProtocolCategory,
    log: CallLog,
    async_while_paused: bool,
}

impl Recorder {
    pub fn new(category: ProtocolCategory) -> (Self, CallLog) {
        let log = CallLog::default();
        (
            Self {
                category,
                log: log.clone(),
                async_while_paused: false,
            },
            log,
        )
    }

    pub fn updating_while_paused(mut self) -> Self {
        self.async_while_paused = true;
        self
    }

    fn push(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

impl Protocol for Recorder {
    fn category(&self) -> ProtocolCategory {
        self.category
    }

    fn setup(&mut self, _ctx: &ProtocolContext) {
        self.push(Call::Setup);
    }

    fn update(&mut self, _ctx: &ProtocolContext, _delta: Duration) {
        self.push(Call::Update);
    }

    fn asynchronous_update(&mut self, _ctx: &ProtocolContext) {
        self.push(Call::AsyncUpdate);
    }

    fn on_event(&mut self, _ctx: &ProtocolContext, event: &InboundEvent) -> bool {
        self.push(Call::Event(event.kind(), event.data().to_vec()));
        true
    }

    fn paused(&mut self, _ctx: &ProtocolContext) {
        self.push(Call::Paused);
    }

    fn unpaused(&mut self, _ctx: &ProtocolContext) {
        self.push(Call::Unpaused);
    }

    fn terminated(&mut self, _ctx: &ProtocolContext) {
        self.push(Call::Terminated);
    }

    fn updates_while_paused(&self) -> bool {
        self.async_while_paused
    }
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn manager() -> (ProtocolManager, Arc<MemoryTransport>) {
    manager_with(ManagerConfig::default())
}

pub fn manager_with(config: ManagerConfig) -> (ProtocolManager, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let manager = ProtocolManager::new(config, transport.clone());
    (manager, transport)
}

pub fn take(log: &CallLog) -> Vec<Call> {
    std::mem::take(&mut *log.lock().unwrap())
}

pub fn events(log: &CallLog) -> Vec<Call> {
    take(log)
        .into_iter()
        .filter(|call| matches!(call, Call::Event(..)))
        .collect()
}
