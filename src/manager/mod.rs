//! # Protocol Manager
//!
//! Owns the active protocols and drives them.
//!
//! ## Cycles
//! - **Synchronous** ([`ProtocolManager::run_synchronous_cycle`]): called once
//!   per simulation tick. Applies queued lifecycle requests in FIFO order, then
//!   calls `update` on every running protocol.
//! - **Asynchronous** ([`ProtocolManager::run_asynchronous_cycle`]): called as
//!   often as network input warrants, usually from
//!   [`ProtocolManager::spawn_asynchronous_loop`]. Polls the transport,
//!   delivers queued events and calls `asynchronous_update`.
//!
//! ## Concurrency
//! - Lifecycle requests and inbound events travel through unbounded channels;
//!   any thread may send, only the owning cycle drains.
//! - The protocol index sits behind a `RwLock`. It is written by the
//!   synchronous cycle only and never held while a protocol runs.
//! - Each protocol has its own mutex, so the two cycles never call into the
//!   same protocol at once while different protocols proceed independently.
//!
//! ## Ownership
//! There is one manager per session, created and passed around explicitly.
//! Protocols and background tasks hold a [`ManagerHandle`], a weak reference
//! that stops working once the manager is dropped.

pub mod dispatch;
pub mod record;
pub mod runner;

pub use runner::AsyncRunner;

use crate::config::ManagerConfig;
use crate::core::message::{with_category, TokenMessage};
use crate::error::{constants, ProtocolError, Result};
use crate::manager::dispatch::{Delivery, PendingEvent};
use crate::manager::record::ProtocolRecord;
use crate::protocol::{
    LifecycleRequest, Protocol, ProtocolCategory, ProtocolContext, ProtocolId, ProtocolState,
    RawEvent, RequestKind, TerminationCallback,
};
use crate::transport::{PeerHandle, PeerId, Transport};
use crate::utils::metrics::{ManagerMetrics, Timer};
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// First id handed out; `0` never names a protocol.
const FIRST_PROTOCOL_ID: u32 = 1;

struct Shared {
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    protocols: RwLock<BTreeMap<ProtocolId, ProtocolRecord>>,
    requests: mpsc::UnboundedSender<LifecycleRequest>,
    request_rx: Mutex<mpsc::UnboundedReceiver<LifecycleRequest>>,
    events: mpsc::UnboundedSender<PendingEvent>,
    event_rx: Mutex<mpsc::UnboundedReceiver<PendingEvent>>,
    pending_events: Mutex<VecDeque<PendingEvent>>,
    starting: Mutex<HashSet<ProtocolId>>,
    next_id: Mutex<u32>,
    stopped: AtomicBool,
    metrics: ManagerMetrics,
}

/// The session's protocol manager.
///
/// Dropping the manager shuts it down.
pub struct ProtocolManager {
    shared: Arc<Shared>,
}

/// Weak, cloneable access to a [`ProtocolManager`].
#[derive(Clone)]
pub struct ManagerHandle {
    shared: Weak<Shared>,
}

impl ProtocolManager {
    pub fn new(config: ManagerConfig, transport: Arc<dyn Transport>) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        info!(
            async_interval_ms = config.scheduler.async_interval.as_millis() as u64,
            retention_ms = config.events.retention.as_millis() as u64,
            "Protocol manager created"
        );
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                protocols: RwLock::new(BTreeMap::new()),
                requests,
                request_rx: Mutex::new(request_rx),
                events,
                event_rx: Mutex::new(event_rx),
                pending_events: Mutex::new(VecDeque::new()),
                starting: Mutex::new(HashSet::new()),
                next_id: Mutex::new(FIRST_PROTOCOL_ID),
                stopped: AtomicBool::new(false),
                metrics: ManagerMetrics::new(),
            }),
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        self.shared.handle()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &ManagerMetrics {
        &self.shared.metrics
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Queue a protocol for starting and return the id it will run under.
    ///
    /// The protocol becomes `Running` (and its `setup` runs) on the next
    /// synchronous cycle.
    pub fn start(&self, protocol: Box<dyn Protocol>) -> Result<ProtocolId> {
        self.shared.start(protocol, None)
    }

    /// Like [`start`](Self::start), with a callback run once after the
    /// protocol has been terminated.
    pub fn start_with_callback<F>(
        &self,
        protocol: Box<dyn Protocol>,
        on_terminated: F,
    ) -> Result<ProtocolId>
    where
        F: FnOnce(ProtocolId) + Send + 'static,
    {
        self.shared.start(protocol, Some(Box::new(on_terminated)))
    }

    pub fn pause(&self, id: ProtocolId) -> Result<()> {
        self.shared.request(LifecycleRequest::Pause(id))
    }

    pub fn unpause(&self, id: ProtocolId) -> Result<()> {
        self.shared.request(LifecycleRequest::Unpause(id))
    }

    pub fn terminate(&self, id: ProtocolId) -> Result<()> {
        self.shared.request(LifecycleRequest::Terminate(id))
    }

    /// Forced removal of a running protocol, without teardown notification.
    pub fn stop(&self, id: ProtocolId) -> Result<()> {
        self.shared.request(LifecycleRequest::Stop(id))
    }

    pub fn state_of(&self, id: ProtocolId) -> ProtocolState {
        self.shared.state_of(id)
    }

    /// First active protocol of a category
    pub fn find(&self, category: ProtocolCategory) -> Option<ProtocolId> {
        self.shared.find(category)
    }

    /// Number of running or paused protocols
    pub fn protocol_count(&self) -> usize {
        self.shared.protocol_count()
    }

    /// Number of accepted events still waiting for delivery
    pub fn pending_event_count(&self) -> usize {
        self.shared.pending_event_count()
    }

    pub fn run_synchronous_cycle(&self, delta: Duration) -> Result<()> {
        self.shared.run_synchronous_cycle(delta)
    }

    pub fn run_asynchronous_cycle(&self) -> Result<()> {
        self.shared.run_asynchronous_cycle()
    }

    /// Entry point for network data arriving outside the transport poll.
    ///
    /// Returns how many protocols the event was queued for. Rejected events
    /// are logged and reported as errors; they never reach a protocol.
    pub fn dispatch_external_event(&self, event: RawEvent) -> Result<usize> {
        self.shared.dispatch_external_event(event)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Stop both cycles and release every protocol.
    ///
    /// Queued requests and events are discarded; protocols are dropped in id
    /// order without teardown notifications. Must not be called from inside a
    /// protocol callback.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for ProtocolManager {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl ManagerHandle {
    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(ProtocolError::ManagerStopped)
    }

    pub fn start(&self, protocol: Box<dyn Protocol>) -> Result<ProtocolId> {
        self.shared()?.start(protocol, None)
    }

    pub fn pause(&self, id: ProtocolId) -> Result<()> {
        self.shared()?.request(LifecycleRequest::Pause(id))
    }

    pub fn unpause(&self, id: ProtocolId) -> Result<()> {
        self.shared()?.request(LifecycleRequest::Unpause(id))
    }

    pub fn terminate(&self, id: ProtocolId) -> Result<()> {
        self.shared()?.request(LifecycleRequest::Terminate(id))
    }

    pub fn stop(&self, id: ProtocolId) -> Result<()> {
        self.shared()?.request(LifecycleRequest::Stop(id))
    }

    pub fn state_of(&self, id: ProtocolId) -> ProtocolState {
        self.shared
            .upgrade()
            .map_or(ProtocolState::Terminated, |shared| shared.state_of(id))
    }

    pub fn find(&self, category: ProtocolCategory) -> Option<ProtocolId> {
        self.shared.upgrade().and_then(|shared| shared.find(category))
    }

    pub fn peers(&self) -> Vec<PeerHandle> {
        self.shared
            .upgrade()
            .map(|shared| shared.transport.peers())
            .unwrap_or_default()
    }

    pub fn run_synchronous_cycle(&self, delta: Duration) -> Result<()> {
        self.shared()?.run_synchronous_cycle(delta)
    }

    pub fn run_asynchronous_cycle(&self) -> Result<()> {
        self.shared()?.run_asynchronous_cycle()
    }

    pub fn dispatch_external_event(&self, event: RawEvent) -> Result<usize> {
        self.shared()?.dispatch_external_event(event)
    }

    pub fn send_message(
        &self,
        category: ProtocolCategory,
        peer: PeerId,
        message: &[u8],
        reliable: bool,
    ) -> Result<()> {
        self.shared()?.send_message(category, peer, message, reliable)
    }

    pub fn send_to_all(
        &self,
        category: ProtocolCategory,
        message: &[u8],
        reliable: bool,
    ) -> Result<()> {
        self.shared()?.send_to_all(category, message, reliable)
    }

    pub fn send_to_all_except(
        &self,
        category: ProtocolCategory,
        peer: PeerId,
        message: &[u8],
        reliable: bool,
    ) -> Result<()> {
        self.shared()?
            .send_to_all_except(category, peer, message, reliable)
    }

    pub fn send_to_peers_with_token(
        &self,
        category: ProtocolCategory,
        message_type: u8,
        payload: &[u8],
    ) -> Result<usize> {
        self.shared()?
            .send_to_peers_with_token(category, message_type, payload)
    }
}

impl Shared {
    fn handle(self: &Arc<Self>) -> ManagerHandle {
        ManagerHandle {
            shared: Arc::downgrade(self),
        }
    }

    fn context(self: &Arc<Self>, record: &ProtocolRecord) -> ProtocolContext {
        ProtocolContext::new(record.id, record.category, self.handle())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ProtocolError::ManagerStopped);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    fn start(
        &self,
        protocol: Box<dyn Protocol>,
        on_terminated: Option<TerminationCallback>,
    ) -> Result<ProtocolId> {
        self.ensure_running()?;
        let category = protocol.category();

        // Held until the request is queued so start requests enter the queue in id order
        let mut next_id = self.next_id.lock().map_err(|_| ProtocolError::LockPoisoned)?;
        let raw = *next_id;
        let following = raw.checked_add(1).ok_or(ProtocolError::IdsExhausted)?;
        let id = ProtocolId::new(raw);

        self.starting
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .insert(id);
        let request = LifecycleRequest::Start {
            id,
            protocol,
            on_terminated,
        };
        if self.requests.send(request).is_err() {
            self.starting
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(ProtocolError::ManagerStopped);
        }
        *next_id = following;
        drop(next_id);

        debug!(protocol_id = %id, %category, "Start requested");
        Ok(id)
    }

    fn request(&self, request: LifecycleRequest) -> Result<()> {
        self.ensure_running()?;
        let kind = request.kind();
        let id = request.target();
        self.requests.send(request).map_err(|_| {
            debug!("{}", constants::ERR_REQUEST_QUEUE);
            ProtocolError::ManagerStopped
        })?;
        debug!(protocol_id = %id, request = %kind, "Lifecycle request queued");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn state_of(&self, id: ProtocolId) -> ProtocolState {
        // `starting` before the index: a start moves into the index before
        // it leaves `starting`, so one of the two always sees it.
        let starting = self
            .starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id);
        if starting {
            return ProtocolState::Initializing;
        }
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map_or(ProtocolState::Terminated, ProtocolRecord::state)
    }

    fn find(&self, category: ProtocolCategory) -> Option<ProtocolId> {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|record| record.category == category && record.state().is_active())
            .map(|record| record.id)
    }

    fn protocol_count(&self) -> usize {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn pending_event_count(&self) -> usize {
        let queued = self
            .pending_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let incoming = self
            .event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        queued + incoming
    }

    fn record(&self, id: ProtocolId) -> Option<ProtocolRecord> {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn snapshot(&self) -> Result<BTreeMap<ProtocolId, ProtocolRecord>> {
        self.protocols
            .read()
            .map(|index| index.clone())
            .map_err(|_| {
                warn!("{}", constants::ERR_INDEX_READ_LOCK);
                ProtocolError::LockPoisoned
            })
    }

    // ------------------------------------------------------------------
    // Synchronous cycle
    // ------------------------------------------------------------------

    fn run_synchronous_cycle(self: &Arc<Self>, delta: Duration) -> Result<()> {
        self.ensure_running()?;
        let _timer = Timer::start("synchronous_cycle");

        // The receiver lock doubles as the cycle guard
        let mut request_rx = self
            .request_rx
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned)?;

        // Requests queued while this batch is applied wait for the next cycle
        let mut batch = Vec::new();
        while let Ok(request) = request_rx.try_recv() {
            batch.push(request);
        }
        for request in batch {
            self.apply(request);
        }

        for record in self.snapshot()?.into_values() {
            let ctx = self.context(&record);
            let mut protocol = record.slot.lock();
            if record.slot.state() == ProtocolState::Running {
                protocol.update(&ctx, delta);
            }
        }

        drop(request_rx);
        Ok(())
    }

    fn apply(self: &Arc<Self>, request: LifecycleRequest) {
        let kind = request.kind();
        match request {
            LifecycleRequest::Start {
                id,
                protocol,
                on_terminated,
            } => self.apply_start(id, protocol, on_terminated),
            LifecycleRequest::Pause(id) => {
                self.apply_transition(id, kind, ProtocolState::Running, ProtocolState::Paused)
            }
            LifecycleRequest::Unpause(id) => {
                self.apply_transition(id, kind, ProtocolState::Paused, ProtocolState::Running)
            }
            LifecycleRequest::Terminate(id) => self.apply_end(id, kind, true),
            LifecycleRequest::Stop(id) => self.apply_end(id, kind, false),
        }
    }

    fn apply_start(
        self: &Arc<Self>,
        id: ProtocolId,
        protocol: Box<dyn Protocol>,
        on_terminated: Option<TerminationCallback>,
    ) {
        let record = ProtocolRecord::new(id, protocol, on_terminated);
        let ctx = self.context(&record);
        let category = record.category;
        let slot = record.slot.clone();

        // Visible as running before setup; the slot lock keeps both cycles
        // out until setup has returned.
        let mut protocol = slot.lock();
        slot.set_state(ProtocolState::Running);
        self.protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, record);
        self.starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        protocol.setup(&ctx);
        drop(protocol);

        self.metrics.protocol_started();
        self.metrics.request_applied();
        info!(protocol_id = %id, %category, "Protocol started");
    }

    fn apply_transition(
        self: &Arc<Self>,
        id: ProtocolId,
        kind: RequestKind,
        from: ProtocolState,
        to: ProtocolState,
    ) {
        let Some(record) = self.record(id) else {
            self.ignore(id, kind, None);
            return;
        };
        let ctx = self.context(&record);
        let mut protocol = record.slot.lock();
        let current = record.slot.state();
        if current != from {
            drop(protocol);
            self.ignore(id, kind, Some(current));
            return;
        }

        record.slot.set_state(to);
        match to {
            ProtocolState::Paused => protocol.paused(&ctx),
            ProtocolState::Running => protocol.unpaused(&ctx),
            ProtocolState::Initializing | ProtocolState::Terminated => {}
        }
        drop(protocol);

        self.metrics.request_applied();
        debug!(protocol_id = %id, request = %kind, state = %to, "Lifecycle request applied");
    }

    /// Terminate (with notification and callback) or stop (without).
    fn apply_end(self: &Arc<Self>, id: ProtocolId, kind: RequestKind, notify: bool) {
        let Some(record) = self.record(id) else {
            self.ignore(id, kind, None);
            return;
        };
        let ctx = self.context(&record);
        let mut protocol = record.slot.lock();
        let current = record.slot.state();
        let allowed = if notify {
            current.is_active()
        } else {
            current == ProtocolState::Running
        };
        if !allowed {
            drop(protocol);
            self.ignore(id, kind, Some(current));
            return;
        }

        record.slot.set_state(ProtocolState::Terminated);
        if notify {
            protocol.terminated(&ctx);
        }
        drop(protocol);

        self.protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        self.metrics.request_applied();

        if notify {
            if let Some(callback) = record.slot.take_callback() {
                callback(id);
            }
            self.metrics.protocol_terminated();
            info!(protocol_id = %id, category = %record.category, "Protocol terminated");
        } else {
            self.metrics.protocol_stopped();
            info!(protocol_id = %id, category = %record.category, "Protocol stopped");
        }
    }

    fn ignore(&self, id: ProtocolId, kind: RequestKind, current: Option<ProtocolState>) {
        self.metrics.request_ignored();
        match current {
            None => warn!(
                protocol_id = %id,
                request = %kind,
                "Lifecycle request for unknown or terminated protocol ignored"
            ),
            Some(state) => debug!(
                protocol_id = %id,
                request = %kind,
                %state,
                "Illegal lifecycle transition ignored"
            ),
        }
    }

    // ------------------------------------------------------------------
    // Asynchronous cycle
    // ------------------------------------------------------------------

    fn dispatch_external_event(&self, raw: RawEvent) -> Result<usize> {
        self.ensure_running()?;
        self.metrics.event_received();
        let peer = raw.peer.id();
        let kind = raw.kind;

        let event = match dispatch::validate(raw) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.event_rejected();
                match &e {
                    ProtocolError::TokenMismatch { .. } | ProtocolError::TokenUnset(_) => {
                        warn!(%peer, error = %e, "{}, dropping", constants::ERR_BAD_TOKEN)
                    }
                    _ => warn!(%peer, ?kind, error = %e, "Dropping badly formatted message"),
                }
                return Err(e);
            }
        };

        let remaining = {
            let index = self
                .protocols
                .read()
                .map_err(|_| ProtocolError::LockPoisoned)?;
            dispatch::interested(index.values(), event.kind(), event.category())
        };
        if remaining.is_empty() {
            debug!(%peer, ?kind, category = ?event.category(), "No protocol interested in event");
            return Ok(0);
        }

        let count = remaining.len();
        self.events
            .send(PendingEvent { event, remaining })
            .map_err(|_| {
                debug!("{}", constants::ERR_EVENT_QUEUE);
                ProtocolError::ManagerStopped
            })?;
        Ok(count)
    }

    fn run_asynchronous_cycle(self: &Arc<Self>) -> Result<()> {
        self.ensure_running()?;
        let _timer = Timer::start("asynchronous_cycle");

        // The queue lock doubles as the cycle guard
        let mut pending = self
            .pending_events
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned)?;

        for raw in self.transport.poll_inbound_events() {
            // Validation failures are logged and counted in dispatch
            if let Err(e) = self.dispatch_external_event(raw) {
                if !e.is_validation() {
                    debug!(error = %e, "Inbound event not queued");
                }
            }
        }

        {
            let mut event_rx = self
                .event_rx
                .lock()
                .map_err(|_| ProtocolError::LockPoisoned)?;
            while let Ok(event) = event_rx.try_recv() {
                pending.push_back(event);
            }
        }

        let max_pending = self.config.events.max_pending;
        if pending.len() > max_pending {
            let excess = pending.len() - max_pending;
            pending.drain(..excess);
            for _ in 0..excess {
                self.metrics.event_expired();
            }
            warn!(
                dropped = excess,
                max_pending,
                "Inbound event queue full, dropping oldest events"
            );
        }

        let active = self.snapshot()?;
        let retention = self.config.events.retention;
        pending.retain_mut(|pending_event| {
            let PendingEvent { event, remaining } = pending_event;
            let event = &*event;
            if event.age() > retention {
                self.metrics.event_expired();
                debug!(
                    peer = %event.peer_id(),
                    undelivered = remaining.len(),
                    "Event exceeded retention window, dropped"
                );
                return false;
            }
            remaining.retain(|id| {
                let Some(record) = active.get(id) else {
                    return false;
                };
                let ctx = self.context(record);
                match dispatch::deliver(record, &ctx, event) {
                    Delivery::Delivered { consumed } => {
                        self.metrics.event_delivered();
                        if !consumed {
                            debug!(protocol_id = %id, "Event not fully consumed");
                        }
                        false
                    }
                    Delivery::Deferred => true,
                    Delivery::Gone => false,
                }
            });
            !remaining.is_empty()
        });

        for record in active.values() {
            let ctx = self.context(record);
            let mut protocol = record.slot.lock();
            let run = match record.slot.state() {
                ProtocolState::Running => true,
                ProtocolState::Paused => protocol.updates_while_paused(),
                ProtocolState::Initializing | ProtocolState::Terminated => false,
            };
            if run {
                protocol.asynchronous_update(&ctx);
            }
        }

        drop(pending);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    fn track_send(&self, result: Result<()>, bytes: usize) -> Result<()> {
        match &result {
            Ok(()) => self.metrics.message_sent(bytes as u64),
            Err(e) => {
                self.metrics.send_failed();
                warn!(error = %e, "Send failed");
            }
        }
        result
    }

    fn send_message(
        &self,
        category: ProtocolCategory,
        peer: PeerId,
        message: &[u8],
        reliable: bool,
    ) -> Result<()> {
        let packet = with_category(category, message);
        let result = self.transport.send(peer, &packet, reliable);
        self.track_send(result, packet.len())
    }

    fn send_to_all(
        &self,
        category: ProtocolCategory,
        message: &[u8],
        reliable: bool,
    ) -> Result<()> {
        let packet = with_category(category, message);
        let result = self.transport.send_to_all(&packet, reliable);
        self.track_send(result, packet.len())
    }

    fn send_to_all_except(
        &self,
        category: ProtocolCategory,
        peer: PeerId,
        message: &[u8],
        reliable: bool,
    ) -> Result<()> {
        let packet = with_category(category, message);
        let result = self.transport.send_to_all_except(peer, &packet, reliable);
        self.track_send(result, packet.len())
    }

    fn send_to_peers_with_token(
        &self,
        category: ProtocolCategory,
        message_type: u8,
        payload: &[u8],
    ) -> Result<usize> {
        let payload = Bytes::copy_from_slice(payload);
        let mut reached = 0;
        let mut first_error = None;

        for peer in self.transport.peers() {
            let Some(token) = peer.session_token() else {
                debug!(peer = %peer.id(), "Skipping peer without session token");
                continue;
            };
            let message = TokenMessage::new(token, message_type, payload.clone()).encode();
            match self.send_message(category, peer.id(), &message, true) {
                Ok(()) => reached += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if reached == 0 => Err(e),
            _ => Ok(reached),
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let discarded_requests = {
            let mut request_rx = self.request_rx.lock().unwrap_or_else(PoisonError::into_inner);
            request_rx.close();
            let mut count = 0usize;
            while request_rx.try_recv().is_ok() {
                count += 1;
            }
            count
        };

        let discarded_events = {
            let mut pending = self
                .pending_events
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut event_rx = self.event_rx.lock().unwrap_or_else(PoisonError::into_inner);
            event_rx.close();
            let mut count = pending.len();
            pending.clear();
            while event_rx.try_recv().is_ok() {
                count += 1;
            }
            count
        };

        self.starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let records = std::mem::take(
            &mut *self
                .protocols
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let released = records.len();
        for (id, record) in records {
            {
                let _protocol = record.slot.lock();
                record.slot.set_state(ProtocolState::Terminated);
            }
            self.metrics.protocol_stopped();
            debug!(protocol_id = %id, category = %record.category, "Protocol released");
            drop(record);
        }

        info!(
            protocols = released,
            requests = discarded_requests,
            events = discarded_events,
            "Protocol manager shut down"
        );
    }
}
