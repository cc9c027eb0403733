//! Lifecycle state machine of the protocol manager

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{manager, take, Call, Recorder, TICK};
use session_protocol::protocol::{ProtocolCategory, ProtocolContext};
use session_protocol::{Protocol, ProtocolError, ProtocolId, ProtocolState};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_start_applies_on_next_synchronous_cycle() {
    let (manager, _transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::LobbyRoom);

    let id = manager.start(Box::new(protocol)).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Initializing);
    assert_eq!(manager.protocol_count(), 0);
    assert!(take(&log).is_empty());

    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Running);
    assert_eq!(manager.protocol_count(), 1);
    assert_eq!(take(&log), vec![Call::Setup, Call::Update]);

    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(take(&log), vec![Call::Update]);
}

#[test]
fn test_ids_start_at_one_and_increase() {
    let (manager, _transport) = manager();
    let ids: Vec<ProtocolId> = (0..5)
        .map(|_| {
            let (protocol, _) = Recorder::new(ProtocolCategory::Synchronization);
            manager.start(Box::new(protocol)).unwrap()
        })
        .collect();

    assert_eq!(ids[0].as_u32(), 1);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_pause_and_unpause() {
    let (manager, _transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::KartUpdate);
    let id = manager.start(Box::new(protocol)).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    take(&log);

    manager.pause(id).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Running);
    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Paused);
    assert_eq!(take(&log), vec![Call::Paused]);

    manager.run_synchronous_cycle(TICK).unwrap();
    manager.run_asynchronous_cycle().unwrap();
    assert!(take(&log).is_empty(), "paused protocols are not updated");

    manager.unpause(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Running);
    assert_eq!(take(&log), vec![Call::Unpaused, Call::Update]);
}

#[test]
fn test_illegal_transitions_are_ignored() {
    let (manager, _transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::StartGame);
    let id = manager.start(Box::new(protocol)).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    take(&log);

    // unpause while running, then pause twice
    manager.unpause(id).unwrap();
    manager.pause(id).unwrap();
    manager.pause(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    assert_eq!(manager.state_of(id), ProtocolState::Paused);
    assert_eq!(take(&log), vec![Call::Paused]);
    let metrics = manager.metrics().snapshot();
    assert_eq!(metrics.requests_ignored, 2);
    assert_eq!(metrics.requests_applied, 2);
}

#[test]
fn test_requests_apply_in_fifo_order() {
    let (manager, _transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::ControllerEvents);
    let id = manager.start(Box::new(protocol)).unwrap();
    manager.pause(id).unwrap();
    manager.unpause(id).unwrap();
    manager.pause(id).unwrap();

    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Paused);
    assert_eq!(
        take(&log),
        vec![Call::Setup, Call::Paused, Call::Unpaused, Call::Paused]
    );
}

#[test]
fn test_terminate_then_pause_in_same_batch() {
    let (manager, _transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::LobbyRoom);
    let id = manager.start(Box::new(protocol)).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    take(&log);

    manager.terminate(id).unwrap();
    manager.pause(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    assert_eq!(manager.state_of(id), ProtocolState::Terminated);
    assert_eq!(take(&log), vec![Call::Terminated]);
    assert_eq!(manager.metrics().snapshot().requests_ignored, 1);
}

#[test]
fn test_terminate_from_paused() {
    let (manager, _transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::LobbyRoom);
    let id = manager.start(Box::new(protocol)).unwrap();
    manager.pause(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    take(&log);

    manager.terminate(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Terminated);
    assert_eq!(take(&log), vec![Call::Terminated]);
}

#[test]
fn test_no_calls_after_termination() {
    let (manager, transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::Connection);
    let id = manager.start(Box::new(protocol)).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    manager.terminate(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    take(&log);

    transport.connect(common::addr(4000));
    manager.run_asynchronous_cycle().unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    manager.pause(id).unwrap();
    manager.terminate(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    assert!(take(&log).is_empty());
    assert_eq!(manager.protocol_count(), 0);
}

#[test]
fn test_termination_callback_runs_once() {
    let (manager, _transport) = manager();
    let (protocol, _log) = Recorder::new(ProtocolCategory::PublicAddress);
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    let id = manager
        .start_with_callback(Box::new(protocol), move |id| sink.lock().unwrap().push(id))
        .unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    manager.terminate(id).unwrap();
    manager.terminate(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    manager.terminate(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    assert_eq!(*fired.lock().unwrap(), vec![id]);
    assert_eq!(manager.metrics().snapshot().protocols_terminated, 1);
}

#[test]
fn test_stop_skips_notifications() {
    let (manager, _transport) = manager();
    let (protocol, log) = Recorder::new(ProtocolCategory::Stop);
    let fired = Arc::new(Mutex::new(0u32));
    let counter = fired.clone();
    let id = manager
        .start_with_callback(Box::new(protocol), move |_| *counter.lock().unwrap() += 1)
        .unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    take(&log);

    manager.stop(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    assert_eq!(manager.state_of(id), ProtocolState::Terminated);
    assert!(take(&log).is_empty());
    assert_eq!(*fired.lock().unwrap(), 0);
    assert_eq!(manager.metrics().snapshot().protocols_stopped, 1);
}

#[test]
fn test_stop_ignored_while_paused() {
    let (manager, _transport) = manager();
    let (protocol, _log) = Recorder::new(ProtocolCategory::Stop);
    let id = manager.start(Box::new(protocol)).unwrap();
    manager.pause(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    manager.stop(id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Paused);
}

/// Ends itself after a fixed number of ticks and starts a follow-up protocol
/// when set up.
struct Countdown {
    ticks: u32,
    follow_up: Option<Box<dyn Protocol>>,
    started: Arc<Mutex<Option<ProtocolId>>>,
}

impl Protocol for Countdown {
    fn category(&self) -> ProtocolCategory {
        ProtocolCategory::Synchronization
    }

    fn setup(&mut self, ctx: &ProtocolContext) {
        if let Some(protocol) = self.follow_up.take() {
            let id = ctx.request_start(protocol).unwrap();
            assert_eq!(ctx.state_of(id), ProtocolState::Initializing);
            *self.started.lock().unwrap() = Some(id);
        }
    }

    fn update(&mut self, ctx: &ProtocolContext, delta: Duration) {
        assert_eq!(delta, TICK);
        self.ticks = self.ticks.saturating_sub(1);
        if self.ticks == 0 {
            ctx.request_terminate().unwrap();
        }
    }
}

#[test]
fn test_protocol_drives_its_own_lifecycle() {
    let (manager, _transport) = manager();
    let (follow_up, follow_log) = Recorder::new(ProtocolCategory::GameEvents);
    let started = Arc::new(Mutex::new(None));
    let id = manager
        .start(Box::new(Countdown {
            ticks: 2,
            follow_up: Some(Box::new(follow_up)),
            started: started.clone(),
        }))
        .unwrap();

    manager.run_synchronous_cycle(TICK).unwrap();
    let follow_id = started.lock().unwrap().expect("follow-up requested");
    assert!(follow_id > id);
    assert_eq!(manager.state_of(follow_id), ProtocolState::Initializing);

    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(follow_id), ProtocolState::Running);
    assert_eq!(take(&follow_log), vec![Call::Setup, Call::Update]);
    // terminate requested during the second update, applied on the third cycle
    assert_eq!(manager.state_of(id), ProtocolState::Running);

    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.state_of(id), ProtocolState::Terminated);
    assert_eq!(manager.find(ProtocolCategory::Synchronization), None);
    assert_eq!(manager.find(ProtocolCategory::GameEvents), Some(follow_id));
}

#[test]
fn test_asynchronous_update_while_paused_is_opt_in() {
    let (manager, _transport) = manager();
    let (plain, plain_log) = Recorder::new(ProtocolCategory::KartUpdate);
    let (eager, eager_log) = Recorder::new(ProtocolCategory::KartUpdate);
    let plain_id = manager.start(Box::new(plain)).unwrap();
    let eager_id = manager.start(Box::new(eager.updating_while_paused())).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    manager.run_asynchronous_cycle().unwrap();
    assert!(take(&plain_log).contains(&Call::AsyncUpdate));
    assert!(take(&eager_log).contains(&Call::AsyncUpdate));

    manager.pause(plain_id).unwrap();
    manager.pause(eager_id).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    take(&plain_log);
    take(&eager_log);

    manager.run_asynchronous_cycle().unwrap();
    assert!(take(&plain_log).is_empty());
    assert_eq!(take(&eager_log), vec![Call::AsyncUpdate]);
}

#[test]
fn test_shutdown_releases_everything() {
    let (manager, _transport) = manager();
    let (running, log) = Recorder::new(ProtocolCategory::LobbyRoom);
    let (pending, _) = Recorder::new(ProtocolCategory::LobbyRoom);
    let running_id = manager.start(Box::new(running)).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    let pending_id = manager.start(Box::new(pending)).unwrap();
    take(&log);

    manager.shutdown();
    assert!(manager.is_stopped());
    assert_eq!(manager.state_of(running_id), ProtocolState::Terminated);
    assert_eq!(manager.state_of(pending_id), ProtocolState::Terminated);
    assert_eq!(manager.protocol_count(), 0);
    assert!(take(&log).is_empty());

    let (late, _) = Recorder::new(ProtocolCategory::LobbyRoom);
    assert!(matches!(
        manager.start(Box::new(late)),
        Err(ProtocolError::ManagerStopped)
    ));
    assert!(matches!(
        manager.run_synchronous_cycle(TICK),
        Err(ProtocolError::ManagerStopped)
    ));
    // idempotent
    manager.shutdown();
}

#[test]
fn test_handle_outlives_manager() {
    let (manager, _transport) = manager();
    let handle = manager.handle();
    let (protocol, _) = Recorder::new(ProtocolCategory::LobbyRoom);
    let id = handle.start(Box::new(protocol)).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(handle.state_of(id), ProtocolState::Running);

    drop(manager);
    assert_eq!(handle.state_of(id), ProtocolState::Terminated);
    assert!(matches!(handle.pause(id), Err(ProtocolError::ManagerStopped)));
    assert!(handle.peers().is_empty());
}

/// Records what the manager reports about this protocol during `setup`
struct SelfInspector {
    seen: Arc<Mutex<Option<(ProtocolState, Option<ProtocolId>)>>>,
}

impl Protocol for SelfInspector {
    fn category(&self) -> ProtocolCategory {
        ProtocolCategory::LobbyRoom
    }

    fn setup(&mut self, ctx: &ProtocolContext) {
        let found = ctx.handle().find(ProtocolCategory::LobbyRoom);
        *self.seen.lock().unwrap() = Some((ctx.state_of(ctx.id()), found));
    }

    fn update(&mut self, _ctx: &ProtocolContext, _delta: Duration) {}
}

#[test]
fn test_setup_sees_protocol_running() {
    let (manager, _transport) = manager();
    let seen = Arc::new(Mutex::new(None));
    let id = manager
        .start(Box::new(SelfInspector { seen: seen.clone() }))
        .unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        Some((ProtocolState::Running, Some(id)))
    );
}
