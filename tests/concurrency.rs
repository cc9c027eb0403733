//! Requests and events issued from many threads at once

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{addr, manager, Recorder, TICK};
use session_protocol::core::message::{with_category, TokenMessage};
use session_protocol::protocol::{InboundEvent, ProtocolCategory, ProtocolContext};
use session_protocol::{Protocol, ProtocolId, ProtocolState};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_starts_get_unique_increasing_ids() {
    let (manager, _transport) = manager();
    let per_thread = 50;

    let batches: Vec<Vec<ProtocolId>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let handle = manager.handle();
                scope.spawn(move || {
                    (0..per_thread)
                        .map(|_| {
                            let (protocol, _) = Recorder::new(ProtocolCategory::KartUpdate);
                            handle.start(Box::new(protocol)).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for batch in &batches {
        assert!(batch.windows(2).all(|pair| pair[0] < pair[1]));
    }
    let unique: HashSet<ProtocolId> = batches.iter().flatten().copied().collect();
    assert_eq!(unique.len(), 8 * per_thread);

    manager.run_synchronous_cycle(TICK).unwrap();
    assert_eq!(manager.protocol_count(), 8 * per_thread);
    assert!(unique
        .iter()
        .all(|id| manager.state_of(*id) == ProtocolState::Running));
}

/// Flags any overlap between two calls into the same instance
struct ExclusiveProbe {
    inside: AtomicBool,
    overlaps: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl ExclusiveProbe {
    fn enter(&self) {
        if self.inside.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(50));
        self.inside.store(false, Ordering::SeqCst);
    }
}

impl Protocol for ExclusiveProbe {
    fn category(&self) -> ProtocolCategory {
        ProtocolCategory::GameEvents
    }

    fn update(&mut self, _ctx: &ProtocolContext, _delta: Duration) {
        self.enter();
    }

    fn asynchronous_update(&mut self, _ctx: &ProtocolContext) {
        self.enter();
    }

    fn on_event(&mut self, _ctx: &ProtocolContext, _event: &InboundEvent) -> bool {
        self.enter();
        true
    }

    fn paused(&mut self, _ctx: &ProtocolContext) {
        self.enter();
    }

    fn unpaused(&mut self, _ctx: &ProtocolContext) {
        self.enter();
    }
}

#[test]
fn test_cycles_never_overlap_inside_a_protocol() {
    let (manager, transport) = manager();
    let overlaps = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let ids: Vec<ProtocolId> = (0..4)
        .map(|_| {
            manager
                .start(Box::new(ExclusiveProbe {
                    inside: AtomicBool::new(false),
                    overlaps: overlaps.clone(),
                    calls: calls.clone(),
                }))
                .unwrap()
        })
        .collect();
    manager.run_synchronous_cycle(TICK).unwrap();

    let token = 77;
    let peer = transport.connect_with_token(addr(6000), token);
    let packet = with_category(
        ProtocolCategory::GameEvents,
        &TokenMessage::new(token, 1, vec![1, 2, 3]).encode(),
    );
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..100 {
                let id = ids[round % ids.len()];
                if round % 2 == 0 {
                    manager.pause(id).unwrap();
                } else {
                    manager.unpause(id).unwrap();
                }
                manager.run_synchronous_cycle(TICK).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });
        scope.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                transport.inject(peer.id(), packet.clone()).unwrap();
                manager.run_asynchronous_cycle().unwrap();
            }
        });
    });

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(calls.load(Ordering::SeqCst) > 0);
}
