//! Background asynchronous loop

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{addr, events, manager_with, take, Call, Recorder, TICK};
use session_protocol::protocol::{EventKind, ProtocolCategory};
use session_protocol::ManagerConfig;
use std::time::Duration;

fn config() -> ManagerConfig {
    ManagerConfig::default_with_overrides(|config| {
        config.scheduler.async_interval = Duration::from_millis(1);
        config.scheduler.shutdown_timeout = Duration::from_secs(1);
    })
}

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_loop_delivers_events_until_stopped() {
    let (manager, transport) = manager_with(config());
    let (protocol, log) = Recorder::new(ProtocolCategory::Connection);
    manager.start(Box::new(protocol)).unwrap();
    manager.run_synchronous_cycle(TICK).unwrap();

    let runner = manager.spawn_asynchronous_loop();
    transport.connect(addr(8000));
    let delivered = wait_for(|| {
        log.lock()
            .unwrap()
            .contains(&Call::Event(EventKind::Connected, vec![]))
    })
    .await;
    assert!(delivered);
    assert!(take(&log).contains(&Call::AsyncUpdate));

    runner.stop().await.unwrap();
    take(&log);
    transport.connect(addr(8001));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn test_loop_exits_with_manager() {
    let (manager, _transport) = manager_with(config());
    let runner = manager.spawn_asynchronous_loop();
    drop(manager);

    assert!(wait_for(|| runner.is_finished()).await);
    runner.stop().await.unwrap();
}
