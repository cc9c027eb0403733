//! Background driver for the asynchronous cycle.

use crate::error::{ProtocolError, Result};
use crate::manager::{ManagerHandle, ProtocolManager};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// A running asynchronous loop, see
/// [`ProtocolManager::spawn_asynchronous_loop`].
pub struct AsyncRunner {
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
    timeout: Duration,
}

impl ProtocolManager {
    /// Run the asynchronous cycle on the current tokio runtime, every
    /// `scheduler.async_interval`, until [`AsyncRunner::stop`] is called or
    /// the manager shuts down.
    pub fn spawn_asynchronous_loop(&self) -> AsyncRunner {
        let scheduler = &self.config().scheduler;
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_loop(self.handle(), scheduler.async_interval, shutdown_rx));
        AsyncRunner {
            shutdown,
            task,
            timeout: scheduler.shutdown_timeout,
        }
    }
}

impl AsyncRunner {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the loop to exit and wait for it, at most `scheduler.shutdown_timeout`.
    ///
    /// A loop that does not finish in time is aborted and reported as
    /// [`ProtocolError::Timeout`].
    pub async fn stop(self) -> Result<()> {
        // A closed channel means the loop has already exited
        let _ = self.shutdown.send(()).await;

        let abort = self.task.abort_handle();
        match tokio::time::timeout(self.timeout, self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProtocolError::Io(io::Error::other(e))),
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Asynchronous loop did not stop in time, aborting"
                );
                abort.abort();
                Err(ProtocolError::Timeout)
            }
        }
    }
}

#[instrument(skip(handle, shutdown_rx), fields(interval_ms = interval.as_millis() as u64))]
async fn run_loop(handle: ManagerHandle, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Asynchronous loop started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Asynchronous loop stopping");
                break;
            }
            _ = ticker.tick() => {
                match handle.run_asynchronous_cycle() {
                    Ok(()) => {}
                    Err(ProtocolError::ManagerStopped) => {
                        debug!("Manager gone, asynchronous loop exiting");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Asynchronous cycle failed"),
                }
            }
        }
    }
}
