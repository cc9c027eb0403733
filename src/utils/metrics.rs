//! Observability and Metrics
//!
//! Counters describing what a protocol manager has been doing. Each manager
//! owns its own [`ManagerMetrics`]; there is no process-wide instance.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ManagerMetrics {
    /// Protocols whose start request was applied
    pub protocols_started: AtomicU64,
    /// Protocols removed through a terminate request
    pub protocols_terminated: AtomicU64,
    /// Protocols removed through a stop request or shutdown
    pub protocols_stopped: AtomicU64,
    /// Lifecycle requests that changed a state
    pub requests_applied: AtomicU64,
    /// Lifecycle requests that were no-ops (illegal or unknown target)
    pub requests_ignored: AtomicU64,
    /// Raw events handed to the manager
    pub events_received: AtomicU64,
    /// Individual `on_event` deliveries
    pub events_delivered: AtomicU64,
    /// Events dropped by frame, token or routing validation
    pub events_rejected: AtomicU64,
    /// Events dropped by the retention window or the pending limit
    pub events_expired: AtomicU64,
    /// Messages handed to the transport
    pub messages_sent: AtomicU64,
    /// Bytes handed to the transport
    pub bytes_sent: AtomicU64,
    /// Transport sends that failed
    pub send_failures: AtomicU64,
    start_time: Instant,
}

impl ManagerMetrics {
    pub fn new() -> Self {
        Self {
            protocols_started: AtomicU64::new(0),
            protocols_terminated: AtomicU64::new(0),
            protocols_stopped: AtomicU64::new(0),
            requests_applied: AtomicU64::new(0),
            requests_ignored: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            events_expired: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn protocol_started(&self) {
        self.protocols_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_terminated(&self) {
        self.protocols_terminated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_stopped(&self) {
        self.protocols_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_applied(&self) {
        self.requests_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_ignored(&self) {
        self.requests_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_expired(&self) {
        self.events_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            protocols_started: self.protocols_started.load(Ordering::Relaxed),
            protocols_terminated: self.protocols_terminated.load(Ordering::Relaxed),
            protocols_stopped: self.protocols_stopped.load(Ordering::Relaxed),
            requests_applied: self.requests_applied.load(Ordering::Relaxed),
            requests_ignored: self.requests_ignored.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_expired: self.events_expired.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            protocols_started = snapshot.protocols_started,
            protocols_terminated = snapshot.protocols_terminated,
            protocols_stopped = snapshot.protocols_stopped,
            requests_applied = snapshot.requests_applied,
            requests_ignored = snapshot.requests_ignored,
            events_received = snapshot.events_received,
            events_delivered = snapshot.events_delivered,
            events_rejected = snapshot.events_rejected,
            events_expired = snapshot.events_expired,
            messages_sent = snapshot.messages_sent,
            bytes_sent = snapshot.bytes_sent,
            send_failures = snapshot.send_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol manager metrics snapshot"
        );
    }
}

impl Default for ManagerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub protocols_started: u64,
    pub protocols_terminated: u64,
    pub protocols_stopped: u64,
    pub requests_applied: u64,
    pub requests_ignored: u64,
    pub events_received: u64,
    pub events_delivered: u64,
    pub events_rejected: u64,
    pub events_expired: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
