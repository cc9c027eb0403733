//! # Utility Modules
//!
//! Supporting utilities for logging and observability.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by
//!   [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: per-manager atomic counters with snapshots and a cycle timer

pub mod logging;
pub mod metrics;

pub use metrics::{ManagerMetrics, MetricsSnapshot, Timer};
