//! # Configuration Management
//!
//! Centralized configuration for the protocol manager.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults and `default_with_overrides()`
//!
//! ## Tuning
//! - `scheduler.async_interval` sets how often the asynchronous cycle runs when
//!   driven by the built-in runner; the synchronous cycle is always driven by
//!   the embedding application's tick.
//! - `events.retention` bounds how long an undelivered event may wait for a
//!   paused protocol before it is discarded.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default period of the asynchronous runner
pub const DEFAULT_ASYNC_INTERVAL: Duration = Duration::from_millis(2);

/// How long queued inbound events are kept before being dropped unconsumed
pub const DEFAULT_EVENT_RETENTION: Duration = Duration::from_secs(1);

/// Upper bound on events waiting for delivery
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 4096;

/// Largest datagram accepted or sent by the UDP transport
pub const DEFAULT_MAX_PACKET_SIZE: usize = 65_507;

/// Upper bound on peers the UDP transport keeps track of
pub const DEFAULT_MAX_PEERS: usize = 256;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ManagerConfig {
    /// Scheduling of the two cycles
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Inbound event queue
    #[serde(default)]
    pub events: EventConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ManagerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(interval) = std::env::var("SESSION_PROTOCOL_ASYNC_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.scheduler.async_interval = Duration::from_millis(val);
            }
        }

        if let Ok(retention) = std::env::var("SESSION_PROTOCOL_EVENT_RETENTION_MS") {
            if let Ok(val) = retention.parse::<u64>() {
                config.events.retention = Duration::from_millis(val);
            }
        }

        if let Ok(max) = std::env::var("SESSION_PROTOCOL_MAX_PENDING_EVENTS") {
            if let Ok(val) = max.parse::<usize>() {
                config.events.max_pending = val;
            }
        }

        if let Ok(addr) = std::env::var("SESSION_PROTOCOL_BIND_ADDRESS") {
            config.transport.bind_address = addr;
        }

        if let Ok(max) = std::env::var("SESSION_PROTOCOL_MAX_PEERS") {
            if let Ok(val) = max.parse::<usize>() {
                config.transport.max_peers = val;
            }
        }

        if let Ok(level) = std::env::var("SESSION_PROTOCOL_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.scheduler.validate());
        errors.extend(self.events.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the asynchronous cycle when run by the built-in runner
    #[serde(with = "duration_serde")]
    pub async_interval: Duration,

    /// How long to wait for the asynchronous runner to stop
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            async_interval: DEFAULT_ASYNC_INTERVAL,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.async_interval.is_zero() {
            errors.push("Async interval must be greater than 0".to_string());
        } else if self.async_interval > Duration::from_secs(1) {
            errors.push("Async interval too long (maximum: 1s)".to_string());
        }

        if self.shutdown_timeout.as_millis() < 10 {
            errors.push("Shutdown timeout too short (minimum: 10ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Inbound event queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventConfig {
    /// Age after which a queued event is dropped unconsumed
    #[serde(with = "duration_serde")]
    pub retention: Duration,

    /// Maximum number of events waiting for delivery
    pub max_pending: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_EVENT_RETENTION,
            max_pending: DEFAULT_MAX_PENDING_EVENTS,
        }
    }
}

impl EventConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.retention.as_millis() < 10 {
            errors.push("Event retention too short (minimum: 10ms)".to_string());
        } else if self.retention.as_secs() > 300 {
            errors.push("Event retention too long (maximum: 300s)".to_string());
        }

        if self.max_pending == 0 {
            errors.push("Max pending events must be greater than 0".to_string());
        } else if self.max_pending > 1_000_000 {
            errors.push(format!(
                "Max pending events too large: {} (max recommended: 1,000,000)",
                self.max_pending
            ));
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local address the UDP transport binds to (e.g., "0.0.0.0:2757")
    pub bind_address: String,

    /// Largest datagram accepted or sent, in bytes
    pub max_packet_size: usize,

    /// Peers tracked at once; datagrams from new addresses beyond this are dropped
    pub max_peers: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("127.0.0.1:0"),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_peers: DEFAULT_MAX_PEERS,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address format: '{}' (expected format: '0.0.0.0:2757')",
                self.bind_address
            ));
        }

        // marker + token + type, plus the routing byte
        if self.max_packet_size < 7 {
            errors.push("Max packet size too small (minimum: 7 bytes)".to_string());
        } else if self.max_packet_size > 65_507 {
            errors.push(format!(
                "Max packet size too large: {} bytes (UDP maximum: 65507)",
                self.max_packet_size
            ));
        }

        if self.max_peers == 0 {
            errors.push("Max peers must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("session-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
