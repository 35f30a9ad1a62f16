//! Settings types.
//!
//! Every section deserializes with `#[serde(default)]` so a partial user
//! file only needs to name the keys it changes.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Accepted `liveness.heartbeatTimeoutMs` values.
pub const HEARTBEAT_TIMEOUT_MS: RangeInclusive<u64> = 100..=3_600_000;
/// Accepted `liveness.pongWriteTimeoutMs` values.
pub const PONG_WRITE_TIMEOUT_MS: RangeInclusive<u64> = 10..=60_000;
/// Accepted `liveness.pongJitterMs` values.
pub const PONG_JITTER_MS: RangeInclusive<u64> = 0..=10_000;
/// Accepted `broadcast.writeTimeoutMs` values.
pub const BROADCAST_WRITE_TIMEOUT_MS: RangeInclusive<u64> = 10..=60_000;
/// Accepted `shutdown.drainTimeoutMs` values.
pub const DRAIN_TIMEOUT_MS: RangeInclusive<u64> = 0..=600_000;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlopSettings {
    /// Network and connection limits.
    pub server: ServerSettings,
    /// Read deadlines and heartbeat replies.
    pub liveness: LivenessSettings,
    /// Broadcast delivery.
    pub broadcast: BroadcastSettings,
    /// Process shutdown.
    pub shutdown: ShutdownSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BlopSettings {
    /// Reject values that would make the server unusable.
    ///
    /// Timeouts share their bounds with the `BLOP_*` env overrides, so a
    /// settings file cannot ask for a deadline the runtime cannot represent.
    pub fn validate(&self) -> Result<()> {
        check_range(
            "liveness.heartbeatTimeoutMs",
            self.liveness.heartbeat_timeout_ms,
            &HEARTBEAT_TIMEOUT_MS,
        )?;
        check_range(
            "liveness.pongWriteTimeoutMs",
            self.liveness.pong_write_timeout_ms,
            &PONG_WRITE_TIMEOUT_MS,
        )?;
        check_range(
            "liveness.pongJitterMs",
            self.liveness.pong_jitter_ms,
            &PONG_JITTER_MS,
        )?;
        check_range(
            "broadcast.writeTimeoutMs",
            self.broadcast.write_timeout_ms,
            &BROADCAST_WRITE_TIMEOUT_MS,
        )?;
        check_range(
            "shutdown.drainTimeoutMs",
            self.shutdown.drain_timeout_ms,
            &DRAIN_TIMEOUT_MS,
        )?;
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn check_range(key: &str, value: u64, range: &RangeInclusive<u64>) -> Result<()> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(SettingsError::InvalidValue(format!(
        "{key} must be between {} and {}, got {value}",
        range.start(),
        range.end()
    )))
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port to bind (`0` picks an ephemeral port).
    pub port: u16,
    /// Maximum registered sessions; `0` means unlimited.
    pub max_connections: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 0,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Liveness and heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Window of silence after which a session is dropped.
    pub heartbeat_timeout_ms: u64,
    /// Write deadline for a pong reply.
    pub pong_write_timeout_ms: u64,
    /// Upper bound of a random delay before each pong (`0` disables it).
    pub pong_jitter_ms: u64,
}

impl LivenessSettings {
    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Pong write deadline as a [`Duration`].
    pub fn pong_write_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_write_timeout_ms)
    }

    /// Pong jitter bound as a [`Duration`].
    pub fn pong_jitter(&self) -> Duration {
        Duration::from_millis(self.pong_jitter_ms)
    }
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 60_000,
            pong_write_timeout_ms: 500,
            pong_jitter_ms: 0,
        }
    }
}

/// Broadcast settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Per-recipient write deadline.
    pub write_timeout_ms: u64,
}

impl BroadcastSettings {
    /// Write deadline as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: 2_000,
        }
    }
}

/// Shutdown settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// Upper bound on waiting for the server task and session loops after sockets are closed.
    pub drain_timeout_ms: u64,
}

impl ShutdownSettings {
    /// Drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` takes precedence).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
