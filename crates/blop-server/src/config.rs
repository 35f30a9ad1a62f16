//! Server configuration.

use std::time::Duration;

use blop_settings::BlopSettings;

/// Timing knobs shared by every session loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Silence window after which a session is dropped.
    pub heartbeat_timeout: Duration,
    /// Write deadline for pong replies.
    pub pong_write_timeout: Duration,
    /// Upper bound of the random delay before a pong (zero disables it).
    pub pong_jitter: Duration,
    /// Per-recipient write deadline for broadcasts.
    pub broadcast_write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            pong_write_timeout: Duration::from_millis(500),
            pong_jitter: Duration::ZERO,
            broadcast_write_timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration for the blop server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum registered sessions; `0` means unlimited.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Session timing.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 0,
            max_message_size: 1024 * 1024,
            session: SessionConfig::default(),
        }
    }
}

impl From<&BlopSettings> for ServerConfig {
    fn from(settings: &BlopSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            session: SessionConfig {
                heartbeat_timeout: settings.liveness.heartbeat_timeout(),
                pong_write_timeout: settings.liveness.pong_write_timeout(),
                pong_jitter: settings.liveness.pong_jitter(),
                broadcast_write_timeout: settings.broadcast.write_timeout(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 0);
    }

    #[test]
    fn default_session_timing() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(cfg.pong_write_timeout, Duration::from_millis(500));
        assert_eq!(cfg.pong_jitter, Duration::ZERO);
        assert_eq!(cfg.broadcast_write_timeout, Duration::from_secs(2));
    }

    #[test]
    fn from_settings() {
        let mut settings = BlopSettings::default();
        settings.server.host = "0.0.0.0".into();
        settings.server.port = 9000;
        settings.server.max_connections = 8;
        settings.liveness.heartbeat_timeout_ms = 1_500;
        settings.liveness.pong_jitter_ms = 20;
        settings.broadcast.write_timeout_ms = 300;

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.session.heartbeat_timeout, Duration::from_millis(1_500));
        assert_eq!(cfg.session.pong_jitter, Duration::from_millis(20));
        assert_eq!(cfg.session.broadcast_write_timeout, Duration::from_millis(300));
    }
}
