//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use volley_transport::ChannelOptions;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Session`](crate::Session).
///
/// Durations are stored as milliseconds so the config reads naturally from
/// JSON or TOML. Every field has a default; a config file only needs to
/// name what it changes:
///
/// ```rust
/// use volley_session::SessionConfig;
///
/// let config: SessionConfig =
///     serde_json::from_str(r#"{"host": "rt.example.com", "port": 4000}"#).unwrap();
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Server host name or address.
    pub host: String,

    /// Server TCP port.
    pub port: u16,

    /// Reconnect automatically after a network failure.
    pub reconnect: bool,

    /// Delay before an automatic reconnect attempt.
    pub reconnect_delay_ms: u64,

    /// Consecutive failed reconnects allowed before giving up. The next
    /// attempt after the budget is spent fails without touching the
    /// network and resets the counter.
    pub max_retries: u32,

    /// Idle time before the TCP channel sends a heartbeat byte.
    pub tcp_heartbeat_ms: u64,

    /// Idle time before the UDP channel resends a heartbeat datagram.
    pub udp_heartbeat_ms: u64,

    /// Silence from the server after which the TCP channel fails.
    pub peer_timeout_ms: u64,

    /// Upper bound on establishing the TCP connection.
    pub connect_timeout_ms: u64,

    /// Capacity of the session actor's command queue.
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            reconnect: true,
            reconnect_delay_ms: 1000,
            max_retries: 3,
            tcp_heartbeat_ms: 200,
            udp_heartbeat_ms: 200,
            peer_timeout_ms: 15_000,
            connect_timeout_ms: 5_000,
            command_buffer: 256,
        }
    }
}

impl SessionConfig {
    /// Default settings pointed at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub(crate) fn tcp_options(&self) -> ChannelOptions {
        ChannelOptions {
            heartbeat_interval: Duration::from_millis(self.tcp_heartbeat_ms),
            peer_timeout: Duration::from_millis(self.peer_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub(crate) fn udp_options(&self) -> ChannelOptions {
        ChannelOptions {
            heartbeat_interval: Duration::from_millis(self.udp_heartbeat_ms),
            ..self.tcp_options()
        }
    }
}
