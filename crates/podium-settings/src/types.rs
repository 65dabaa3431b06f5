//! Settings types with compiled defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PodiumSettings {
    /// Public domain name the pages use to reach the WebSocket endpoint.
    pub domain_name: String,
    /// Listener and relay tuning.
    pub server: ServerSettings,
    /// Template and static asset locations.
    pub paths: PathSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and relay settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds between heartbeat pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is closed.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Lifetime drops tolerated before a slow connection is removed.
    pub max_dropped_messages: u64,
    /// Whether a sender receives its own broadcasts.
    pub echo_to_sender: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024, // 1 MB
            send_queue_capacity: 256,
            max_dropped_messages: 100,
            echo_to_sender: true,
        }
    }
}

/// Filesystem locations for the presentation routes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    /// Directory holding `presenter.html` and `audience.html`.
    pub templates_dir: PathBuf,
    /// Directory mounted at `/static`.
    pub static_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
