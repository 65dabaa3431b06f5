//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use podium_settings::PodiumSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds (close after this long without a pong).
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Lifetime drops before a slow connection is removed.
    pub max_dropped_messages: u64,
    /// Whether the sender receives its own broadcasts.
    pub echo_to_sender: bool,
    /// Directory mounted at `/static` (`None` disables the mount).
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Map loaded settings onto the server configuration.
    pub fn from_settings(settings: &PodiumSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            heartbeat_interval_secs: server.heartbeat_interval_secs,
            heartbeat_timeout_secs: server.heartbeat_timeout_secs,
            max_message_size: server.max_message_size,
            send_queue_capacity: server.send_queue_capacity,
            max_dropped_messages: server.max_dropped_messages,
            echo_to_sender: server.echo_to_sender,
            static_dir: Some(settings.paths.static_dir.clone()),
        }
    }

    /// Heartbeat interval as a [`Duration`], never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024, // 1 MB
            send_queue_capacity: 256,
            max_dropped_messages: 100,
            echo_to_sender: true,
            static_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_any_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_echoes_to_sender() {
        assert!(ServerConfig::default().echo_to_sender);
    }

    #[test]
    fn heartbeat_durations() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 15,
            heartbeat_timeout_secs: 45,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn zero_heartbeat_interval_is_clamped() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn from_settings_copies_server_values() {
        let mut settings = PodiumSettings {
            domain_name: "example.org".into(),
            ..PodiumSettings::default()
        };
        settings.server.port = 9000;
        settings.server.send_queue_capacity = 8;
        settings.server.echo_to_sender = false;
        settings.paths.static_dir = PathBuf::from("/srv/static");

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.send_queue_capacity, 8);
        assert!(!cfg.echo_to_sender);
        assert_eq!(cfg.static_dir, Some(PathBuf::from("/srv/static")));
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_connections":5,"heartbeat_interval_secs":10,"heartbeat_timeout_secs":30,"max_message_size":512,"send_queue_capacity":4,"max_dropped_messages":2,"echo_to_sender":false,"static_dir":null}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_connections, 5);
        assert!(cfg.static_dir.is_none());
    }
}
