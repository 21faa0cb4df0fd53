//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ilam_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (`host:port`, default `"127.0.0.1:0"`).
    pub addr: String,
    /// Required `Origin` for upgrades and the CORS allow-origin. Empty allows any.
    pub origin: String,
    /// PEM certificate chain for TLS.
    pub cert_path: Option<PathBuf>,
    /// PEM private key for TLS.
    pub key_path: Option<PathBuf>,
    /// Upgrades are refused with `429` once this many connections are live.
    pub max_connections: usize,
    /// Ping interval in seconds (0 disables).
    pub heartbeat_interval_secs: u64,
    /// Idle timeout in seconds (0 disables).
    pub idle_timeout_secs: u64,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Max WebSocket message and POST body size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings {
            addr: "127.0.0.1:0".into(),
            ..ServerSettings::default()
        })
    }
}

impl ServerConfig {
    /// Build the runtime view of loaded settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            origin: settings.origin.clone(),
            cert_path: settings.cert_path.clone(),
            key_path: settings.key_path.clone(),
            max_connections: settings.max_connections,
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            idle_timeout_secs: settings.idle_timeout_secs,
            send_queue_capacity: settings.send_queue_capacity,
            max_message_size: settings.max_message_size,
        }
    }

    /// Ping interval, if enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    /// Idle timeout, if enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Certificate and key paths when both are set.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Value for `Access-Control-Allow-Origin`.
    pub fn allow_origin(&self) -> &str {
        if self.origin.is_empty() {
            "*"
        } else {
            &self.origin
        }
    }
}
