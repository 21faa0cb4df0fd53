//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial; missing fields keep their default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "addr": "0.0.0.0:4433", "origin": "https://example.com" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and relay behaviour.
    pub server: ServerSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason| Err(SettingsError::Invalid { field, reason });
        match (&self.server.cert_path, &self.server.key_path) {
            (Some(_), None) => return invalid("server.keyPath", "required when certPath is set"),
            (None, Some(_)) => return invalid("server.certPath", "required when keyPath is set"),
            _ => {}
        }
        if self.server.send_queue_capacity == 0 {
            return invalid("server.sendQueueCapacity", "must be at least 1");
        }
        if self.server.max_connections == 0 {
            return invalid("server.maxConnections", "must be at least 1");
        }
        Ok(())
    }
}

/// Server network and relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Listen address (`host:port`).
    pub addr: String,
    /// Allowed `Origin` for upgrades, echoed in CORS responses. Empty allows any.
    pub origin: String,
    /// PEM certificate chain. TLS is enabled when both paths are set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    /// PEM private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// Live connection cap; upgrades beyond it get `429`.
    pub max_connections: usize,
    /// Server ping interval in seconds (0 disables pings).
    pub heartbeat_interval_secs: u64,
    /// Close sessions that stay silent this long, in seconds (0 disables).
    pub idle_timeout_secs: u64,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Max WebSocket message and POST body size in bytes.
    pub max_message_size: usize,
    /// Address for the Prometheus `/metrics` listener, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_addr: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "localhost:4433".to_string(),
            origin: String::new(),
            cert_path: None,
            key_path: None,
            max_connections: usize::try_from(i32::MAX).unwrap_or(usize::MAX),
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 0,
            send_queue_capacity: 256,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            metrics_addr: None,
        }
    }
}

/// Log verbosity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level written to stderr.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}
