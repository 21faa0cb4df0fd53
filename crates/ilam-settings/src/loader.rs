//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, LogLevel, RelaySettings};

/// Resolve the default settings file path (`~/.ilam/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ilam").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value =
            serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (env in production, a map in tests).
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = string("ILAM_ADDR") {
        settings.server.addr = v;
    }
    if let Some(v) = string("ILAM_ORIGIN") {
        settings.server.origin = v;
    }
    if let Some(v) = string("ILAM_CERT") {
        settings.server.cert_path = Some(PathBuf::from(v));
    }
    if let Some(v) = string("ILAM_KEY") {
        settings.server.key_path = Some(PathBuf::from(v));
    }
    if let Some(v) = number("ILAM_MAX_CONNECTIONS", 1, u64::from(u32::MAX)) {
        settings.server.max_connections = usize::try_from(v).unwrap_or(usize::MAX);
    }
    if let Some(v) = number("ILAM_HEARTBEAT_INTERVAL", 0, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = number("ILAM_IDLE_TIMEOUT", 0, 86_400) {
        settings.server.idle_timeout_secs = v;
    }
    if let Some(v) = string("ILAM_METRICS_ADDR") {
        settings.server.metrics_addr = Some(v);
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = string("ILAM_LOG_LEVEL") {
        match parse_log_level(&v) {
            Some(level) => settings.logging.level = level,
            None => tracing::warn!(key = "ILAM_LOG_LEVEL", value = %v, "invalid log level, ignoring"),
        }
    }
    if let Some(v) = string("ILAM_LOG_FORMAT") {
        match v.to_lowercase().as_str() {
            "compact" => settings.logging.format = LogFormat::Compact,
            "json" => settings.logging.format = LogFormat::Json,
            _ => tracing::warn!(key = "ILAM_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a log level name (case-insensitive).
pub fn parse_log_level(val: &str) -> Option<LogLevel> {
    match val.to_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_keeps_sibling_server_fields() {
        let defaults = serde_json::json!({
            "server": {"addr": "localhost:4433", "origin": "", "heartbeatIntervalSecs": 30},
            "logging": {"level": "info"}
        });
        let user = serde_json::json!({"server": {"origin": "https://app.example"}});
        let merged = deep_merge(defaults, user);
        assert_eq!(merged["server"]["origin"], "https://app.example");
        assert_eq!(merged["server"]["addr"], "localhost:4433");
        assert_eq!(merged["server"]["heartbeatIntervalSecs"], 30);
        assert_eq!(merged["logging"]["level"], "info");
    }

    #[test]
    fn merge_skips_null_cert_path() {
        let defaults = serde_json::json!({"server": {"certPath": "/etc/ilam/cert.pem"}});
        let user = serde_json::json!({"server": {"certPath": null}});
        let merged = deep_merge(defaults, user);
        assert_eq!(merged["server"]["certPath"], "/etc/ilam/cert.pem");
    }

    #[test]
    fn merge_replaces_scalars_and_arrays_whole() {
        let defaults = serde_json::json!({"server": {"maxConnections": 100}, "tags": ["a", "b"]});
        let user = serde_json::json!({"server": {"maxConnections": 5}, "tags": ["c"]});
        let merged = deep_merge(defaults, user);
        assert_eq!(merged["server"]["maxConnections"], 5);
        assert_eq!(merged["tags"], serde_json::json!(["c"]));
    }

    #[test]
    fn merge_scalar_over_section_replaces_it() {
        let defaults = serde_json::json!({"logging": {"level": "info"}});
        let merged = deep_merge(defaults, serde_json::json!({"logging": "debug"}));
        assert_eq!(merged["logging"], "debug");
    }

    // ── read_settings_file ──────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.addr, "localhost:4433");
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"addr": "0.0.0.0:8443", "maxConnections": 10}, "logging": {"level": "debug"}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.addr, "0.0.0.0:8443");
        assert_eq!(settings.server.max_connections, 10);
        assert_eq!(settings.server.heartbeat_interval_secs, 30);
        assert_eq!(settings.logging.level, LogLevel::Debug);
    }

    #[test]
    fn tls_paths_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"certPath": "/etc/ilam/cert.pem", "keyPath": "/etc/ilam/key.pem"}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(
            settings.server.cert_path.as_deref(),
            Some(Path::new("/etc/ilam/cert.pem"))
        );
        assert_eq!(
            settings.server.key_path.as_deref(),
            Some(Path::new("/etc/ilam/key.pem"))
        );
    }

    #[test]
    fn invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = read_settings_file(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Parse { .. }));
    }

    #[test]
    fn wrong_value_type_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"maxConnections": "lots"}}"#).unwrap();

        let result = read_settings_file(&path);
        assert!(matches!(result, Err(SettingsError::Shape(_))));
    }

    #[test]
    fn half_configured_tls_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"certPath": "/etc/ilam/cert.pem"}}"#).unwrap();

        let result = read_settings_file(&path).and_then(|s| s.validate());
        assert!(matches!(result, Err(SettingsError::Invalid { field: "server.keyPath", .. })));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("ILAM_ADDR", "127.0.0.1:9000"),
                ("ILAM_ORIGIN", "https://app.example"),
                ("ILAM_CERT", "/c.pem"),
                ("ILAM_KEY", "/k.pem"),
                ("ILAM_MAX_CONNECTIONS", "500"),
                ("ILAM_HEARTBEAT_INTERVAL", "10"),
                ("ILAM_IDLE_TIMEOUT", "60"),
                ("ILAM_METRICS_ADDR", "127.0.0.1:9100"),
                ("ILAM_LOG_LEVEL", "WARN"),
                ("ILAM_LOG_FORMAT", "json"),
            ]),
        );
        assert_eq!(settings.server.addr, "127.0.0.1:9000");
        assert_eq!(settings.server.origin, "https://app.example");
        assert_eq!(settings.server.cert_path, Some(PathBuf::from("/c.pem")));
        assert_eq!(settings.server.key_path, Some(PathBuf::from("/k.pem")));
        assert_eq!(settings.server.max_connections, 500);
        assert_eq!(settings.server.heartbeat_interval_secs, 10);
        assert_eq!(settings.server.idle_timeout_secs, 60);
        assert_eq!(settings.server.metrics_addr.as_deref(), Some("127.0.0.1:9100"));
        assert_eq!(settings.logging.level, LogLevel::Warn);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("ILAM_ADDR", ""),
                ("ILAM_MAX_CONNECTIONS", "0"),
                ("ILAM_HEARTBEAT_INTERVAL", "abc"),
                ("ILAM_LOG_LEVEL", "loud"),
                ("ILAM_LOG_FORMAT", "xml"),
            ]),
        );
        let defaults = RelaySettings::default();
        assert_eq!(settings.server.addr, defaults.server.addr);
        assert_eq!(settings.server.max_connections, defaults.server.max_connections);
        assert_eq!(
            settings.server.heartbeat_interval_secs,
            defaults.server.heartbeat_interval_secs
        );
        assert_eq!(settings.logging.level, LogLevel::Info);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    // ── parsing helpers ─────────────────────────────────────────────

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("0", 1, 10), None);
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }

    #[test]
    fn parse_log_level_aliases() {
        assert_eq!(parse_log_level("Warning"), Some(LogLevel::Warn));
        assert_eq!(parse_log_level("TRACE"), Some(LogLevel::Trace));
        assert_eq!(parse_log_level("fatal"), None);
    }
}
