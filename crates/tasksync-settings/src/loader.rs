//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TaskSyncSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `TASKSYNC_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tasksync_core::ExclusionPolicy;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{BrokerBackend, MAX_PRESENCE_TTL_SECS, TaskSyncSettings};

/// Resolve the default settings file (`~/.tasksync/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tasksync").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TaskSyncSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<TaskSyncSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<TaskSyncSettings> {
    let defaults = serde_json::to_value(TaskSyncSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
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

/// Apply `TASKSYNC_*` environment overrides to loaded settings.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut TaskSyncSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Split out from [`apply_env_overrides`] so the mapping can be tested
/// without touching process environment.
pub fn apply_overrides<F>(settings: &mut TaskSyncSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("TASKSYNC_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = checked(read("TASKSYNC_PORT"), "TASKSYNC_PORT", |v| {
        parse_u16_range(v, 1, 65535)
    }) {
        settings.server.port = v;
    }
    if let Some(v) = checked(
        read("TASKSYNC_MAX_CONNECTIONS"),
        "TASKSYNC_MAX_CONNECTIONS",
        |v| parse_usize_range(v, 1, 1_000_000),
    ) {
        settings.server.max_connections = v;
    }
    if let Some(v) = checked(
        read("TASKSYNC_QUEUE_CAPACITY"),
        "TASKSYNC_QUEUE_CAPACITY",
        |v| parse_usize_range(v, 1, 65_536),
    ) {
        settings.server.outbound_queue_capacity = v;
    }
    if let Some(v) = checked(
        read("TASKSYNC_PING_INTERVAL_SECS"),
        "TASKSYNC_PING_INTERVAL_SECS",
        |v| parse_u64_range(v, 1, 3600),
    ) {
        settings.server.ping_interval_secs = v;
    }
    if let Some(v) = checked(
        read("TASKSYNC_PONG_TIMEOUT_SECS"),
        "TASKSYNC_PONG_TIMEOUT_SECS",
        |v| parse_u64_range(v, 1, MAX_PRESENCE_TTL_SECS),
    ) {
        settings.server.pong_timeout_secs = v;
    }
    if let Some(v) = checked(
        read("TASKSYNC_HANDLER_TIMEOUT_SECS"),
        "TASKSYNC_HANDLER_TIMEOUT_SECS",
        |v| parse_u64_range(v, 1, 600),
    ) {
        settings.server.handler_timeout_secs = v;
    }

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = checked(read("TASKSYNC_BROKER"), "TASKSYNC_BROKER", parse_backend) {
        settings.broker.backend = v;
    }
    if let Some(v) = read("TASKSYNC_REDIS_URL") {
        settings.broker.url = v;
    }

    // ── Presence / history / fanout ─────────────────────────────────
    if let Some(v) = checked(
        read("TASKSYNC_PRESENCE_TTL_SECS"),
        "TASKSYNC_PRESENCE_TTL_SECS",
        |v| parse_u64_range(v, 1, MAX_PRESENCE_TTL_SECS),
    ) {
        settings.presence.ttl_secs = v;
    }
    if let Some(v) = checked(read("TASKSYNC_HISTORY_CAP"), "TASKSYNC_HISTORY_CAP", |v| {
        parse_usize_range(v, 0, 10_000)
    }) {
        settings.history.cap = v;
    }
    if let Some(v) = checked(read("TASKSYNC_EXCLUSION"), "TASKSYNC_EXCLUSION", |v| {
        ExclusionPolicy::parse(v)
    }) {
        settings.fanout.exclusion = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("TASKSYNC_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = checked(read("TASKSYNC_LOG_JSON"), "TASKSYNC_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn checked<T>(raw: Option<String>, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let val = raw?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a broker backend name (`redis` or `memory`).
pub fn parse_backend(val: &str) -> Option<BrokerBackend> {
    match val.to_lowercase().as_str() {
        "redis" => Some(BrokerBackend::Redis),
        "memory" => Some(BrokerBackend::Memory),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> TaskSyncSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = TaskSyncSettings::default();
        apply_overrides(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8765, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = read_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.history.cap, 100);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"maxConnections": 50}, "fanout": {"exclusion": "connection"}, "broker": {"backend": "memory"}}"#,
        )
        .unwrap();

        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.server.max_connections, 50);
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.fanout.exclusion, ExclusionPolicy::Connection);
        assert_eq!(settings.broker.backend, BrokerBackend::Memory);
        assert_eq!(settings.broker.url, "redis://localhost:6379");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();

        assert!(read_file_layer(&path).is_err());
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"presence": {"ttlSecs": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_valid_values() {
        let settings = overrides(&[
            ("TASKSYNC_PORT", "9100"),
            ("TASKSYNC_BROKER", "memory"),
            ("TASKSYNC_REDIS_URL", "redis://cache:6380"),
            ("TASKSYNC_PRESENCE_TTL_SECS", "120"),
            ("TASKSYNC_HISTORY_CAP", "25"),
            ("TASKSYNC_EXCLUSION", "connection"),
            ("TASKSYNC_LOG_JSON", "yes"),
        ]);
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.broker.backend, BrokerBackend::Memory);
        assert_eq!(settings.broker.url, "redis://cache:6380");
        assert_eq!(settings.presence.ttl_secs, 120);
        assert_eq!(settings.history.cap, 25);
        assert_eq!(settings.fanout.exclusion, ExclusionPolicy::Connection);
        assert!(settings.logging.json);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let settings = overrides(&[
            ("TASKSYNC_PORT", "0"),
            ("TASKSYNC_BROKER", "kafka"),
            ("TASKSYNC_QUEUE_CAPACITY", "lots"),
            ("TASKSYNC_HOST", ""),
        ]);
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.broker.backend, BrokerBackend::Redis);
        assert_eq!(settings.server.outbound_queue_capacity, 256);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("30", 1, 3600), Some(30));
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }

    #[test]
    fn parse_backend_names() {
        assert_eq!(parse_backend("Redis"), Some(BrokerBackend::Redis));
        assert_eq!(parse_backend("memory"), Some(BrokerBackend::Memory));
        assert_eq!(parse_backend("nats"), None);
    }
}
