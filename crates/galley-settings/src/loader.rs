//! Settings loading: defaults, then the settings file, then `GALLEY_*` env vars.
//!
//! Merge rules for the settings file:
//! - objects merge recursively, file keys win
//! - arrays and primitives are replaced
//! - `null` in the file keeps the default

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GalleySettings;

/// Env var that points at an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "GALLEY_SETTINGS";

/// Resolve the settings file: `$GALLEY_SETTINGS`, else `~/.galley/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".galley").join("settings.json")
}

/// Load from `path` with env overrides applied.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GalleySettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Load from `path`, reading overrides through `env`.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<GalleySettings> {
    let defaults = serde_json::to_value(GalleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: GalleySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate();
    Ok(settings)
}

/// Recursive JSON merge; `source` wins, `null` in `source` is skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut merged), Value::Object(overrides)) => {
            for (key, value) in overrides {
                if value.is_null() {
                    continue;
                }
                let next = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = merged.insert(key, next);
            }
            Value::Object(merged)
        }
        (_, source) => source,
    }
}

/// Apply `GALLEY_*` overrides read through `env`.
///
/// Values that fail to parse or fall outside their range are ignored
/// with a warning.
pub fn apply_env_overrides(settings: &mut GalleySettings, env: impl Fn(&str) -> Option<String>) {
    let env = EnvReader(env);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("GALLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("GALLEY_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = v as u16;
    }

    // ── Realtime ────────────────────────────────────────────────────
    let rt = &mut settings.realtime;
    if let Some(v) = env.u64("GALLEY_HEARTBEAT_INTERVAL_MS", 100, 3_600_000) {
        rt.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("GALLEY_HEARTBEAT_TIMEOUT_MS", 100, 7_200_000) {
        rt.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.u64("GALLEY_MESSAGE_TIMEOUT_MS", 100, 600_000) {
        rt.message_timeout_ms = v;
    }
    if let Some(v) = env.u64("GALLEY_MAX_RETRIES", 0, 100) {
        rt.max_retries = v as u32;
    }
    if let Some(v) = env.u64("GALLEY_MAX_QUEUE_SIZE", 1, 100_000) {
        rt.max_queue_size = v as usize;
    }
    if let Some(v) = env.u64("GALLEY_RECONNECT_DELAY_MS", 0, 600_000) {
        rt.reconnect_delay_ms = v;
    }
    if let Some(v) = env.u64("GALLEY_RECONNECT_MAX_ATTEMPTS", 1, 1_000) {
        rt.reconnect_max_attempts = v as u32;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("GALLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("GALLEY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsers ────────────────────────────────────────────────────────────

/// Parse `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off` (case-insensitive).
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` and require `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.0)(name)?;
        let parsed = parse_bool(&val);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        parsed
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.0)(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_keeps_siblings() {
        let merged = deep_merge(
            json!({"server": {"port": 8080, "host": "127.0.0.1"}}),
            json!({"server": {"port": 9090}}),
        );
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_null_is_skipped() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays_and_primitives() {
        let merged = deep_merge(json!({"a": [1, 2], "b": {"x": 1}}), json!({"a": [3], "b": 4}));
        assert_eq!(merged["a"], json!([3]));
        assert_eq!(merged["b"], 4);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let s = load_with_env(Path::new("/nonexistent/galley.json"), no_env).unwrap();
        assert_eq!(s, GalleySettings::default());
    }

    #[test]
    fn partial_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9191}, "realtime": {"maxQueueSize": 5, "maxRetries": null}}"#,
        )
        .unwrap();

        let s = load_with_env(&path, no_env).unwrap();
        assert_eq!(s.server.port, 9191);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.realtime.max_queue_size, 5);
        assert_eq!(s.realtime.max_retries, 3);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn loaded_settings_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"realtime": {"heartbeatIntervalMs": 5000, "heartbeatTimeoutMs": 1000}}"#,
        )
        .unwrap();
        let s = load_with_env(&path, no_env).unwrap();
        assert_eq!(s.realtime.heartbeat_timeout_ms, 10_000);
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9191}}"#).unwrap();

        let env = env_of(&[
            ("GALLEY_PORT", "7000"),
            ("GALLEY_HOST", "0.0.0.0"),
            ("GALLEY_MAX_QUEUE_SIZE", "250"),
            ("GALLEY_RECONNECT_MAX_ATTEMPTS", "8"),
            ("GALLEY_LOG_JSON", "yes"),
            ("GALLEY_LOG_LEVEL", "debug"),
        ]);
        let s = load_with_env(&path, env).unwrap();
        assert_eq!(s.server.port, 7000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.realtime.max_queue_size, 250);
        assert_eq!(s.realtime.reconnect_max_attempts, 8);
        assert!(s.logging.json);
        assert_eq!(s.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = GalleySettings::default();
        apply_env_overrides(
            &mut s,
            env_of(&[
                ("GALLEY_PORT", "70000"),
                ("GALLEY_MAX_RETRIES", "-1"),
                ("GALLEY_LOG_JSON", "maybe"),
                ("GALLEY_HOST", ""),
            ]),
        );
        assert_eq!(s, GalleySettings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
        assert_eq!(parse_u64_range("42", 1, 100), Some(42));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("x", 1, 100), None);
    }
}
