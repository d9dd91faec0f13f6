//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `BEACON_*` environment variable overrides (highest priority)
//! 4. Run [`BeaconSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BeaconSettings;

/// Upper bound for the keepalive interval accepted from the environment (one day).
const MAX_INTERVAL_MS: u64 = 86_400_000;

/// Resolve the path to the settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BeaconSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
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
/// Invalid values are ignored with a warning and the file/default value stays.
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("BEACON_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("BEACON_EMIT_TOKEN") {
        settings.server.emit_token = Some(v);
    }

    // ── WebSocket keepalive ─────────────────────────────────────────
    if let Some(v) = read_env_bool("BEACON_WEBSOCKET_USEPINGPONG") {
        settings.websocket.keepalive.enabled = v;
    }
    if let Some(v) = read_env_u64("BEACON_WEBSOCKET_MILLIS_PINGPONG", 100, MAX_INTERVAL_MS) {
        settings.websocket.keepalive.interval_ms = v;
    }
    if let Some(v) = read_env_u64("BEACON_WEBSOCKET_ACK_TIMEOUT_MS", 100, MAX_INTERVAL_MS) {
        settings.websocket.keepalive.ack_timeout_ms = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within an inclusive range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
