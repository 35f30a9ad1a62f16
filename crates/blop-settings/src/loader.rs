//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BlopSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{
    BROADCAST_WRITE_TIMEOUT_MS, BlopSettings, HEARTBEAT_TIMEOUT_MS, PONG_JITTER_MS,
    PONG_WRITE_TIMEOUT_MS,
};

/// Resolve the path to the settings file (`~/.blop/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".blop").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BlopSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<BlopSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Defaults with the settings file merged on top (no env overrides).
fn load_file_layer(path: &Path) -> Result<BlopSettings> {
    let defaults = serde_json::to_value(BlopSettings::default())?;

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

/// Apply `BLOP_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value stays.
pub fn apply_env_overrides<F>(settings: &mut BlopSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("BLOP_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("BLOP_PORT", &(0..=u64::from(u16::MAX))) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = env.u64("BLOP_MAX_CONNECTIONS", &(0..=1_000_000)) {
        settings.server.max_connections = usize::try_from(v).unwrap_or(usize::MAX);
    }

    // ── Liveness ────────────────────────────────────────────────────
    if let Some(v) = env.u64("BLOP_HEARTBEAT_TIMEOUT_MS", &HEARTBEAT_TIMEOUT_MS) {
        settings.liveness.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.u64("BLOP_PONG_WRITE_TIMEOUT_MS", &PONG_WRITE_TIMEOUT_MS) {
        settings.liveness.pong_write_timeout_ms = v;
    }
    if let Some(v) = env.u64("BLOP_PONG_JITTER_MS", &PONG_JITTER_MS) {
        settings.liveness.pong_jitter_ms = v;
    }

    // ── Broadcast ───────────────────────────────────────────────────
    if let Some(v) = env.u64("BLOP_BROADCAST_WRITE_TIMEOUT_MS", &BROADCAST_WRITE_TIMEOUT_MS) {
        settings.broadcast.write_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("BLOP_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("BLOP_LOG_JSON") {
        settings.logging.json = v;
    }
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, range: &RangeInclusive<u64>) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, *range.start(), *range.end());
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
