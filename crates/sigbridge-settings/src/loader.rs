//! Settings loading.
//!
//! Loading flow:
//! 1. Serialize [`BridgeSettings::default()`] to JSON
//! 2. If `~/.sigbridge/settings.json` exists, deep-merge it over the defaults
//! 3. Deserialize, then apply `SIGBRIDGE_*` overrides
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use sigbridge_core::logging::LogFormat;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::BridgeSettings;

/// `~/.sigbridge/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sigbridge").join("settings.json")
}

/// Load from [`settings_path`].
pub fn load_settings() -> Result<BridgeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, apply env overrides, validate.
///
/// A missing file yields defaults. Unparseable JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    let defaults = serde_json::to_value(BridgeSettings::default())?;

    let merged = match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "loading settings file");
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no settings file, using defaults");
            defaults
        }
        Err(e) => return Err(e.into()),
    };

    let mut settings: BridgeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

/// Merge `overlay` into `base`.
///
/// Objects merge key by key. Everything else in `overlay` replaces `base`,
/// except `null`, which leaves `base` untouched.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map.into_iter().filter(|(_, v)| !v.is_null()) {
                let next = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base_map.insert(key, next);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Apply `SIGBRIDGE_*` overrides read through `lookup`.
///
/// Empty or out-of-range values are logged and ignored.
pub fn apply_env_overrides<F>(settings: &mut BridgeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("SIGBRIDGE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("SIGBRIDGE_PORT", 0, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("SIGBRIDGE_SIGNAL_HOST") {
        settings.transport.host = v;
    }
    if let Some(v) = env.u16("SIGBRIDGE_SIGNAL_PORT", 0, u16::MAX) {
        settings.transport.signal_port = v;
    }
    if let Some(v) = env.u16("SIGBRIDGE_COMMAND_PORT", 1, u16::MAX) {
        settings.transport.command_port = v;
    }
    if let Some(v) = env.string("SIGBRIDGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("SIGBRIDGE_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => warn!(key = "SIGBRIDGE_LOG_FORMAT", error = %e, "ignoring"),
        }
    }
    if let Some(v) = env.u64("SIGBRIDGE_APP_PROBE_INTERVAL_MS", 10, 3_600_000) {
        settings.probes.app.interval_ms = v;
    }
    if let Some(v) = env.i64("SIGBRIDGE_APP_PROBE_TIMEOUT_MS", -1, 3_600_000) {
        settings.probes.app.timeout_ms = v;
    }
    if let Some(v) = env.bool("SIGBRIDGE_AUTO_PONG") {
        settings.probes.auto_pong = v;
    }
}

// ── Pure parsers ────────────────────────────────────────────────────────────

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitive.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an integer and keep it only when inside `min..=max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn checked<T>(&self, key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let raw = self.string(key)?;
        let parsed = parse(&raw);
        if parsed.is_none() {
            warn!(key, value = %raw, "invalid env override, ignoring");
        }
        parsed
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.checked(key, parse_bool)
    }

    fn u16(&self, key: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(key, |v| parse_in_range(v, min, max))
    }

    fn u64(&self, key: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(key, |v| parse_in_range(v, min, max))
    }

    fn i64(&self, key: &str, min: i64, max: i64) -> Option<i64> {
        self.checked(key, |v| parse_in_range(v, min, max))
    }
}
