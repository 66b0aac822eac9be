//! Settings loading with deep merge and environment variable overrides.
//!
//! 1. Start with [`NimbusSettings::default()`]
//! 2. If `~/.nimbus/settings.json` exists, deep-merge it over the defaults
//! 3. Apply `NIMBUS_*` environment overrides
//! 4. Validate
//!
//! Objects merge recursively; arrays and primitives are replaced; nulls in the
//! file are skipped.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::NimbusSettings;

/// Endpoint override.
pub const ENV_WS_URL: &str = "NIMBUS_WS_URL";
/// Acknowledgement timeout override in milliseconds; `0` disables it.
pub const ENV_COMMAND_TIMEOUT_MS: &str = "NIMBUS_COMMAND_TIMEOUT_MS";
/// Inbound frame buffer override.
pub const ENV_INBOUND_BUFFER: &str = "NIMBUS_INBOUND_BUFFER";
/// Log filter override.
pub const ENV_LOG_LEVEL: &str = "NIMBUS_LOG_LEVEL";

/// Path of the user settings file (`~/.nimbus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nimbus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<NimbusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults; unreadable or invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<NimbusSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, resolving overrides through `env`.
///
/// `env` stands in for the process environment so callers can inject one.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<NimbusSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(NimbusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: NimbusSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    validate(&settings)?;
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

/// Apply `NIMBUS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut NimbusSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides resolved through `env`. Invalid values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut NimbusSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env(ENV_WS_URL).filter(|v| !v.is_empty()) {
        settings.realtime.ws_url = v;
    }
    if let Some(raw) = env(ENV_COMMAND_TIMEOUT_MS) {
        match parse_u64_range(&raw, 0, 3_600_000) {
            Some(0) => settings.realtime.command_timeout_ms = None,
            Some(ms) => settings.realtime.command_timeout_ms = Some(ms),
            None => warn!(key = ENV_COMMAND_TIMEOUT_MS, value = %raw, "invalid env var, ignoring"),
        }
    }
    if let Some(raw) = env(ENV_INBOUND_BUFFER) {
        match parse_usize_range(&raw, 1, 1_000_000) {
            Some(n) => settings.realtime.inbound_buffer = n,
            None => warn!(key = ENV_INBOUND_BUFFER, value = %raw, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = env(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
        settings.logging.level = v;
    }
}

fn validate(settings: &NimbusSettings) -> Result<()> {
    let rt = &settings.realtime;
    if rt.ws_url.is_empty() {
        return Err(SettingsError::InvalidValue {
            field: "realtime.wsUrl",
            reason: "must not be empty".into(),
        });
    }
    if rt.inbound_buffer == 0 {
        return Err(SettingsError::InvalidValue {
            field: "realtime.inboundBuffer",
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
