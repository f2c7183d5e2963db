//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with [`Settings::default()`]
//! 2. If a settings file was given, overlay its values on the defaults
//! 3. Apply `SWITCHBOARD_*` environment overrides
//!
//! Command-line flags are applied on top by the caller.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_logging::LoggingConfig;
use switchboard_server::ServerConfig;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON or has the wrong shape.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value was rejected.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Settings for the demo broadcaster.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// `WebSocket` URI that receives tick broadcasts.
    pub tick_uri: String,
    /// Milliseconds between ticks. `0` disables the ticker.
    pub tick_interval_ms: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            tick_uri: "/ws".into(),
            tick_interval_ms: 1000,
        }
    }
}

/// Everything the binary reads from disk and the environment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listener and transport limits.
    pub server: ServerConfig,
    /// Subscriber setup.
    pub logging: LoggingConfig,
    /// Demo broadcaster.
    pub demo: DemoSettings,
}

/// Load settings from `path` (if any) with environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut merged = serde_json::to_value(Settings::default())?;
    if let Some(path) = path {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        merge_overlay(&mut merged, serde_json::from_str(&content)?);
    }

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Lay `overlay` over `base` in place.
///
/// Objects recurse key by key. Any other overlay value replaces the base
/// value outright. A `null` overlay leaves the base untouched, so a settings
/// file can spell out a key without overriding its default.
pub fn merge_overlay(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_overlay(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `SWITCHBOARD_*` overrides read through `lookup`.
///
/// Empty values are ignored. Unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("SWITCHBOARD_PORT").and_then(|v| parse_or_warn("SWITCHBOARD_PORT", &v)) {
        settings.server.port = v;
    }
    if let Some(v) = read("SWITCHBOARD_DOCUMENT_ROOT") {
        settings.server.document_root = Some(PathBuf::from(v));
    }
    if let Some(v) = read("SWITCHBOARD_NUM_THREADS")
        .and_then(|v| parse_or_warn::<usize>("SWITCHBOARD_NUM_THREADS", &v))
        .filter(|n| *n > 0)
    {
        settings.server.worker_threads = Some(v);
    }
    if let Some(v) =
        read("SWITCHBOARD_LOG_LEVEL").and_then(|v| parse_or_warn("SWITCHBOARD_LOG_LEVEL", &v))
    {
        settings.logging.level = v;
    }
    if let Some(v) = read("SWITCHBOARD_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => warn!(
                key = "SWITCHBOARD_LOG_JSON",
                value = %v,
                "invalid boolean env var, ignoring"
            ),
        }
    }
}

/// Split repeated `KEY=VALUE` arguments into a flat key/value list.
pub fn option_pairs(args: &[String]) -> Result<Vec<String>> {
    let mut pairs = Vec::with_capacity(args.len() * 2);
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(SettingsError::InvalidValue(format!("option {arg:?} is not KEY=VALUE")));
        };
        if key.trim().is_empty() {
            return Err(SettingsError::InvalidValue(format!("option {arg:?} has an empty key")));
        }
        pairs.push(key.trim().to_owned());
        pairs.push(value.to_owned());
    }
    Ok(pairs)
}

fn parse_or_warn<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!(key = name, value, "invalid env var, ignoring");
    }
    parsed
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
