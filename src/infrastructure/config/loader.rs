//! Runtime configuration loader (§4.10): compiled-in defaults merged with
//! `OCEAN__`-prefixed environment variables.

use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("failed to extract configuration: {0}")]
    Extract(#[from] figment::Error),

    #[error("invalid configuration for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self { base_url: "https://api.getport.io".to_string(), timeout_seconds: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResyncConfig {
    pub polling_interval_seconds: u64,
    pub resync_interval_seconds: u64,
    pub cooperative_partition_empty_timeout_seconds: u64,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            polling_interval_seconds: 60,
            resync_interval_seconds: 3600,
            cooperative_partition_empty_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActionManagerSettings {
    pub workers_count: usize,
    pub poll_check_interval_seconds: u64,
    pub visibility_timeout_ms: u64,
    pub runs_buffer_high_watermark: usize,
    pub max_wait_seconds_before_shutdown: u64,
}

impl Default for ActionManagerSettings {
    fn default() -> Self {
        Self {
            workers_count: 4,
            poll_check_interval_seconds: 5,
            visibility_timeout_ms: 30_000,
            runs_buffer_high_watermark: 1000,
            max_wait_seconds_before_shutdown: 30,
        }
    }
}

impl ActionManagerSettings {
    pub fn to_manager_config(&self) -> crate::services::ActionManagerConfig {
        crate::services::ActionManagerConfig {
            workers_count: self.workers_count,
            poll_check_interval: Duration::from_secs(self.poll_check_interval_seconds),
            visibility_timeout_ms: self.visibility_timeout_ms,
            runs_buffer_high_watermark: self.runs_buffer_high_watermark,
            max_wait_before_shutdown: Duration::from_secs(self.max_wait_seconds_before_shutdown),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Json }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8000".to_string() }
    }
}

/// Process-wide, non-integration-specific configuration, per §4.9/§4.10.
/// Per-integration declared options go through
/// [`crate::domain::models::IntegrationConfig`] instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub portal: PortalConfig,
    pub resync: ResyncConfig,
    pub action_manager: ActionManagerSettings,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
}

/// `RuntimeConfig::default()` serialized to JSON, used as the schema of
/// known section/key names for unknown-key rejection.
fn known_keys() -> serde_json::Value {
    serde_json::to_value(RuntimeConfig::default()).expect("RuntimeConfig always serializes")
}

/// Returns the dotted path of the first key present in `actual` but absent
/// from `known`, recursing into nested objects. Value mismatches (wrong
/// type for an existing key) are left to `Figment::extract`.
fn find_unknown_key(known: &serde_json::Value, actual: &serde_json::Value, path: &str) -> Option<String> {
    let (serde_json::Value::Object(known_map), serde_json::Value::Object(actual_map)) = (known, actual) else {
        return None;
    };
    for (key, actual_val) in actual_map {
        let full_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
        match known_map.get(key) {
            None => return Some(full_path),
            Some(known_val) => {
                if let Some(found) = find_unknown_key(known_val, actual_val, &full_path) {
                    return Some(found);
                }
            }
        }
    }
    None
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `RuntimeConfig`, merging compiled-in defaults with
    /// `OCEAN__`-prefixed environment variables (nested keys joined by
    /// `__`). Figment itself happily deserializes a struct from a superset
    /// of its fields, so section and key names that don't exist on
    /// `RuntimeConfig` are diffed out by hand against the defaults before
    /// extraction; the `validate` pass below then rejects values that parse
    /// but are structurally meaningless (empty URLs, zero-sized pools, and
    /// so on).
    pub fn load() -> Result<RuntimeConfig, ConfigError> {
        let figment =
            Figment::new().merge(Serialized::defaults(RuntimeConfig::default())).merge(Env::prefixed("OCEAN__").split("__"));

        let known = known_keys();
        let merged: serde_json::Value = figment.extract()?;
        if let Some(unknown) = find_unknown_key(&known, &merged, "") {
            return Err(ConfigError::UnknownKey(unknown));
        }

        let config: RuntimeConfig = figment.extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
        if config.portal.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "portal.base_url".to_string(), reason: "must not be empty".to_string() });
        }
        if config.action_manager.workers_count == 0 {
            return Err(ConfigError::Invalid { field: "action_manager.workers_count".to_string(), reason: "must be at least 1".to_string() });
        }
        if config.resync.polling_interval_seconds == 0 {
            return Err(ConfigError::Invalid { field: "resync.polling_interval_seconds".to_string(), reason: "must be at least 1".to_string() });
        }
        Ok(())
    }
}
