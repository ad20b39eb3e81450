//! Declarative integration configuration: the per-integration specification
//! of recognized options, and the typed values loaded from the environment.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Recognized configuration value types, per the integration specification
/// file (`configurations` list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigValueType {
    String,
    Integer,
    Boolean,
    Url,
    Object,
    Array,
}

/// One declared configuration option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOptionSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ConfigValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

/// The full declared specification for one integration type: its name,
/// supported features/kinds, and configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSpec {
    #[serde(rename = "type")]
    pub integration_type: String,
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
    pub configurations: Vec<ConfigOptionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Error raised while validating a loaded integration config against its
/// declared spec.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IntegrationConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("missing required configuration key: {0}")]
    MissingRequired(String),

    #[error("configuration key `{key}` has the wrong type: expected {expected:?}")]
    WrongType {
        key: String,
        expected: ConfigValueType,
    },
}

/// The validated, typed configuration for one running integration
/// instance. Values are stored as JSON for uniform access; callers that
/// know the declared type can extract a typed view with the `as_*` helpers.
#[derive(Debug, Clone, Default)]
pub struct IntegrationConfig {
    values: BTreeMap<String, Value>,
    sensitive_keys: Vec<String>,
}

impl IntegrationConfig {
    /// Build and validate a config from raw key/value pairs (as read from
    /// `OCEAN__`-prefixed environment variables) against a declared spec.
    /// Unknown keys are rejected; missing required keys are rejected;
    /// missing optional keys fall back to their declared default.
    pub fn from_raw(
        raw: BTreeMap<String, Value>,
        spec: &IntegrationSpec,
    ) -> Result<Self, IntegrationConfigError> {
        let known: BTreeMap<&str, &ConfigOptionSpec> = spec
            .configurations
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect();

        for key in raw.keys() {
            if !known.contains_key(key.as_str()) {
                return Err(IntegrationConfigError::UnknownKey(key.clone()));
            }
        }

        let mut values = BTreeMap::new();
        let mut sensitive_keys = Vec::new();

        for option in &spec.configurations {
            if option.sensitive {
                sensitive_keys.push(option.name.clone());
            }
            match raw.get(&option.name) {
                Some(value) => {
                    Self::check_type(&option.name, value, option.value_type)?;
                    values.insert(option.name.clone(), value.clone());
                }
                None => {
                    if option.required && option.default.is_none() {
                        return Err(IntegrationConfigError::MissingRequired(option.name.clone()));
                    }
                    if let Some(default) = &option.default {
                        values.insert(option.name.clone(), default.clone());
                    }
                }
            }
        }

        Ok(Self {
            values,
            sensitive_keys,
        })
    }

    fn check_type(
        key: &str,
        value: &Value,
        expected: ConfigValueType,
    ) -> Result<(), IntegrationConfigError> {
        let matches = match expected {
            ConfigValueType::String | ConfigValueType::Url => value.is_string(),
            ConfigValueType::Integer => value.is_i64() || value.is_u64(),
            ConfigValueType::Boolean => value.is_boolean(),
            ConfigValueType::Object => value.is_object(),
            ConfigValueType::Array => value.is_array(),
        };
        if matches {
            Ok(())
        } else {
            Err(IntegrationConfigError::WrongType {
                key: key.to_string(),
                expected,
            })
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys.iter().any(|k| k == key)
    }

    /// A redacted view safe to pass to the logging layer: sensitive values
    /// are replaced with `"***"`.
    pub fn redacted(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| {
                if self.is_sensitive(k) {
                    (k.clone(), Value::String("***".to_string()))
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> IntegrationSpec {
        IntegrationSpec {
            integration_type: "github".to_string(),
            features: vec![],
            configurations: vec![
                ConfigOptionSpec {
                    name: "github_token".to_string(),
                    value_type: ConfigValueType::String,
                    required: true,
                    sensitive: true,
                    default: None,
                    description: String::new(),
                },
                ConfigOptionSpec {
                    name: "org".to_string(),
                    value_type: ConfigValueType::String,
                    required: false,
                    sensitive: false,
                    default: Some(json!("my-org")),
                    description: String::new(),
                },
            ],
        }
    }

    #[test]
    fn unknown_key_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert("github_token".to_string(), json!("secret"));
        raw.insert("bogus".to_string(), json!("x"));
        let err = IntegrationConfig::from_raw(raw, &spec()).unwrap_err();
        assert_eq!(err, IntegrationConfigError::UnknownKey("bogus".to_string()));
    }

    #[test]
    fn missing_required_rejected() {
        let raw = BTreeMap::new();
        let err = IntegrationConfig::from_raw(raw, &spec()).unwrap_err();
        assert_eq!(
            err,
            IntegrationConfigError::MissingRequired("github_token".to_string())
        );
    }

    #[test]
    fn optional_falls_back_to_default() {
        let mut raw = BTreeMap::new();
        raw.insert("github_token".to_string(), json!("secret"));
        let config = IntegrationConfig::from_raw(raw, &spec()).unwrap();
        assert_eq!(config.get_str("org"), Some("my-org"));
    }

    #[test]
    fn sensitive_values_are_redacted() {
        let mut raw = BTreeMap::new();
        raw.insert("github_token".to_string(), json!("secret"));
        let config = IntegrationConfig::from_raw(raw, &spec()).unwrap();
        let redacted = config.redacted();
        assert_eq!(redacted.get("github_token"), Some(&json!("***")));
        assert_eq!(config.get_str("github_token"), Some("secret"));
    }

    #[test]
    fn wrong_type_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert("github_token".to_string(), json!(123));
        let err = IntegrationConfig::from_raw(raw, &spec()).unwrap_err();
        assert_eq!(
            err,
            IntegrationConfigError::WrongType {
                key: "github_token".to_string(),
                expected: ConfigValueType::String
            }
        );
    }
}
