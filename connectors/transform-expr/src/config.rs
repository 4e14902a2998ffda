use rivulet_sdk::types::{ConnectorError, FieldType};
use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_MAX_OPERATIONS: u64 = 100_000;

fn default_max_operations() -> u64 {
    DEFAULT_MAX_OPERATIONS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub rules: Vec<TransformRule>,
    /// Upper bound on script operations per rule evaluation; 0 disables it.
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
}

/// One output field: `target` gets the value of `expr`, coerced to `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRule {
    pub target: String,
    pub expr: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl TransformRule {
    pub fn new(target: impl Into<String>, expr: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            target: target.into(),
            expr: expr.into(),
            field_type,
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl TransformConfig {
    #[must_use]
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self {
            rules,
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }

    /// Deserialize from a component's free-form `config` value.
    ///
    /// # Errors
    ///
    /// Returns a `Config` category error if the value does not match.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConnectorError> {
        Self::deserialize(value)
            .map_err(|e| ConnectorError::config("INVALID_CONFIG", format!("transform config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_defaults() {
        let config = TransformConfig::from_value(&json!({
            "rules": [{"target": "full_name", "expr": "a + b", "type": "string"}]
        }))
        .unwrap();
        assert_eq!(config.max_operations, DEFAULT_MAX_OPERATIONS);
        assert!(!config.rules[0].required);
        assert_eq!(config.rules[0].field_type, FieldType::String);
    }

    #[test]
    fn missing_rules_is_a_config_error() {
        let err = TransformConfig::from_value(&json!({})).unwrap_err();
        assert_eq!(err.code, "INVALID_CONFIG");
        assert!(err.message.contains("rules"));
    }

    #[test]
    fn unknown_type_rejected() {
        let err = TransformConfig::from_value(&json!({
            "rules": [{"target": "x", "expr": "1", "type": "timestamp"}]
        }))
        .unwrap_err();
        assert!(err.message.contains("timestamp"));
    }
}
