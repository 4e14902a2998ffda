//! Typed field values.
//!
//! [`Value`] is a closed sum type: every variant implies its [`FieldType`],
//! so a value can never disagree with its own tag.

use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Unknown,
    String,
    Int64,
    Float64,
    Boolean,
    List,
    Dict,
    Decimal,
    Json,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Decimal => "decimal",
            Self::Json => "json",
        };
        f.write_str(s)
    }
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent or untyped value; reports [`FieldType::Unknown`].
    Null,
    String(String),
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Decimal(BigDecimal),
    Json(serde_json::Value),
}

impl Value {
    /// The type tag implied by this variant.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Null => FieldType::Unknown,
            Self::String(_) => FieldType::String,
            Self::Int64(_) => FieldType::Int64,
            Self::Float64(_) => FieldType::Float64,
            Self::Boolean(_) => FieldType::Boolean,
            Self::List(_) => FieldType::List,
            Self::Dict(_) => FieldType::Dict,
            Self::Decimal(_) => FieldType::Decimal,
            Self::Json(_) => FieldType::Json,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int64(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Self::Decimal(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn field_type_follows_variant() {
        assert_eq!(Value::Null.field_type(), FieldType::Unknown);
        assert_eq!(Value::from("x").field_type(), FieldType::String);
        assert_eq!(Value::from(1_i64).field_type(), FieldType::Int64);
        assert_eq!(Value::from(1.5).field_type(), FieldType::Float64);
        assert_eq!(Value::from(true).field_type(), FieldType::Boolean);
        assert_eq!(Value::List(vec![]).field_type(), FieldType::List);
        assert_eq!(Value::Dict(BTreeMap::new()).field_type(), FieldType::Dict);
        assert_eq!(
            Value::from(BigDecimal::from_str("1.25").unwrap()).field_type(),
            FieldType::Decimal
        );
        assert_eq!(
            Value::Json(serde_json::json!({"a": 1})).field_type(),
            FieldType::Json
        );
    }

    #[test]
    fn field_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&FieldType::Int64).unwrap();
        assert_eq!(json, "\"int64\"");
        let back: FieldType = serde_json::from_str("\"float64\"").unwrap();
        assert_eq!(back, FieldType::Float64);
        assert_eq!(FieldType::Boolean.to_string(), "boolean");
    }

    #[test]
    fn value_serde_is_tagged() {
        let json = serde_json::to_value(Value::from(42_i64)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int64", "value": 42}));
    }

    #[test]
    fn accessors_match_only_their_variant() {
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert_eq!(Value::from(7_i64).as_str(), None);
        assert_eq!(Value::from(7_i64).as_i64(), Some(7));
        assert_eq!(Value::from(7.0).as_i64(), None);
        assert!(Value::Null.is_null());
    }
}
