//! Conversions between record values and script values.

use rhai::{Array, Dynamic, Map};
use rivulet_sdk::types::{FieldType, Value};

/// Script-side view of a field value.
pub(crate) fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Int64(i) => Dynamic::from_int(*i),
        Value::Float64(f) => Dynamic::from_float(*f),
        Value::Boolean(b) => Dynamic::from_bool(*b),
        Value::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect::<Array>()),
        Value::Dict(entries) => {
            let map: Map = entries
                .iter()
                .map(|(k, v)| (k.as_str().into(), to_dynamic(v)))
                .collect();
            Dynamic::from_map(map)
        }
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map_or(Dynamic::UNIT, Dynamic::from_float),
        Value::Json(json) => rhai::serde::to_dynamic(json).unwrap_or(Dynamic::UNIT),
    }
}

/// Why a script result could not be stored as the declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CoerceError {
    Mismatch {
        expected: FieldType,
        actual: &'static str,
    },
    Unsupported(FieldType),
}

/// Convert a script result into `field_type`.
///
/// Floats stored as `Int64` are truncated toward zero. Out of range values
/// saturate at the `i64` bounds and NaN becomes 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(crate) fn coerce(value: Dynamic, field_type: FieldType) -> Result<Value, CoerceError> {
    let mismatch = |value: &Dynamic| CoerceError::Mismatch {
        expected: field_type,
        actual: value.type_name(),
    };
    match field_type {
        FieldType::String => value
            .clone()
            .into_string()
            .map(Value::String)
            .map_err(|_| mismatch(&value)),
        FieldType::Int64 => {
            if let Ok(i) = value.as_int() {
                Ok(Value::Int64(i))
            } else if let Ok(f) = value.as_float() {
                Ok(Value::Int64(f.trunc() as i64))
            } else {
                Err(mismatch(&value))
            }
        }
        FieldType::Float64 => {
            if let Ok(f) = value.as_float() {
                Ok(Value::Float64(f))
            } else if let Ok(i) = value.as_int() {
                Ok(Value::Float64(i as f64))
            } else {
                Err(mismatch(&value))
            }
        }
        FieldType::Boolean => value.as_bool().map(Value::Boolean).map_err(|_| mismatch(&value)),
        other => Err(CoerceError::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn string_requires_string() {
        assert_eq!(
            coerce(Dynamic::from("hi".to_string()), FieldType::String),
            Ok(Value::String("hi".into()))
        );
        assert_eq!(
            coerce(Dynamic::from_int(1), FieldType::String),
            Err(CoerceError::Mismatch {
                expected: FieldType::String,
                actual: "i64"
            })
        );
    }

    #[test]
    fn numbers_widen_and_truncate() {
        assert_eq!(coerce(Dynamic::from_float(3.7), FieldType::Int64), Ok(Value::Int64(3)));
        assert_eq!(coerce(Dynamic::from_float(-3.7), FieldType::Int64), Ok(Value::Int64(-3)));
        assert_eq!(coerce(Dynamic::from_int(7), FieldType::Float64), Ok(Value::Float64(7.0)));
        assert!(coerce(Dynamic::from_bool(true), FieldType::Int64).is_err());
    }

    #[test]
    fn unit_is_not_a_bool() {
        let err = coerce(Dynamic::UNIT, FieldType::Boolean).unwrap_err();
        assert_eq!(
            err,
            CoerceError::Mismatch {
                expected: FieldType::Boolean,
                actual: "()"
            }
        );
    }

    #[test]
    fn structured_targets_unsupported() {
        for ty in [FieldType::List, FieldType::Dict, FieldType::Decimal, FieldType::Json] {
            assert_eq!(coerce(Dynamic::UNIT, ty), Err(CoerceError::Unsupported(ty)));
        }
    }

    #[test]
    fn value_mapping() {
        assert!(to_dynamic(&Value::Null).is_unit());
        assert_eq!(to_dynamic(&Value::Int64(4)).as_int(), Ok(4));

        let list = to_dynamic(&Value::List(vec![Value::Boolean(true), Value::Null]));
        assert!(list.is_array());
        assert_eq!(list.into_array().unwrap().len(), 2);

        let mut entries = BTreeMap::new();
        entries.insert("k".to_string(), Value::String("v".into()));
        let map = to_dynamic(&Value::Dict(entries)).try_cast::<Map>().unwrap();
        assert_eq!(map["k"].clone().into_string().unwrap(), "v");

        let json = to_dynamic(&Value::Json(serde_json::json!({"n": 2})));
        assert!(json.is_map());
    }
}
