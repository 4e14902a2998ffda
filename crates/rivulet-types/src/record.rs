//! Structured record payload.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::schema::Schema;
use crate::value::Value;

/// Named, typed field values plus the schema they may be validated against.
///
/// `data` need not cover every schema field; call [`Record::validate`] to
/// enforce the schema. Stages build a fresh record instead of mutating the
/// one they received.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub schema: Arc<Schema>,
    pub data: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
}

impl Record {
    /// Empty record stamped with the current time.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            data: HashMap::new(),
            timestamp: Utc::now(),
            version: 0,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builder-style [`Record::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(name.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Validate against the record's own schema.
    ///
    /// # Errors
    ///
    /// See [`Schema::validate`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.schema.validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::value::FieldType;

    #[test]
    fn insert_replaces_previous_value() {
        let mut record = Record::new(Arc::new(Schema::default()));
        assert!(record.insert("a", 1_i64).is_none());
        assert_eq!(record.insert("a", 2_i64), Some(Value::Int64(1)));
        assert_eq!(record.get("a"), Some(&Value::Int64(2)));
    }

    #[test]
    fn validate_uses_own_schema() {
        let schema = Arc::new(Schema::new(vec![Field::required("id", FieldType::Int64)]).unwrap());
        let record = Record::new(schema.clone()).with("id", "not-a-number");
        assert!(matches!(
            record.validate(),
            Err(ValidationError::TypeMismatch { .. })
        ));
        assert!(Record::new(schema).with("id", 1_i64).validate().is_ok());
    }
}
