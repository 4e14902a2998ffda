//! Declared record shape: ordered, uniquely named, typed fields.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::Record;
use crate::value::FieldType;

/// A single declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
        }
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, true)
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, false)
    }
}

/// Ordered field list plus primary key, version and free-form metadata.
///
/// Field names are unique; [`Schema::new`] and [`Schema::push`] enforce it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    primary_key: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Schema {
    /// Build a schema from an ordered field list.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateField`] if two fields share a name.
    pub fn new(fields: Vec<Field>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ValidationError::DuplicateField {
                    field: field.name.clone(),
                });
            }
        }
        Ok(Self {
            fields,
            ..Self::default()
        })
    }

    /// Set the primary key column.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownPrimaryKey`] if `name` is not a declared field.
    pub fn with_primary_key(mut self, name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if self.field(&name).is_none() {
            return Err(ValidationError::UnknownPrimaryKey { field: name });
        }
        self.primary_key = Some(name);
        Ok(self)
    }

    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Append a field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateField`] if the name is already declared.
    pub fn push(&mut self, field: Field) -> Result<(), ValidationError> {
        if self.field(&field.name).is_some() {
            return Err(ValidationError::DuplicateField { field: field.name });
        }
        self.fields.push(field);
        Ok(())
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check a record against this schema, in field declaration order.
    ///
    /// Data keys that the schema does not declare are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError::MissingField`] or
    /// [`ValidationError::TypeMismatch`] encountered.
    pub fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        for field in &self.fields {
            match record.get(&field.name) {
                None if field.required => {
                    return Err(ValidationError::MissingField {
                        field: field.name.clone(),
                    });
                }
                None => {}
                Some(value) if value.field_type() != field.field_type => {
                    return Err(ValidationError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.field_type,
                        actual: value.field_type(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn person_schema() -> Schema {
        Schema::new(vec![
            Field::required("name", FieldType::String),
            Field::required("age", FieldType::Int64),
            Field::optional("nickname", FieldType::String),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_field_names_rejected() {
        let err = Schema::new(vec![
            Field::required("id", FieldType::Int64),
            Field::optional("id", FieldType::String),
        ])
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateField { field: "id".into() });

        let mut schema = person_schema();
        assert!(schema.push(Field::optional("age", FieldType::Int64)).is_err());
        assert!(schema.push(Field::optional("email", FieldType::String)).is_ok());
        assert_eq!(schema.len(), 4);
    }

    #[test]
    fn primary_key_must_be_declared() {
        assert!(person_schema().with_primary_key("ssn").is_err());
        let schema = person_schema().with_primary_key("name").unwrap();
        assert_eq!(schema.primary_key(), Some("name"));
    }

    #[test]
    fn missing_required_field_fails() {
        let schema = Arc::new(person_schema());
        let mut record = Record::new(schema.clone());
        record.insert("name", "Ada");
        let err = schema.validate(&record).unwrap_err();
        assert_eq!(err, ValidationError::MissingField { field: "age".into() });
    }

    #[test]
    fn absent_optional_field_passes() {
        let schema = Arc::new(person_schema());
        let mut record = Record::new(schema.clone());
        record.insert("name", "Ada");
        record.insert("age", 36_i64);
        assert!(schema.validate(&record).is_ok());
    }

    #[test]
    fn wrong_type_on_optional_field_fails() {
        let schema = Arc::new(person_schema());
        let mut record = Record::new(schema.clone());
        record.insert("name", "Ada");
        record.insert("age", 36_i64);
        record.insert("nickname", 7_i64);
        let err = schema.validate(&record).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                field: "nickname".into(),
                expected: FieldType::String,
                actual: FieldType::Int64,
            }
        );
    }

    #[test]
    fn undeclared_data_keys_are_ignored() {
        let schema = Arc::new(person_schema());
        let mut record = Record::new(schema.clone());
        record.insert("name", "Ada");
        record.insert("age", 36_i64);
        record.insert("extra", true);
        assert!(schema.validate(&record).is_ok());
    }

    fn sample_value(kind: u8) -> Value {
        match kind % 4 {
            0 => Value::from("s"),
            1 => Value::from(1_i64),
            2 => Value::from(1.0),
            _ => Value::from(true),
        }
    }

    fn sample_type(kind: u8) -> FieldType {
        match kind % 4 {
            0 => FieldType::String,
            1 => FieldType::Int64,
            2 => FieldType::Float64,
            _ => FieldType::Boolean,
        }
    }

    proptest! {
        // Each field: (declared kind, required, present, value kind).
        #[test]
        fn validate_succeeds_iff_required_present_and_types_match(
            layout in prop::collection::vec((0_u8..4, any::<bool>(), any::<bool>(), 0_u8..4), 0..8)
        ) {
            let fields = layout
                .iter()
                .enumerate()
                .map(|(i, (kind, required, _, _))| Field::new(format!("f{i}"), sample_type(*kind), *required))
                .collect();
            let schema = Arc::new(Schema::new(fields).unwrap());
            let mut record = Record::new(schema.clone());
            for (i, (_, _, present, value_kind)) in layout.iter().enumerate() {
                if *present {
                    record.insert(format!("f{i}"), sample_value(*value_kind));
                }
            }

            let expected_ok = layout.iter().all(|(kind, required, present, value_kind)| {
                if *present {
                    kind % 4 == value_kind % 4
                } else {
                    !*required
                }
            });
            prop_assert_eq!(schema.validate(&record).is_ok(), expected_ok);
        }
    }
}
