//! Error model shared by connectors and the engine.
//!
//! [`ConnectorError`] is what sources, stages and sinks return. It carries a
//! coarse [`ErrorCategory`] plus a stable code for operator-facing output.
//! [`ValidationError`] reports schema problems with the offending field name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::FieldType;

/// Broad classification of a connector error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid connector configuration.
    Config,
    /// Invalid or unexpected data.
    Data,
    /// Schema mismatch or incompatibility.
    Schema,
    /// Reading from or writing to the outside world failed.
    Io,
    /// Temporary failure; a retry may succeed.
    Transient,
    /// Internal connector error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Data => "data",
            Self::Schema => "schema",
            Self::Io => "io",
            Self::Transient => "transient",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error from a connector operation.
///
/// Construct via the category-specific factory methods (e.g. [`ConnectorError::data`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ConnectorError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
}

impl ConnectorError {
    #[must_use]
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, code, message)
    }

    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, code, message)
    }

    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, code, message)
    }

    #[must_use]
    pub fn io(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Io, code, message)
    }

    #[must_use]
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, code, message)
    }

    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, code, message)
    }
}

impl From<ValidationError> for ConnectorError {
    fn from(err: ValidationError) -> Self {
        Self::schema("VALIDATION", err.to_string())
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        Self::io("IO", err.to_string())
    }
}

/// Schema construction and record validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("field {field} is required but not present")]
    MissingField { field: String },

    #[error("field {field} type mismatch, want {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("field {field} is declared more than once")]
    DuplicateField { field: String },

    #[error("primary key {field} is not a declared field")]
    UnknownPrimaryKey { field: String },
}

impl ValidationError {
    /// Name of the field the error refers to.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field }
            | Self::TypeMismatch { field, .. }
            | Self::DuplicateField { field }
            | Self::UnknownPrimaryKey { field } => field,
        }
    }
}
