//! Convenience re-exports for connector authors.

pub use crate::batch::Batch;
pub use crate::connector::{Sink, Source, Stage};
pub use async_trait::async_trait;
pub use rivulet_types::{
    ConnectorError, ErrorCategory, Field, FieldType, Message, Payload, Record, Schema,
    ValidationError, Value,
};
