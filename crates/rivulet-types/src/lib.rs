//! Shared Rivulet data model.
//!
//! [`Value`]s are grouped into [`Record`]s described by a [`Schema`], and
//! travel between pipeline stages inside a [`Message`] envelope.

#![warn(clippy::pedantic)]

pub mod error;
pub mod message;
pub mod record;
pub mod schema;
pub mod value;

pub use error::{ConnectorError, ErrorCategory, ValidationError};
pub use message::{Message, Payload};
pub use record::Record;
pub use schema::{Field, Schema};
pub use value::{FieldType, Value};
