//! Pipeline transport envelope.
//!
//! A [`Message`] carries one unit of data plus identity and free-form
//! metadata. The [`Payload`] is either a typed [`Record`] or an opaque
//! JSON-representable value (e.g. a line of text).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::record::Record;

/// Data carried by a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Schema-aware mode.
    Record(Record),
    /// Generic mode, used by simple text pipelines.
    Opaque(serde_json::Value),
}

impl Payload {
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            Self::Opaque(_) => None,
        }
    }

    /// The payload as text, when it is an opaque string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Opaque(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Short kind label for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::Opaque(serde_json::Value::String(_)) => "text",
            Self::Opaque(_) => "opaque",
        }
    }
}

impl From<Record> for Payload {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Opaque(serde_json::Value::String(s))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Opaque(serde_json::Value::String(s.to_string()))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Opaque(value)
    }
}

/// Unit of pipeline transport.
///
/// The id is assigned once at creation and cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    pub payload: Payload,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl Message {
    /// New message with a fresh UUID v4 id.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            error: None,
            trace_id: None,
            span_id: None,
        }
    }

    pub fn text(line: impl Into<String>) -> Self {
        Self::new(Payload::from(line.into()))
    }

    #[must_use]
    pub fn record(record: Record) -> Self {
        Self::new(Payload::Record(record))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A message that continues this one's identity with a new payload.
    ///
    /// Id, metadata and trace/span ids carry over; `created_at` is reset.
    pub fn derive(&self, payload: impl Into<Payload>) -> Self {
        Self {
            id: self.id.clone(),
            payload: payload.into(),
            metadata: self.metadata.clone(),
            created_at: Utc::now(),
            error: None,
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set_metadata(key, value);
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }
}
