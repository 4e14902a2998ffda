//! Serde types for the pipeline configuration document.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::RetryPolicy;

pub(crate) const DEFAULT_BUFFER_SIZE: usize = 100;
const DEFAULT_CONCURRENCY: usize = 1;

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_true() -> bool {
    true
}

/// Top-level pipeline configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Capacity of every inter-stage channel.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Default worker count for stages that do not set `workers`.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry_count: u32,
    /// Integer nanoseconds, or a string such as `"250ms"`, `"2s"`, `"1m"`.
    #[serde(
        default,
        deserialize_with = "deserialize_delay",
        serialize_with = "serialize_delay"
    )]
    pub retry_delay: Duration,
    #[serde(default)]
    pub enable_metrics: bool,
    #[serde(default)]
    pub enable_tracing: bool,
    #[serde(default = "default_true")]
    pub enable_logging: bool,
    pub source: ComponentConfig,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    pub sink: ComponentConfig,
}

impl PipelineConfig {
    /// The immutable runtime settings derived from this document.
    #[must_use]
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            name: self.name.clone(),
            buffer_size: self.buffer_size,
            concurrency: self.concurrency,
            retry: RetryPolicy::new(self.retry_count, self.retry_delay),
            enable_metrics: self.enable_metrics,
            enable_tracing: self.enable_tracing,
            enable_logging: self.enable_logging,
        }
    }
}

/// A source or sink reference: a registered `type` plus free-form settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: String::new(),
            config: serde_json::Value::Null,
        }
    }

    /// Display name, falling back to the type when `name` is empty.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.kind
        } else {
            &self.name
        }
    }
}

/// A stage reference with an optional per-stage worker count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

impl StageConfig {
    #[must_use]
    pub fn component(&self) -> ComponentConfig {
        ComponentConfig {
            kind: self.kind.clone(),
            name: self.name.clone(),
            config: self.config.clone(),
        }
    }
}

/// Settings a running pipeline reads; fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub name: String,
    pub buffer_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub enable_metrics: bool,
    pub enable_tracing: bool,
    pub enable_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            enable_metrics: false,
            enable_tracing: false,
            enable_logging: true,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry = RetryPolicy::new(retry_count, retry_delay);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDelay {
    Nanos(u64),
    Text(String),
}

fn deserialize_delay<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match RawDelay::deserialize(deserializer)? {
        RawDelay::Nanos(ns) => Ok(Duration::from_nanos(ns)),
        RawDelay::Text(s) => super::parser::parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_delay<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    serializer.serialize_u64(ns)
}
