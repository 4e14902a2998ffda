//! Pipeline orchestration for Rivulet.
//!
//! Wires a [`rivulet_sdk::Source`], zero or more [`rivulet_sdk::Stage`]s and
//! a [`rivulet_sdk::Sink`] together with bounded channels, cancellation and
//! first-error propagation. Also hosts the intra-stage [`WorkerPool`], the
//! observability hooks, and the JSON configuration layer.

#![warn(clippy::pedantic)]

pub mod config;
pub mod errors;
pub mod observe;
pub mod pipeline;
pub mod registry;
pub mod result;
pub mod worker_pool;

pub use config::{PipelineConfig, RuntimeConfig};
pub use errors::{PipelineError, RetryPolicy};
pub use observe::{
    CompositeObserver, DurationStats, LogLevel, MetricsCollector, MetricsSnapshot, NoopObserver,
    ObservedStage, Observer, TracingObserver,
};
pub use pipeline::{Pipeline, PipelineState};
pub use registry::ComponentRegistry;
pub use result::PipelineResult;
pub use tokio_util::sync::CancellationToken;
pub use worker_pool::{BatchError, BatchOutput, WorkerError, WorkerPool, WorkerSession};
