//! Pipeline error model and retry policy.

use std::time::Duration;

use rivulet_types::ConnectorError;

/// Fatal failure of a pipeline run.
///
/// Only the first fatal error of a run is returned from
/// [`crate::Pipeline::run`]; later ones are drained and logged.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// `"source"` or `"sink"` was never set.
    #[error("pipeline has no {0} configured")]
    MissingComponent(&'static str),

    #[error("pipeline has already been run")]
    AlreadyRun,

    #[error("source failed: {0}")]
    Source(#[source] ConnectorError),

    #[error("stage {index} ({name}) failed after {attempts} attempt(s): {source}")]
    Stage {
        index: usize,
        name: String,
        attempts: u32,
        #[source]
        source: ConnectorError,
    },

    #[error("sink failed: {0}")]
    Sink(#[source] ConnectorError),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("pipeline task panicked: {0}")]
    TaskPanicked(String),

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

impl PipelineError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Index of the failing stage, for [`PipelineError::Stage`].
    #[must_use]
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            Self::Stage { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The connector error behind this failure, if any.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Source(e) | Self::Sink(e) | Self::Stage { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Per-message retry policy for stage processing.
///
/// A failing message is retried up to `retry_count` more times with a fixed
/// `retry_delay` between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            retry_count,
            retry_delay,
        }
    }

    /// Total attempts a message gets, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}
