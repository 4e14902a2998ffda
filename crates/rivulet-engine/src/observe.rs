//! Observability hooks: logging, counters, durations and in-progress gauges.
//!
//! Everything that reports on a run goes through the [`Observer`] trait. The
//! engine never reaches for a global registry; callers pass an explicit
//! `Arc<dyn Observer>`, and [`NoopObserver`] is the default.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use rivulet_sdk::Stage;
use rivulet_types::{ConnectorError, Message};

/// Counter kind for messages that produced an output.
pub const PROCESSED: &str = "processed";
/// Counter kind for messages a stage dropped.
pub const DROPPED: &str = "dropped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for pipeline telemetry.
///
/// Implementations must be cheap and non-blocking; hooks are called from
/// worker loops on every message.
pub trait Observer: Send + Sync {
    fn record_duration(&self, stage: &str, secs: f64);

    fn increment_counter(&self, stage: &str, kind: &str);

    fn increment_error_counter(&self, stage: &str, error_kind: &str);

    /// Adjust the in-progress gauge for `stage` by `delta`.
    fn set_in_progress(&self, stage: &str, delta: i64);

    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]);

    fn log_error(&self, stage: &str, message_id: &str, err: &ConnectorError) {
        let error = err.to_string();
        self.log(
            LogLevel::Error,
            "stage processing failed",
            &[("stage", stage), ("message_id", message_id), ("error", &error)],
        );
    }
}

/// Label used for error counters: the connector error category.
pub(crate) fn error_kind(err: &ConnectorError) -> String {
    err.category.to_string()
}

// ── No-op ───────────────────────────────────────────────────────────

/// Observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn record_duration(&self, _stage: &str, _secs: f64) {}
    fn increment_counter(&self, _stage: &str, _kind: &str) {}
    fn increment_error_counter(&self, _stage: &str, _error_kind: &str) {}
    fn set_in_progress(&self, _stage: &str, _delta: i64) {}
    fn log(&self, _level: LogLevel, _message: &str, _fields: &[(&str, &str)]) {}
}

// ── tracing ─────────────────────────────────────────────────────────

struct KeyValues<'a>(&'a [(&'a str, &'a str)]);

impl fmt::Display for KeyValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

fn emit(level: LogLevel, message: &str, fields: &[(&str, &str)]) {
    let fields = KeyValues(fields);
    match level {
        LogLevel::Debug => tracing::debug!(fields = %fields, "{message}"),
        LogLevel::Info => tracing::info!(fields = %fields, "{message}"),
        LogLevel::Warn => tracing::warn!(fields = %fields, "{message}"),
        LogLevel::Error => tracing::error!(fields = %fields, "{message}"),
    }
}

/// Observer that turns every hook into a `tracing` event.
///
/// Metric hooks are emitted at `trace` so they stay quiet under the usual
/// `info` filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn record_duration(&self, stage: &str, secs: f64) {
        tracing::trace!(stage, secs, "processing duration");
    }

    fn increment_counter(&self, stage: &str, kind: &str) {
        tracing::trace!(stage, kind, "message counted");
    }

    fn increment_error_counter(&self, stage: &str, error_kind: &str) {
        tracing::trace!(stage, error_kind, "error counted");
    }

    fn set_in_progress(&self, stage: &str, delta: i64) {
        tracing::trace!(stage, delta, "in-progress changed");
    }

    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]) {
        emit(level, message, fields);
    }
}

// ── In-memory metrics ───────────────────────────────────────────────

/// Summary of observed processing durations for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DurationStats {
    pub count: u64,
    pub sum_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DurationStats {
    fn observe(&mut self, secs: f64) {
        if self.count == 0 {
            self.min_secs = secs;
            self.max_secs = secs;
        } else {
            self.min_secs = self.min_secs.min(secs);
            self.max_secs = self.max_secs.max(secs);
        }
        self.count += 1;
        self.sum_secs += secs;
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_secs(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_secs / self.count as f64)
    }
}

/// Point-in-time copy of a [`MetricsCollector`].
///
/// Counter maps are keyed by `(stage, kind)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub messages: BTreeMap<(String, String), u64>,
    pub errors: BTreeMap<(String, String), u64>,
    pub durations: BTreeMap<String, DurationStats>,
    pub in_progress: BTreeMap<String, i64>,
}

/// In-memory counters, duration summaries and gauges.
///
/// Shared by `Arc`; log hooks are forwarded to `tracing`.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MetricsSnapshot) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.with(|m| m.clone())
    }

    #[must_use]
    pub fn counter(&self, stage: &str, kind: &str) -> u64 {
        self.with(|m| {
            m.messages
                .get(&(stage.to_string(), kind.to_string()))
                .copied()
                .unwrap_or(0)
        })
    }

    #[must_use]
    pub fn error_count(&self, stage: &str, error_kind: &str) -> u64 {
        self.with(|m| {
            m.errors
                .get(&(stage.to_string(), error_kind.to_string()))
                .copied()
                .unwrap_or(0)
        })
    }

    /// Total errors for `stage` across all kinds.
    #[must_use]
    pub fn total_errors(&self, stage: &str) -> u64 {
        self.with(|m| {
            m.errors
                .iter()
                .filter(|((s, _), _)| s == stage)
                .map(|(_, n)| n)
                .sum()
        })
    }

    #[must_use]
    pub fn durations(&self, stage: &str) -> Option<DurationStats> {
        self.with(|m| m.durations.get(stage).copied())
    }

    #[must_use]
    pub fn in_progress(&self, stage: &str) -> i64 {
        self.with(|m| m.in_progress.get(stage).copied().unwrap_or(0))
    }
}

impl Observer for MetricsCollector {
    fn record_duration(&self, stage: &str, secs: f64) {
        self.with(|m| m.durations.entry(stage.to_string()).or_default().observe(secs));
    }

    fn increment_counter(&self, stage: &str, kind: &str) {
        self.with(|m| {
            *m.messages
                .entry((stage.to_string(), kind.to_string()))
                .or_default() += 1;
        });
    }

    fn increment_error_counter(&self, stage: &str, error_kind: &str) {
        self.with(|m| {
            *m.errors
                .entry((stage.to_string(), error_kind.to_string()))
                .or_default() += 1;
        });
    }

    fn set_in_progress(&self, stage: &str, delta: i64) {
        self.with(|m| *m.in_progress.entry(stage.to_string()).or_default() += delta);
    }

    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]) {
        emit(level, message, fields);
    }
}

// ── Fan-out ─────────────────────────────────────────────────────────

/// Forwards every hook to each inner observer in turn.
#[derive(Default, Clone)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn Observer>>,
}

impl CompositeObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Observer for CompositeObserver {
    fn record_duration(&self, stage: &str, secs: f64) {
        for o in &self.observers {
            o.record_duration(stage, secs);
        }
    }

    fn increment_counter(&self, stage: &str, kind: &str) {
        for o in &self.observers {
            o.increment_counter(stage, kind);
        }
    }

    fn increment_error_counter(&self, stage: &str, error_kind: &str) {
        for o in &self.observers {
            o.increment_error_counter(stage, error_kind);
        }
    }

    fn set_in_progress(&self, stage: &str, delta: i64) {
        for o in &self.observers {
            o.set_in_progress(stage, delta);
        }
    }

    // Only the first observer logs; the others would duplicate the event.
    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]) {
        if let Some(o) = self.observers.first() {
            o.log(level, message, fields);
        }
    }
}

// ── Stage decorator ─────────────────────────────────────────────────

/// Wraps a stage and reports every `process` call to an observer.
pub struct ObservedStage<S> {
    inner: S,
    observer: Arc<dyn Observer>,
}

impl<S: Stage> ObservedStage<S> {
    pub fn new(inner: S, observer: Arc<dyn Observer>) -> Self {
        Self { inner, observer }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: Stage> Stage for ObservedStage<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        let name = self.inner.name();
        self.observer.set_in_progress(name, 1);
        let started = Instant::now();
        let result = self.inner.process(message).await;
        self.observer
            .record_duration(name, started.elapsed().as_secs_f64());
        self.observer.set_in_progress(name, -1);

        match &result {
            Ok(Some(_)) => self.observer.increment_counter(name, PROCESSED),
            Ok(None) => self.observer.increment_counter(name, DROPPED),
            Err(e) => {
                self.observer.increment_error_counter(name, &error_kind(e));
                self.observer.log_error(name, message.id(), e);
            }
        }
        result
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Stage for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
            match message.payload.as_text() {
                Some("") => Ok(None),
                Some("boom") => Err(ConnectorError::data("BOOM", "boom")),
                _ => Ok(Some(message.clone())),
            }
        }
    }

    #[test]
    fn metrics_collector_counts_per_stage_and_kind() {
        let metrics = MetricsCollector::new();
        metrics.increment_counter("a", PROCESSED);
        metrics.increment_counter("a", PROCESSED);
        metrics.increment_counter("a", DROPPED);
        metrics.increment_counter("b", PROCESSED);
        metrics.increment_error_counter("a", "data");

        assert_eq!(metrics.counter("a", PROCESSED), 2);
        assert_eq!(metrics.counter("a", DROPPED), 1);
        assert_eq!(metrics.counter("b", PROCESSED), 1);
        assert_eq!(metrics.counter("c", PROCESSED), 0);
        assert_eq!(metrics.error_count("a", "data"), 1);
        assert_eq!(metrics.total_errors("a"), 1);
    }

    #[test]
    fn duration_stats_track_min_max_mean() {
        let metrics = MetricsCollector::new();
        metrics.record_duration("s", 0.5);
        metrics.record_duration("s", 1.5);
        let stats = metrics.durations("s").unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.min_secs - 0.5).abs() < f64::EPSILON);
        assert!((stats.max_secs - 1.5).abs() < f64::EPSILON);
        assert!((stats.mean_secs().unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(metrics.durations("other").is_none());
    }

    #[test]
    fn in_progress_gauge_moves_both_ways() {
        let metrics = MetricsCollector::new();
        metrics.set_in_progress("s", 1);
        metrics.set_in_progress("s", 1);
        metrics.set_in_progress("s", -1);
        assert_eq!(metrics.in_progress("s"), 1);
    }

    #[test]
    fn key_values_format() {
        let fields = [("stage", "echo"), ("attempt", "2")];
        assert_eq!(KeyValues(&fields).to_string(), "stage=echo attempt=2");
        assert_eq!(KeyValues(&[]).to_string(), "");
    }

    #[test]
    fn composite_fans_out_metrics() {
        let a = Arc::new(MetricsCollector::new());
        let b = Arc::new(MetricsCollector::new());
        let composite = CompositeObserver::new(vec![a.clone(), b.clone()]);
        composite.increment_counter("s", PROCESSED);
        composite.log(LogLevel::Info, "hello", &[]);
        assert_eq!(a.counter("s", PROCESSED), 1);
        assert_eq!(b.counter("s", PROCESSED), 1);
        assert_eq!(composite.len(), 2);
    }

    #[tokio::test]
    async fn observed_stage_reports_each_outcome() {
        let metrics = Arc::new(MetricsCollector::new());
        let stage = ObservedStage::new(Echo, metrics.clone());

        assert!(stage.process(&Message::text("a")).await.unwrap().is_some());
        assert!(stage.process(&Message::text("")).await.unwrap().is_none());
        assert!(stage.process(&Message::text("boom")).await.is_err());

        assert_eq!(stage.name(), "echo");
        assert_eq!(metrics.counter("echo", PROCESSED), 1);
        assert_eq!(metrics.counter("echo", DROPPED), 1);
        assert_eq!(metrics.error_count("echo", "data"), 1);
        assert_eq!(metrics.durations("echo").unwrap().count, 3);
        assert_eq!(metrics.in_progress("echo"), 0);
    }

    #[tokio::test]
    async fn noop_observer_does_not_change_results() {
        let plain = Echo.process(&Message::text("a")).await.unwrap();
        let observed = ObservedStage::new(Echo, Arc::new(NoopObserver))
            .process(&Message::text("a"))
            .await
            .unwrap();
        assert_eq!(
            plain.unwrap().payload.as_text(),
            observed.unwrap().payload.as_text()
        );
    }
}
