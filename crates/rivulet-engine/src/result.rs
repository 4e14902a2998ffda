//! Pipeline run result and the shared counters behind it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineResult {
    /// Messages produced by the source.
    pub records_read: u64,
    /// Messages accepted by the sink.
    pub records_written: u64,
    /// Messages a stage dropped by returning `Ok(None)`.
    pub records_dropped: u64,
    /// Extra stage attempts beyond the first, summed over all messages.
    pub stage_retries: u64,
    pub duration: Duration,
}

/// Atomic counters shared by every task of a run.
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    read: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    retries: AtomicU64,
}

impl RunCounters {
    pub(crate) fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, duration: Duration) -> PipelineResult {
        PipelineResult {
            records_read: self.read.load(Ordering::Relaxed),
            records_written: self.written.load(Ordering::Relaxed),
            records_dropped: self.dropped.load(Ordering::Relaxed),
            stage_retries: self.retries.load(Ordering::Relaxed),
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let counters = RunCounters::default();
        for _ in 0..3 {
            counters.record_read();
        }
        counters.record_written();
        counters.record_written();
        counters.record_dropped();
        counters.record_retry();

        let result = counters.snapshot(Duration::from_millis(7));
        assert_eq!(
            result,
            PipelineResult {
                records_read: 3,
                records_written: 2,
                records_dropped: 1,
                stage_retries: 1,
                duration: Duration::from_millis(7),
            }
        );
    }
}
