//! Intra-stage parallelism: N workers sharing one input queue.
//!
//! [`WorkerPool::process_async`] exposes the raw session channels;
//! [`WorkerPool::process_batch`] drives a session for a finite batch and
//! collects exactly one outcome per item. Per-item failures are reported,
//! never escalated: deciding whether they are fatal is the caller's job.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rivulet_sdk::{Batch, Stage};
use rivulet_types::{ConnectorError, Message};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::observe::{error_kind, NoopObserver, Observer, DROPPED, PROCESSED};

/// A per-item failure inside a worker pool.
#[derive(Debug, Clone, thiserror::Error)]
#[error("worker {worker_id} failed on message {message_id}: {source}")]
pub struct WorkerError {
    pub worker_id: usize,
    pub message_id: String,
    #[source]
    pub source: ConnectorError,
}

/// Channels of a running pool session.
///
/// Dropping `input` lets workers drain and exit; `output` and `errors`
/// close once every worker has finished. The caller must keep draining
/// `errors`: it has room for a single pending failure.
pub struct WorkerSession {
    pub input: mpsc::Sender<Message>,
    pub output: mpsc::Receiver<Message>,
    pub errors: mpsc::Receiver<WorkerError>,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{failed} of {total} batch item(s) failed, first error: {first}")]
    Failed {
        failed: usize,
        total: usize,
        first: WorkerError,
    },

    #[error("batch cancelled after {completed} of {total} item(s)")]
    Cancelled { completed: usize, total: usize },

    /// Workers exited before every item was accounted for.
    #[error("batch ended after {completed} of {total} item(s)")]
    Incomplete { completed: usize, total: usize },
}

impl From<BatchError> for ConnectorError {
    /// A failed batch keeps the first item's category and code; the message
    /// carries the aggregate count.
    fn from(err: BatchError) -> Self {
        let message = err.to_string();
        match err {
            BatchError::Failed { first, .. } => {
                ConnectorError::new(first.source.category, first.source.code, message)
            }
            BatchError::Cancelled { .. } => ConnectorError::internal("BATCH_CANCELLED", message),
            BatchError::Incomplete { .. } => ConnectorError::internal("BATCH_INCOMPLETE", message),
        }
    }
}

/// Successful outputs of a batch plus the aggregate failure, if any.
///
/// Results arrive in completion order, not input order.
#[derive(Debug, Default)]
pub struct BatchOutput {
    pub results: Vec<Message>,
    pub error: Option<BatchError>,
}

impl BatchOutput {
    /// Convert into a `Result`, discarding partial results on failure.
    ///
    /// # Errors
    ///
    /// Returns the aggregate [`BatchError`] when any item failed or the batch
    /// was cut short.
    pub fn into_result(self) -> Result<Vec<Message>, BatchError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

impl From<BatchOutput> for Batch {
    fn from(output: BatchOutput) -> Self {
        Batch {
            messages: output.results,
            error: output.error.map(ConnectorError::from),
        }
    }
}

/// Runs a stage on `workers` concurrent tasks.
pub struct WorkerPool {
    stage: Arc<dyn Stage>,
    workers: usize,
    buffer_size: usize,
    observer: Arc<dyn Observer>,
    name: String,
}

impl WorkerPool {
    /// Zero `workers` or `buffer_size` are clamped to 1.
    #[must_use]
    pub fn new(stage: Arc<dyn Stage>, workers: usize, buffer_size: usize) -> Self {
        let name = stage.name().to_string();
        Self {
            stage,
            workers: workers.max(1),
            buffer_size: buffer_size.max(1),
            observer: Arc::new(NoopObserver),
            name,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Override the label used in logs and metrics (defaults to the stage name).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Start the workers and return the session channels.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn process_async(&self, token: &CancellationToken) -> WorkerSession {
        self.start(token, None)
    }

    fn start(&self, token: &CancellationToken, drops: Option<mpsc::Sender<()>>) -> WorkerSession {
        let (input_tx, input_rx) = mpsc::channel::<Message>(self.buffer_size);
        let (output_tx, output_rx) = mpsc::channel::<Message>(self.buffer_size);
        let (error_tx, error_rx) = mpsc::channel::<WorkerError>(1);
        let input_rx = Arc::new(Mutex::new(input_rx));

        let mut set = JoinSet::new();
        for worker_id in 0..self.workers {
            let worker = Worker {
                id: worker_id,
                stage: Arc::clone(&self.stage),
                observer: Arc::clone(&self.observer),
                name: self.name.clone(),
                input: Arc::clone(&input_rx),
                output: output_tx.clone(),
                errors: error_tx.clone(),
                drops: drops.clone(),
                token: token.clone(),
            };
            set.spawn(worker.run());
        }

        let name = self.name.clone();
        tokio::spawn(async move {
            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(stage = %name, error = %e, "worker task failed");
                }
            }
            drop(output_tx);
            drop(error_tx);
            drop(drops);
        });

        WorkerSession {
            input: input_tx,
            output: output_rx,
            errors: error_rx,
        }
    }

    /// Process a finite batch and wait for every item's outcome.
    ///
    /// Returns the successful outputs in completion order. When items failed,
    /// `error` carries the failure count and the first failure. On
    /// cancellation the partial results are returned with
    /// [`BatchError::Cancelled`].
    pub async fn process_batch(&self, token: &CancellationToken, batch: Vec<Message>) -> BatchOutput {
        let total = batch.len();
        if total == 0 {
            return BatchOutput::default();
        }

        let session_token = token.child_token();
        let (drop_tx, mut drop_rx) = mpsc::channel::<()>(self.buffer_size);
        let WorkerSession {
            input,
            mut output,
            mut errors,
        } = self.start(&session_token, Some(drop_tx));

        let feeder_token = session_token.clone();
        let feeder = tokio::spawn(async move {
            for msg in batch {
                tokio::select! {
                    biased;
                    () = feeder_token.cancelled() => return,
                    sent = input.send(msg) => if sent.is_err() { return },
                }
            }
        });

        let mut results = Vec::with_capacity(total);
        let mut failed = 0_usize;
        let mut first: Option<WorkerError> = None;
        let mut completed = 0_usize;
        let mut cancelled = false;

        while completed < total {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some(msg) = output.recv() => {
                    results.push(msg);
                    completed += 1;
                }
                Some(err) = errors.recv() => {
                    failed += 1;
                    first.get_or_insert(err);
                    completed += 1;
                }
                Some(()) = drop_rx.recv() => completed += 1,
                else => break,
            }
        }

        session_token.cancel();
        feeder.abort();

        let error = if cancelled {
            tracing::debug!(stage = %self.name, completed, total, "batch cancelled");
            Some(BatchError::Cancelled { completed, total })
        } else if let Some(first) = first {
            Some(BatchError::Failed {
                failed,
                total,
                first,
            })
        } else if completed < total {
            Some(BatchError::Incomplete { completed, total })
        } else {
            None
        };

        BatchOutput { results, error }
    }
}

#[async_trait]
impl Stage for WorkerPool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        self.stage.process(message).await
    }

    /// Fans the batch out over the pool. Output order is not preserved, and
    /// failed items do not discard the outputs of the others.
    async fn process_batch(&self, messages: &[Message]) -> Batch {
        let token = CancellationToken::new();
        WorkerPool::process_batch(self, &token, messages.to_vec())
            .await
            .into()
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.stage.close().await
    }
}

// ── Worker loop ─────────────────────────────────────────────────────

struct Worker {
    id: usize,
    stage: Arc<dyn Stage>,
    observer: Arc<dyn Observer>,
    name: String,
    input: Arc<Mutex<mpsc::Receiver<Message>>>,
    output: mpsc::Sender<Message>,
    errors: mpsc::Sender<WorkerError>,
    drops: Option<mpsc::Sender<()>>,
    token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => return,
                msg = async { self.input.lock().await.recv().await } => msg,
            };
            let Some(msg) = next else {
                tracing::trace!(stage = %self.name, worker_id = self.id, "input closed");
                return;
            };

            self.observer.set_in_progress(&self.name, 1);
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    self.observer.set_in_progress(&self.name, -1);
                    return;
                }
                outcome = self.stage.process(&msg) => outcome,
            };
            self.observer
                .record_duration(&self.name, started.elapsed().as_secs_f64());
            self.observer.set_in_progress(&self.name, -1);

            match outcome {
                Ok(Some(out)) => {
                    self.observer.increment_counter(&self.name, PROCESSED);
                    tokio::select! {
                        biased;
                        () = self.token.cancelled() => return,
                        sent = self.output.send(out) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(None) => {
                    self.observer.increment_counter(&self.name, DROPPED);
                    if let Some(drops) = &self.drops {
                        tokio::select! {
                            biased;
                            () = self.token.cancelled() => return,
                            _ = drops.send(()) => {}
                        }
                    }
                }
                Err(e) => {
                    self.observer
                        .increment_error_counter(&self.name, &error_kind(&e));
                    self.observer.log_error(&self.name, msg.id(), &e);
                    tracing::warn!(
                        stage = %self.name,
                        worker_id = self.id,
                        message_id = msg.id(),
                        error = %e,
                        "worker processing failed"
                    );
                    let failure = WorkerError {
                        worker_id: self.id,
                        message_id: msg.id().to_string(),
                        source: e,
                    };
                    tokio::select! {
                        biased;
                        () = self.token.cancelled() => return,
                        // A dropped error receiver means nobody is listening; keep going.
                        _ = self.errors.send(failure) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;

    #[async_trait]
    impl Stage for Double {
        fn name(&self) -> &str {
            "double"
        }

        async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
            let text = message.payload.as_text().unwrap_or_default();
            Ok(Some(message.derive(format!("{text}{text}"))))
        }
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let pool = WorkerPool::new(Arc::new(Double), 0, 0);
        assert_eq!(pool.workers(), 1);
        assert_eq!(pool.buffer_size(), 1);
        assert_eq!(Stage::name(&pool), "double");
        assert_eq!(Stage::name(&pool.with_name("renamed")), "renamed");
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let pool = WorkerPool::new(Arc::new(Double), 4, 8);
        let out = pool.process_batch(&CancellationToken::new(), Vec::new()).await;
        assert!(out.results.is_empty());
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn session_closes_after_input_dropped() {
        let pool = WorkerPool::new(Arc::new(Double), 3, 4);
        let token = CancellationToken::new();
        let WorkerSession {
            input,
            mut output,
            mut errors,
        } = pool.process_async(&token);

        input.send(Message::text("ab")).await.unwrap();
        drop(input);

        let out = output.recv().await.unwrap();
        assert_eq!(out.payload.as_text(), Some("abab"));
        assert!(output.recv().await.is_none());
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn stage_impl_batches_through_the_pool() {
        let pool = WorkerPool::new(Arc::new(Double), 2, 2);
        let input = vec![Message::text("a"), Message::text("b"), Message::text("c")];
        let mut out: Vec<String> = Stage::process_batch(&pool, &input)
            .await
            .into_result()
            .unwrap()
            .iter()
            .filter_map(|m| m.payload.as_text().map(str::to_string))
            .collect();
        out.sort();
        assert_eq!(out, vec!["aa", "bb", "cc"]);
    }
}
