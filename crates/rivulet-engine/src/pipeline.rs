//! Pipeline orchestrator: source -> stages -> sink over bounded channels.
//!
//! Each role runs on its own task. Every channel send/recv and every retry
//! sleep races the pipeline's [`CancellationToken`], so the first fatal
//! error (or an external cancel) stops the whole run promptly.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rivulet_sdk::{Sink, Source, Stage};
use rivulet_types::{ConnectorError, Message};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::errors::{PipelineError, RetryPolicy};
use crate::observe::{error_kind, MetricsCollector, NoopObserver, Observer, DROPPED, PROCESSED};
use crate::result::{PipelineResult, RunCounters};
use crate::worker_pool::{WorkerPool, WorkerSession};

/// Lifecycle of a [`Pipeline`]. A pipeline runs at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

struct StageSlot {
    stage: Arc<dyn Stage>,
    /// `Some(n)` runs the stage on a worker pool of `n` tasks.
    workers: Option<usize>,
}

/// A configured source, stage chain and sink.
///
/// ```no_run
/// # async fn demo(source: impl rivulet_sdk::Source + 'static,
/// #               stage: impl rivulet_sdk::Stage + 'static,
/// #               sink: impl rivulet_sdk::Sink + 'static) {
/// use rivulet_engine::{Pipeline, RuntimeConfig};
///
/// let mut pipeline = Pipeline::new(RuntimeConfig::default());
/// pipeline.source(source).stage(stage).sink(sink);
/// let result = pipeline.run().await;
/// # }
/// ```
pub struct Pipeline {
    config: RuntimeConfig,
    token: CancellationToken,
    observer: Arc<dyn Observer>,
    metrics: Option<Arc<MetricsCollector>>,
    source: Option<Box<dyn Source>>,
    stages: Vec<StageSlot>,
    sink: Option<Box<dyn Sink>>,
    state: PipelineState,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_token(config, CancellationToken::new())
    }

    /// A pipeline whose token is a child of `parent`.
    ///
    /// Cancelling `parent` (e.g. from a deadline) cancels the run.
    #[must_use]
    pub fn with_cancellation(config: RuntimeConfig, parent: &CancellationToken) -> Self {
        Self::with_token(config, parent.child_token())
    }

    fn with_token(config: RuntimeConfig, token: CancellationToken) -> Self {
        Self {
            config,
            token,
            observer: Arc::new(NoopObserver),
            metrics: None,
            source: None,
            stages: Vec::new(),
            sink: None,
            state: PipelineState::Created,
        }
    }

    pub fn observer(&mut self, observer: Arc<dyn Observer>) -> &mut Self {
        self.observer = observer;
        self
    }

    pub fn source<S: Source + 'static>(&mut self, source: S) -> &mut Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Append a stage that processes messages one at a time, in order.
    pub fn stage<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        self.stages.push(StageSlot {
            stage: Arc::new(stage),
            workers: None,
        });
        self
    }

    /// Append a stage that runs on `workers` concurrent tasks.
    ///
    /// Outputs of a pooled stage are forwarded in completion order.
    pub fn pooled_stage<S: Stage + 'static>(&mut self, stage: S, workers: usize) -> &mut Self {
        self.stages.push(StageSlot {
            stage: Arc::new(stage),
            workers: Some(workers.max(1)),
        });
        self
    }

    pub fn sink<S: Sink + 'static>(&mut self, sink: S) -> &mut Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub(crate) fn attach_metrics(&mut self, metrics: Arc<MetricsCollector>) {
        self.metrics = Some(metrics);
    }

    /// A clone of the token that cancels this pipeline.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// The in-memory collector, when the pipeline was built with metrics on.
    #[must_use]
    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Run the pipeline to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AlreadyRun`] on a second call,
    /// [`PipelineError::MissingComponent`] if the source or sink is unset,
    /// [`PipelineError::Cancelled`] on external cancellation, or the first
    /// fatal error raised by any task.
    pub async fn run(&mut self) -> Result<PipelineResult, PipelineError> {
        if self.state != PipelineState::Created {
            return Err(PipelineError::AlreadyRun);
        }
        let Some(source) = self.source.take() else {
            return Err(PipelineError::MissingComponent("source"));
        };
        let Some(sink) = self.sink.take() else {
            self.source = Some(source);
            return Err(PipelineError::MissingComponent("sink"));
        };

        self.state = PipelineState::Running;
        let started = Instant::now();
        let buffer = self.config.buffer_size.max(1);
        tracing::info!(
            pipeline = %self.config.name,
            stages = self.stages.len(),
            buffer_size = buffer,
            retry_count = self.config.retry.retry_count,
            "pipeline started"
        );

        let counters = Arc::new(RunCounters::default());
        // Each task publishes at most one error; the supervisor one per panic.
        let (error_tx, mut error_rx) = mpsc::channel(self.stages.len() + 3);
        let ctx = TaskContext {
            retry: RetryContext {
                token: self.token.clone(),
                counters: Arc::clone(&counters),
                policy: self.config.retry,
            },
            errors: error_tx.clone(),
            observer: Arc::clone(&self.observer),
        };

        let mut tasks = JoinSet::new();
        let (first_tx, mut upstream) = mpsc::channel::<Message>(buffer);
        tasks.spawn(run_source(source, first_tx, ctx.clone()));

        for (index, slot) in self.stages.iter().enumerate() {
            let (tx, rx) = mpsc::channel::<Message>(buffer);
            let inbound = std::mem::replace(&mut upstream, rx);
            let stage = Arc::clone(&slot.stage);
            match slot.workers {
                Some(workers) => tasks.spawn(run_pooled_stage(
                    PooledStage {
                        index,
                        stage,
                        workers,
                        buffer,
                    },
                    inbound,
                    tx,
                    ctx.clone(),
                )),
                None => tasks.spawn(run_stage(index, stage, inbound, tx, ctx.clone())),
            };
        }
        tasks.spawn(run_sink(sink, upstream, ctx.clone()));
        drop(ctx);

        let closers = self.stages.iter().map(|s| Arc::clone(&s.stage)).collect();
        let supervisor = tokio::spawn(supervise(tasks, closers, error_tx));

        let first = tokio::select! {
            received = error_rx.recv() => received,
            () = self.token.cancelled() => Some(PipelineError::Cancelled),
        };
        let first = match first {
            None if self.token.is_cancelled() => Some(PipelineError::Cancelled),
            other => other,
        };
        if first.is_some() {
            self.token.cancel();
        }

        while let Some(err) = error_rx.recv().await {
            tracing::debug!(pipeline = %self.config.name, error = %err, "suppressed secondary error");
        }
        let first = match supervisor.await {
            Ok(()) => first,
            Err(join_err) => first.or(Some(PipelineError::TaskPanicked(join_err.to_string()))),
        };

        let duration = started.elapsed();
        match first {
            None => {
                self.state = PipelineState::Completed;
                let result = counters.snapshot(duration);
                tracing::info!(
                    pipeline = %self.config.name,
                    records_read = result.records_read,
                    records_written = result.records_written,
                    records_dropped = result.records_dropped,
                    stage_retries = result.stage_retries,
                    duration_secs = duration.as_secs_f64(),
                    "pipeline completed"
                );
                Ok(result)
            }
            Some(PipelineError::Cancelled) => {
                self.state = PipelineState::Cancelled;
                tracing::info!(
                    pipeline = %self.config.name,
                    duration_secs = duration.as_secs_f64(),
                    "pipeline cancelled"
                );
                Err(PipelineError::Cancelled)
            }
            Some(err) => {
                self.state = PipelineState::Failed;
                tracing::error!(pipeline = %self.config.name, error = %err, "pipeline failed");
                Err(err)
            }
        }
    }
}

// ── Task plumbing ───────────────────────────────────────────────────

/// What a retrying stage call needs.
#[derive(Clone)]
struct RetryContext {
    token: CancellationToken,
    counters: Arc<RunCounters>,
    policy: RetryPolicy,
}

#[derive(Clone)]
struct TaskContext {
    retry: RetryContext,
    errors: mpsc::Sender<PipelineError>,
    observer: Arc<dyn Observer>,
}

impl TaskContext {
    fn token(&self) -> &CancellationToken {
        &self.retry.token
    }

    fn counters(&self) -> &RunCounters {
        &self.retry.counters
    }

    async fn fail(&self, err: PipelineError) {
        // The receiver only goes away after every task has finished.
        let _ = self.errors.send(err).await;
    }

    /// Send `msg` downstream. Returns `false` if the run is over.
    async fn forward(&self, tx: &mpsc::Sender<Message>, msg: Message) -> bool {
        tokio::select! {
            biased;
            () = self.token().cancelled() => false,
            sent = tx.send(msg) => sent.is_ok(),
        }
    }

    /// Next inbound message, or `None` on close or cancellation.
    async fn receive(&self, rx: &mut mpsc::Receiver<Message>) -> Option<Message> {
        tokio::select! {
            biased;
            () = self.token().cancelled() => None,
            msg = rx.recv() => msg,
        }
    }
}

/// Collaborators handed back by finished tasks so they can be closed.
enum Finished {
    Source(Box<dyn Source>),
    Stage,
    Sink(Box<dyn Sink>),
}

enum Attempt {
    Output(Message),
    Dropped,
    Failed { attempts: u32, error: ConnectorError },
    Cancelled,
}

async fn process_with_retry(
    stage: &dyn Stage,
    msg: &Message,
    index: usize,
    ctx: &RetryContext,
) -> Attempt {
    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            () = ctx.token.cancelled() => return Attempt::Cancelled,
            result = stage.process(msg) => result,
        };
        match result {
            Ok(Some(out)) => return Attempt::Output(out),
            Ok(None) => return Attempt::Dropped,
            Err(error) if ctx.policy.should_retry(attempt) => {
                tracing::warn!(
                    stage = stage.name(),
                    stage_index = index,
                    attempt,
                    max_attempts = ctx.policy.max_attempts(),
                    message_id = msg.id(),
                    error = %error,
                    "stage attempt failed, retrying"
                );
                ctx.counters.record_retry();
                tokio::select! {
                    biased;
                    () = ctx.token.cancelled() => return Attempt::Cancelled,
                    () = tokio::time::sleep(ctx.policy.retry_delay) => {}
                }
            }
            Err(error) => {
                return Attempt::Failed {
                    attempts: attempt,
                    error,
                }
            }
        }
    }
}

async fn run_source(
    mut source: Box<dyn Source>,
    tx: mpsc::Sender<Message>,
    ctx: TaskContext,
) -> Finished {
    loop {
        let next = tokio::select! {
            biased;
            () = ctx.token().cancelled() => break,
            next = source.read() => next,
        };
        match next {
            Ok(Some(msg)) => {
                ctx.counters().record_read();
                if !ctx.forward(&tx, msg).await {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("source reached end of stream");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "source read failed");
                ctx.fail(PipelineError::Source(e)).await;
                break;
            }
        }
    }
    Finished::Source(source)
}

async fn run_stage(
    index: usize,
    stage: Arc<dyn Stage>,
    mut inbound: mpsc::Receiver<Message>,
    outbound: mpsc::Sender<Message>,
    ctx: TaskContext,
) -> Finished {
    let name = stage.name().to_string();
    while let Some(msg) = ctx.receive(&mut inbound).await {
        ctx.observer.set_in_progress(&name, 1);
        let started = Instant::now();
        let attempt = process_with_retry(stage.as_ref(), &msg, index, &ctx.retry).await;
        ctx.observer
            .record_duration(&name, started.elapsed().as_secs_f64());
        ctx.observer.set_in_progress(&name, -1);

        match attempt {
            Attempt::Output(out) => {
                ctx.observer.increment_counter(&name, PROCESSED);
                if !ctx.forward(&outbound, out).await {
                    break;
                }
            }
            Attempt::Dropped => {
                ctx.observer.increment_counter(&name, DROPPED);
                ctx.counters().record_dropped();
            }
            Attempt::Failed { attempts, error } => {
                ctx.observer.increment_error_counter(&name, &error_kind(&error));
                ctx.observer.log_error(&name, msg.id(), &error);
                tracing::error!(
                    stage = %name,
                    stage_index = index,
                    attempts,
                    message_id = msg.id(),
                    error = %error,
                    "stage failed"
                );
                ctx.fail(PipelineError::Stage {
                    index,
                    name,
                    attempts,
                    source: error,
                })
                .await;
                break;
            }
            Attempt::Cancelled => break,
        }
    }
    Finished::Stage
}

/// Stage wrapper used inside a pooled stage: applies the retry policy and
/// counts drops, so the pool's workers see one call per message.
struct RetryingStage {
    inner: Arc<dyn Stage>,
    index: usize,
    ctx: RetryContext,
}

#[async_trait]
impl Stage for RetryingStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        match process_with_retry(self.inner.as_ref(), message, self.index, &self.ctx).await {
            Attempt::Output(out) => Ok(Some(out)),
            Attempt::Dropped => {
                self.ctx.counters.record_dropped();
                Ok(None)
            }
            Attempt::Failed { error, .. } => Err(error),
            Attempt::Cancelled => Err(ConnectorError::internal("CANCELLED", "pipeline cancelled")),
        }
    }
}

struct PooledStage {
    index: usize,
    stage: Arc<dyn Stage>,
    workers: usize,
    buffer: usize,
}

enum PoolEvent {
    Output(Message),
    Failed(ConnectorError),
    Done,
}

async fn run_pooled_stage(
    pooled: PooledStage,
    inbound: mpsc::Receiver<Message>,
    outbound: mpsc::Sender<Message>,
    ctx: TaskContext,
) -> Finished {
    let PooledStage {
        index,
        stage,
        workers,
        buffer,
    } = pooled;
    let name = stage.name().to_string();
    let retrying = RetryingStage {
        inner: stage,
        index,
        ctx: ctx.retry.clone(),
    };
    let pool = WorkerPool::new(Arc::new(retrying), workers, buffer)
        .with_observer(Arc::clone(&ctx.observer))
        .with_name(name.clone());

    let session_token = ctx.token().child_token();
    let WorkerSession {
        input,
        mut output,
        mut errors,
    } = pool.process_async(&session_token);
    let feeder = tokio::spawn(feed_pool(inbound, input, session_token.clone()));
    tracing::debug!(stage = %name, stage_index = index, workers, "pooled stage started");

    loop {
        let event = tokio::select! {
            biased;
            () = ctx.token().cancelled() => PoolEvent::Done,
            Some(failure) = errors.recv() => PoolEvent::Failed(failure.source),
            received = output.recv() => received.map_or(PoolEvent::Done, PoolEvent::Output),
        };
        match event {
            PoolEvent::Output(msg) => {
                if !ctx.forward(&outbound, msg).await {
                    break;
                }
            }
            PoolEvent::Failed(error) => {
                let attempts = ctx.retry.policy.max_attempts();
                tracing::error!(
                    stage = %name,
                    stage_index = index,
                    attempts,
                    error = %error,
                    "pooled stage failed"
                );
                ctx.fail(PipelineError::Stage {
                    index,
                    name: name.clone(),
                    attempts,
                    source: error,
                })
                .await;
                break;
            }
            PoolEvent::Done => break,
        }
    }

    session_token.cancel();
    feeder.abort();
    Finished::Stage
}

async fn feed_pool(
    mut inbound: mpsc::Receiver<Message>,
    input: mpsc::Sender<Message>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return,
            next = inbound.recv() => next,
        };
        let Some(msg) = next else { return };
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            sent = input.send(msg) => if sent.is_err() { return },
        }
    }
}

async fn run_sink(
    mut sink: Box<dyn Sink>,
    mut inbound: mpsc::Receiver<Message>,
    ctx: TaskContext,
) -> Finished {
    while let Some(msg) = ctx.receive(&mut inbound).await {
        let written = tokio::select! {
            biased;
            () = ctx.token().cancelled() => break,
            written = sink.write(&msg) => written,
        };
        match written {
            Ok(()) => ctx.counters().record_written(),
            Err(e) => {
                tracing::error!(message_id = msg.id(), error = %e, "sink write failed");
                ctx.fail(PipelineError::Sink(e)).await;
                break;
            }
        }
    }
    Finished::Sink(sink)
}

/// Join every task, close collaborators, then drop the last error sender.
async fn supervise(
    mut tasks: JoinSet<Finished>,
    stages: Vec<Arc<dyn Stage>>,
    errors: mpsc::Sender<PipelineError>,
) {
    let mut source = None;
    let mut sink = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Finished::Source(s)) => source = Some(s),
            Ok(Finished::Sink(s)) => sink = Some(s),
            Ok(Finished::Stage) => {}
            Err(join_err) => {
                tracing::error!(error = %join_err, "pipeline task panicked");
                let _ = errors
                    .send(PipelineError::TaskPanicked(join_err.to_string()))
                    .await;
            }
        }
    }

    if let Some(mut source) = source {
        if let Err(e) = source.close().await {
            tracing::warn!(error = %e, "source close failed");
        }
    }
    for (index, stage) in stages.iter().enumerate() {
        if let Err(e) = stage.close().await {
            tracing::warn!(stage = stage.name(), stage_index = index, error = %e, "stage close failed");
        }
    }
    if let Some(mut sink) = sink {
        if let Err(e) = sink.close().await {
            tracing::warn!(error = %e, "sink close failed");
        }
    }
}
