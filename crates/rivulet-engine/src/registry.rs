//! Type-name to factory lookup used to build pipelines from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rivulet_sdk::{Batch, Sink, Source, Stage};
use rivulet_types::{ConnectorError, Message};
use tokio_util::sync::CancellationToken;

use crate::config::{validate_pipeline, ComponentConfig, PipelineConfig};
use crate::errors::PipelineError;
use crate::observe::{CompositeObserver, MetricsCollector, Observer, TracingObserver};
use crate::pipeline::Pipeline;

pub type SourceFactory =
    Box<dyn Fn(&ComponentConfig) -> Result<Box<dyn Source>, ConnectorError> + Send + Sync>;
pub type StageFactory =
    Box<dyn Fn(&ComponentConfig) -> Result<Arc<dyn Stage>, ConnectorError> + Send + Sync>;
pub type SinkFactory =
    Box<dyn Fn(&ComponentConfig) -> Result<Box<dyn Sink>, ConnectorError> + Send + Sync>;

/// Factories for sources, stages and sinks, keyed by their config `type`.
///
/// Registering a name twice replaces the earlier factory.
#[derive(Default)]
pub struct ComponentRegistry {
    sources: BTreeMap<String, SourceFactory>,
    stages: BTreeMap<String, StageFactory>,
    sinks: BTreeMap<String, SinkFactory>,
}

fn unknown(role: &str, kind: &str, known: Vec<&str>) -> anyhow::Error {
    let known = if known.is_empty() {
        "none registered".to_string()
    } else {
        known.join(", ")
    };
    anyhow!("unknown {role} type '{kind}' (known: {known})")
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn Source>, ConnectorError> + Send + Sync + 'static,
    {
        self.sources.insert(kind.into(), Box::new(factory));
        self
    }

    pub fn register_stage<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Stage>, ConnectorError> + Send + Sync + 'static,
    {
        self.stages.insert(kind.into(), Box::new(factory));
        self
    }

    pub fn register_sink<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn Sink>, ConnectorError> + Send + Sync + 'static,
    {
        self.sinks.insert(kind.into(), Box::new(factory));
        self
    }

    #[must_use]
    pub fn source_types(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn stage_types(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn sink_types(&self) -> Vec<&str> {
        self.sinks.keys().map(String::as_str).collect()
    }

    /// # Errors
    ///
    /// Fails if the type is not registered or the factory rejects the config.
    pub fn create_source(&self, component: &ComponentConfig) -> Result<Box<dyn Source>> {
        let factory = self
            .sources
            .get(&component.kind)
            .ok_or_else(|| unknown("source", &component.kind, self.source_types()))?;
        factory(component).with_context(|| format!("Failed to create source '{}'", component.display_name()))
    }

    /// # Errors
    ///
    /// Fails if the type is not registered or the factory rejects the config.
    pub fn create_stage(&self, component: &ComponentConfig) -> Result<Arc<dyn Stage>> {
        let factory = self
            .stages
            .get(&component.kind)
            .ok_or_else(|| unknown("stage", &component.kind, self.stage_types()))?;
        let stage = factory(component)
            .with_context(|| format!("Failed to create stage '{}'", component.display_name()))?;
        if component.name.is_empty() || component.name == stage.name() {
            Ok(stage)
        } else {
            Ok(Arc::new(NamedStage {
                name: component.name.clone(),
                inner: stage,
            }))
        }
    }

    /// # Errors
    ///
    /// Fails if the type is not registered or the factory rejects the config.
    pub fn create_sink(&self, component: &ComponentConfig) -> Result<Box<dyn Sink>> {
        let factory = self
            .sinks
            .get(&component.kind)
            .ok_or_else(|| unknown("sink", &component.kind, self.sink_types()))?;
        factory(component).with_context(|| format!("Failed to create sink '{}'", component.display_name()))
    }
}

/// Gives a configured stage the `name` from its config entry.
struct NamedStage {
    name: String,
    inner: Arc<dyn Stage>,
}

#[async_trait]
impl Stage for NamedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        self.inner.process(message).await
    }

    async fn process_batch(&self, messages: &[Message]) -> Batch {
        self.inner.process_batch(messages).await
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.inner.close().await
    }
}

impl Pipeline {
    /// Validate `config` and resolve every component through `registry`.
    ///
    /// Stages run on a worker pool when their effective worker count (the
    /// stage's `workers`, else the pipeline `concurrency`) is above one.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if validation fails or any component
    /// cannot be resolved.
    pub fn from_config(
        config: &PipelineConfig,
        registry: &ComponentRegistry,
    ) -> Result<Self, PipelineError> {
        Self::from_config_with_cancellation(config, registry, &CancellationToken::new())
    }

    /// [`Pipeline::from_config`] with a caller-owned parent token.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::from_config`].
    pub fn from_config_with_cancellation(
        config: &PipelineConfig,
        registry: &ComponentRegistry,
        parent: &CancellationToken,
    ) -> Result<Self, PipelineError> {
        validate_pipeline(config)?;

        let mut pipeline = Pipeline::with_cancellation(config.runtime(), parent);

        let mut observers: Vec<Arc<dyn Observer>> = Vec::new();
        if config.enable_logging || config.enable_tracing {
            observers.push(Arc::new(TracingObserver));
        }
        if config.enable_metrics {
            let metrics = Arc::new(MetricsCollector::new());
            pipeline.attach_metrics(Arc::clone(&metrics));
            observers.push(metrics);
        }
        if observers.len() == 1 {
            pipeline.observer(observers.remove(0));
        } else if !observers.is_empty() {
            pipeline.observer(Arc::new(CompositeObserver::new(observers)));
        }

        pipeline.source(registry.create_source(&config.source)?);
        for (i, stage_config) in config.stages.iter().enumerate() {
            let stage = registry
                .create_stage(&stage_config.component())
                .with_context(|| format!("stages[{i}]"))?;
            let workers = stage_config.workers.unwrap_or(config.concurrency);
            if workers > 1 {
                pipeline.pooled_stage(stage, workers);
            } else {
                pipeline.stage(stage);
            }
        }
        pipeline.sink(registry.create_sink(&config.sink)?);

        tracing::debug!(
            pipeline = %config.name,
            stages = config.stages.len(),
            "pipeline resolved from config"
        );
        Ok(pipeline)
    }
}
