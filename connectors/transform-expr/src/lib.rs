//! Expression transform stage.
//!
//! Each configured rule evaluates a [rhai](https://rhai.rs) expression
//! against the fields of an input record and writes the result, coerced to
//! the rule's declared type, into a fresh output record.

#![warn(clippy::pedantic)]

mod coerce;
pub mod config;
pub mod transform;

use std::sync::Arc;

use rivulet_engine::ComponentRegistry;
use rivulet_sdk::Stage;

pub use config::{TransformConfig, TransformRule};
pub use transform::{ExprTransform, RuleCompileError};

/// Register the `"transform"` stage type.
///
/// Configured pipelines use [`ExprTransform::try_new`], so a rule that does
/// not compile fails pipeline construction.
pub fn register(registry: &mut ComponentRegistry) {
    registry.register_stage("transform", |component| {
        let config = TransformConfig::from_value(&component.config)?;
        let stage: Arc<dyn Stage> = Arc::new(ExprTransform::try_new(config)?);
        Ok(stage)
    });
}
