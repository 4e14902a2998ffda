//! Stages over plain text messages.

#![warn(clippy::pedantic)]

use std::sync::Arc;

use rivulet_engine::ComponentRegistry;
use rivulet_sdk::prelude::*;

fn text(message: &Message) -> Result<&str, ConnectorError> {
    message.payload.as_text().ok_or_else(|| {
        ConnectorError::data(
            "NOT_TEXT",
            format!("expected a text payload, got {}", message.payload.kind()),
        )
    })
}

/// Uppercases each line.
#[derive(Debug, Default, Clone, Copy)]
pub struct UppercaseStage;

#[async_trait]
impl Stage for UppercaseStage {
    fn name(&self) -> &str {
        "uppercase"
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        let line = text(message)?;
        Ok(Some(message.derive(line.to_uppercase())))
    }
}

/// Drops lines that are empty or whitespace only.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterEmptyStage;

#[async_trait]
impl Stage for FilterEmptyStage {
    fn name(&self) -> &str {
        "filter_empty"
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        if text(message)?.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(message.clone()))
        }
    }
}

/// Register `"uppercase"` and `"filter_empty"`.
pub fn register(registry: &mut ComponentRegistry) {
    registry
        .register_stage("uppercase", |_| Ok(Arc::new(UppercaseStage)))
        .register_stage("filter_empty", |_| Ok(Arc::new(FilterEmptyStage)));
}
