//! Async connector traits.
//!
//! All three contracts are object safe so the engine can hold them as
//! `Box<dyn Source>`, `Arc<dyn Stage>` and `Box<dyn Sink>`.

use std::sync::Arc;

use async_trait::async_trait;
use rivulet_types::{ConnectorError, Message};

use crate::batch::Batch;

/// Produces messages for a pipeline.
#[async_trait]
pub trait Source: Send {
    /// Read the next message.
    ///
    /// Returns `Ok(None)` on a clean end of stream; that is not an error.
    async fn read(&mut self) -> Result<Option<Message>, ConnectorError>;

    /// Read up to `max` messages. An empty, complete batch means end of
    /// stream.
    ///
    /// The default stops at the first failed read and keeps the messages
    /// read before it.
    async fn read_batch(&mut self, max: usize) -> Batch {
        let mut messages = Vec::with_capacity(max.min(1024));
        while messages.len() < max {
            match self.read().await {
                Ok(Some(msg)) => messages.push(msg),
                Ok(None) => break,
                Err(e) => return Batch::partial(messages, e),
            }
        }
        Batch::complete(messages)
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Transforms one message into zero or one message.
///
/// A stage may be called from several workers at once when it is wrapped
/// in a worker pool, so any interior state needs its own synchronization.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name used in logs and metrics labels.
    fn name(&self) -> &str {
        "stage"
    }

    /// Process one message. `Ok(None)` drops it without error.
    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError>;

    /// Process a batch, skipping dropped messages.
    ///
    /// The default works in order and stops at the first failure, returning
    /// the outputs produced before it.
    async fn process_batch(&self, messages: &[Message]) -> Batch {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match self.process(msg).await {
                Ok(Some(result)) => out.push(result),
                Ok(None) => {}
                Err(e) => return Batch::partial(out, e),
            }
        }
        Batch::complete(out)
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Consumes the messages at the end of a pipeline.
#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, message: &Message) -> Result<(), ConnectorError>;

    async fn write_batch(&mut self, messages: &[Message]) -> Result<(), ConnectorError> {
        for msg in messages {
            self.write(msg).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[async_trait]
impl<S: Source + ?Sized> Source for Box<S> {
    async fn read(&mut self) -> Result<Option<Message>, ConnectorError> {
        (**self).read().await
    }

    async fn read_batch(&mut self, max: usize) -> Batch {
        (**self).read_batch(max).await
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        (**self).close().await
    }
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Box<S> {
    async fn write(&mut self, message: &Message) -> Result<(), ConnectorError> {
        (**self).write(message).await
    }

    async fn write_batch(&mut self, messages: &[Message]) -> Result<(), ConnectorError> {
        (**self).write_batch(messages).await
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        (**self).close().await
    }
}

#[async_trait]
impl<S: Stage + ?Sized> Stage for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
        (**self).process(message).await
    }

    async fn process_batch(&self, messages: &[Message]) -> Batch {
        (**self).process_batch(messages).await
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        (**self).close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown(u32);

    #[async_trait]
    impl Source for Countdown {
        async fn read(&mut self) -> Result<Option<Message>, ConnectorError> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Ok(Some(Message::text(self.0.to_string())))
        }
    }

    /// Yields `good` messages, then fails every read.
    struct BreaksAfter {
        good: u32,
    }

    #[async_trait]
    impl Source for BreaksAfter {
        async fn read(&mut self) -> Result<Option<Message>, ConnectorError> {
            if self.good == 0 {
                return Err(ConnectorError::io("READ", "connection reset"));
            }
            self.good -= 1;
            Ok(Some(Message::text("ok")))
        }
    }

    struct DropOdd;

    #[async_trait]
    impl Stage for DropOdd {
        async fn process(&self, message: &Message) -> Result<Option<Message>, ConnectorError> {
            let n: u32 = message
                .payload
                .as_text()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ConnectorError::data("NOT_A_NUMBER", "expected a number"))?;
            Ok((n % 2 == 0).then(|| message.clone()))
        }
    }

    #[derive(Default)]
    struct Collect(Vec<String>);

    #[async_trait]
    impl Sink for Collect {
        async fn write(&mut self, message: &Message) -> Result<(), ConnectorError> {
            self.0.push(message.payload.as_text().unwrap_or_default().to_string());
            Ok(())
        }
    }

    #[test]
    fn traits_are_object_safe() {
        fn _assert(_: &dyn Source, _: &dyn Stage, _: &dyn Sink) {}
    }

    #[tokio::test]
    async fn default_read_batch_stops_at_end_of_stream() {
        let mut source = Countdown(3);
        let batch = source.read_batch(10).await;
        assert!(batch.is_complete());
        assert_eq!(batch.len(), 3);
        let end = source.read_batch(10).await;
        assert!(end.is_complete() && end.is_empty());
    }

    #[tokio::test]
    async fn default_read_batch_respects_max() {
        let mut source = Countdown(5);
        assert_eq!(source.read_batch(2).await.len(), 2);
        assert_eq!(source.read_batch(10).await.len(), 3);
    }

    #[tokio::test]
    async fn failed_read_keeps_earlier_messages() {
        let mut source: Box<dyn Source> = Box::new(BreaksAfter { good: 2 });
        let batch = source.read_batch(5).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.error.as_ref().map(|e| e.code.as_str()), Some("READ"));
        assert!(batch.into_result().is_err());
    }

    #[tokio::test]
    async fn default_process_batch_skips_drops() {
        let stage: Arc<dyn Stage> = Arc::new(DropOdd);
        let input: Vec<Message> = (0..6).map(|n| Message::text(n.to_string())).collect();
        let out = stage.process_batch(&input).await.into_result().unwrap();
        let texts: Vec<_> = out.iter().filter_map(|m| m.payload.as_text()).collect();
        assert_eq!(texts, vec!["0", "2", "4"]);
        assert_eq!(stage.name(), "stage");
    }

    #[tokio::test]
    async fn default_process_batch_stops_on_error_keeping_outputs() {
        let input = vec![Message::text("2"), Message::text("x"), Message::text("4")];
        let batch = DropOdd.process_batch(&input).await;
        let texts: Vec<_> = batch.messages.iter().filter_map(|m| m.payload.as_text()).collect();
        assert_eq!(texts, vec!["2"]);
        assert_eq!(batch.error.unwrap().code, "NOT_A_NUMBER");
    }

    #[tokio::test]
    async fn default_write_batch_writes_in_order() {
        let mut sink = Collect::default();
        sink.write_batch(&[Message::text("a"), Message::text("b")])
            .await
            .unwrap();
        assert_eq!(sink.0, vec!["a", "b"]);
    }
}
