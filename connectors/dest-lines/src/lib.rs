//! Writes text messages as newline-terminated lines.

#![warn(clippy::pedantic)]

use rivulet_engine::ComponentRegistry;
use rivulet_sdk::prelude::*;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter, Stdout};

/// Appends `"\n"` to every text payload and flushes after each write.
pub struct LineSink<W> {
    writer: BufWriter<W>,
    lines_written: u64,
}

impl<W: AsyncWrite + Unpin + Send> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            lines_written: 0,
        }
    }

    #[must_use]
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Unwrap the underlying writer. Call after [`Sink::close`] so nothing
    /// is left in the buffer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl LineSink<Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for LineSink<W> {
    async fn write(&mut self, message: &Message) -> Result<(), ConnectorError> {
        let Some(line) = message.payload.as_text() else {
            return Err(ConnectorError::data(
                "NOT_TEXT",
                format!("line sink expects text, got {}", message.payload.kind()),
            ));
        };
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        self.lines_written += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Register the `"stdout"` sink.
pub fn register(registry: &mut ComponentRegistry) {
    registry.register_sink("stdout", |_| Ok(Box::new(LineSink::stdout())));
}
