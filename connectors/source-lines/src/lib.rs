//! Reads newline-delimited text, one message per line.

#![warn(clippy::pedantic)]

use rivulet_engine::ComponentRegistry;
use rivulet_sdk::prelude::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

/// Metadata key holding the 1-based line number.
pub const LINE_NUMBER: &str = "line";

/// Emits each line of `R` as a text message until end of input.
///
/// Line terminators (`\n` or `\r\n`) are stripped.
pub struct LineSource<R> {
    lines: Lines<R>,
    line_number: u64,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// Lines emitted so far.
    #[must_use]
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }
}

impl LineSource<BufReader<Stdin>> {
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Source for LineSource<R> {
    async fn read(&mut self) -> Result<Option<Message>, ConnectorError> {
        match self.lines.next_line().await? {
            Some(line) => {
                self.line_number += 1;
                Ok(Some(Message::text(line).with_metadata(LINE_NUMBER, self.line_number)))
            }
            None => {
                tracing::debug!(lines = self.line_number, "end of input");
                Ok(None)
            }
        }
    }
}

/// Register the `"stdin"` source.
pub fn register(registry: &mut ComponentRegistry) {
    registry.register_source("stdin", |_| Ok(Box::new(LineSource::stdin())));
}
