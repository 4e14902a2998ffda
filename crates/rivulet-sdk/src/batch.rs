//! Outcome of a batch call.

use rivulet_types::{ConnectorError, Message};

/// Messages a batch call produced, plus the error that cut it short.
///
/// A failure never discards what was already produced: `messages` holds
/// every result obtained before (or alongside) `error`.
#[derive(Debug, Default)]
#[must_use]
pub struct Batch {
    pub messages: Vec<Message>,
    pub error: Option<ConnectorError>,
}

impl Batch {
    pub fn complete(messages: Vec<Message>) -> Self {
        Self {
            messages,
            error: None,
        }
    }

    pub fn partial(messages: Vec<Message>, error: ConnectorError) -> Self {
        Self {
            messages,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Convert into a `Result`, dropping partial messages on failure.
    ///
    /// # Errors
    ///
    /// Returns the batch error, if any.
    pub fn into_result(self) -> Result<Vec<Message>, ConnectorError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.messages),
        }
    }
}

impl From<Vec<Message>> for Batch {
    fn from(messages: Vec<Message>) -> Self {
        Self::complete(messages)
    }
}
