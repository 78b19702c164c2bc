//! Sink outcomes.

use thiserror::Error;

/// One sink's failure to log one record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sink {sink} failed: {message}")]
pub struct SinkError {
    pub sink: String,
    pub message: String,
}

/// Combined outcome of one or more sinks.
///
/// Results combine by concatenating their errors; the exchange is logged
/// successfully iff no sink reported one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSinkResult {
    errors: Vec<SinkError>,
}

impl LogSinkResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![SinkError {
                sink: sink.into(),
                message: message.into(),
            }],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[SinkError] {
        &self.errors
    }

    pub fn merge(&mut self, other: LogSinkResult) {
        self.errors.extend(other.errors);
    }

    pub fn combine(mut self, other: LogSinkResult) -> Self {
        self.merge(other);
        self
    }
}

impl FromIterator<LogSinkResult> for LogSinkResult {
    fn from_iter<T: IntoIterator<Item = LogSinkResult>>(iter: T) -> Self {
        iter.into_iter().fold(LogSinkResult::ok(), LogSinkResult::combine)
    }
}
