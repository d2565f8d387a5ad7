//! Error types shared by the streaming pipeline.

use thiserror::Error;

use crate::pacer::PacerPhase;

/// Failure reading the upstream response body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream read error: {0}")]
    Read(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(value: reqwest::Error) -> Self {
        StreamError::Read(value.to_string())
    }
}

/// Errors surfaced by [`crate::pacer::AdaptiveOutputPacer`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacerError {
    /// The pacer reached a terminal phase and needs `reset()` before reuse.
    #[error("pacer is {0}; call reset() before adding more text")]
    Closed(PacerPhase),

    #[error("invalid pacer config: {0}")]
    InvalidConfig(String),
}

/// Failure aborting a single registry entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to abort stream: {message}")]
pub struct AbortError {
    pub message: String,
}

impl AbortError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
