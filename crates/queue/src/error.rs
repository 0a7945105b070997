//! Handler failure taxonomy.

use thiserror::Error;

/// Failure reported by a queue handler.
///
/// Transient failures are retried with backoff; terminal failures mark the item
/// failed immediately, whatever attempt budget is left.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// A dependency was unavailable; try again later.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The item can never succeed (bad payload, missing conversation, ...).
    #[error("terminal failure: {0}")]
    Terminal(String),
}

impl HandlerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Anything we cannot classify is retried.
    pub fn unexpected(err: impl core::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Terminal(msg) => msg,
        }
    }
}
