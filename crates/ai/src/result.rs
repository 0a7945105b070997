use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A drafted reply to a customer message.
///
/// This is *not* a sent message. Callers decide, from `confidence`, whether it
/// goes out or the conversation is handed to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftReply {
    pub text: String,

    /// Confidence in \[0, 1\]; clamped on construction.
    pub confidence: f64,
}

impl DraftReply {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: clamp_or(confidence, 0.0, 1.0, 0.0),
        }
    }
}

/// Sentiment of a piece of text, in \[-1, 1\].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore(f64);

impl SentimentScore {
    pub fn new(score: f64) -> Self {
        Self(clamp_or(score, -1.0, 1.0, 0.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

fn clamp_or(value: f64, min: f64, max: f64, nan: f64) -> f64 {
    if value.is_nan() { nan } else { value.clamp(min, max) }
}

#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiError::Unavailable(_) | AiError::RateLimited(_) | AiError::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_clamped() {
        assert_eq!(SentimentScore::new(3.0).value(), 1.0);
        assert_eq!(SentimentScore::new(f64::NAN).value(), 0.0);
        assert_eq!(DraftReply::new("hola", 1.7).confidence, 1.0);
        assert_eq!(DraftReply::new("hola", -0.2).confidence, 0.0);
    }

    #[test]
    fn transient_classification() {
        assert!(AiError::RateLimited("slow down".into()).is_transient());
        assert!(AiError::Unavailable("503".into()).is_transient());
        assert!(
            !AiError::Rejected {
                status: 401,
                message: "bad key".into()
            }
            .is_transient()
        );
        assert!(!AiError::InvalidInput("empty".into()).is_transient());
    }
}
