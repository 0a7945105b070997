//! Messages and sentiment analyses attached to a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ventas_core::{AnalysisId, ConversationId, DomainError, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    Customer,
    Bot,
    Agent,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }
}

impl core::str::FromStr for MessageDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(MessageDirection::Inbound),
            "outbound" => Ok(MessageDirection::Outbound),
            other => Err(DomainError::validation(format!("unknown direction: {other}"))),
        }
    }
}

impl MessageSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSender::Customer => "customer",
            MessageSender::Bot => "bot",
            MessageSender::Agent => "agent",
        }
    }
}

impl core::str::FromStr for MessageSender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(MessageSender::Customer),
            "bot" => Ok(MessageSender::Bot),
            "agent" => Ok(MessageSender::Agent),
            other => Err(DomainError::validation(format!("unknown sender: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Platform message id; unique per conversation when present
    pub external_id: Option<String>,
    pub direction: MessageDirection,
    pub sender: MessageSender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(
        conversation_id: ConversationId,
        external_id: Option<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            external_id,
            direction: MessageDirection::Inbound,
            sender: MessageSender::Customer,
            content: content.into(),
            created_at: now,
        }
    }

    pub fn bot_reply(
        conversation_id: ConversationId,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            external_id: None,
            direction: MessageDirection::Outbound,
            sender: MessageSender::Bot,
            content: content.into(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score <= -0.3 {
            SentimentLabel::Negative
        } else if score >= 0.3 {
            SentimentLabel::Positive
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

impl core::str::FromStr for SentimentLabel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(SentimentLabel::Positive),
            "neutral" => Ok(SentimentLabel::Neutral),
            "negative" => Ok(SentimentLabel::Negative),
            other => Err(DomainError::validation(format!("unknown sentiment label: {other}"))),
        }
    }
}

/// Persisted sentiment score in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub id: AnalysisId,
    pub conversation_id: ConversationId,
    pub message_external_id: Option<String>,
    pub score: f64,
    pub label: SentimentLabel,
    pub created_at: DateTime<Utc>,
}

impl SentimentAnalysis {
    /// Scores are clamped into [-1, 1]; NaN becomes neutral.
    pub fn new(
        conversation_id: ConversationId,
        message_external_id: Option<String>,
        score: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(-1.0, 1.0) };
        Self {
            id: AnalysisId::new(),
            conversation_id,
            message_external_id,
            score,
            label: SentimentLabel::from_score(score),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_is_clamped_and_labelled() {
        let conv = ConversationId::parse("c").unwrap();

        let a = SentimentAnalysis::new(conv.clone(), None, -4.0, Utc::now());
        assert_eq!(a.score, -1.0);
        assert_eq!(a.label, SentimentLabel::Negative);

        let b = SentimentAnalysis::new(conv.clone(), None, f64::NAN, Utc::now());
        assert_eq!(b.score, 0.0);
        assert_eq!(b.label, SentimentLabel::Neutral);

        let c = SentimentAnalysis::new(conv, None, 0.8, Utc::now());
        assert_eq!(c.label, SentimentLabel::Positive);
    }
}
