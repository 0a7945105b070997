//! Escalation policy and the append-only escalation audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ventas_core::{ConversationId, EscalationId};

use crate::conversation::ConversationStatus;

/// Why a conversation was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The customer or the platform asked for a human.
    ExplicitRequest,
    /// The drafted reply was below the confidence threshold.
    LowConfidence,
    /// The customer's sentiment fell below the floor.
    NegativeSentiment,
    /// An agent took the conversation over by hand.
    Manual,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::ExplicitRequest => "explicit_request",
            EscalationReason::LowConfidence => "low_confidence",
            EscalationReason::NegativeSentiment => "negative_sentiment",
            EscalationReason::Manual => "manual",
        }
    }
}

impl core::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EscalationReason {
    type Err = ventas_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit_request" => Ok(EscalationReason::ExplicitRequest),
            "low_confidence" => Ok(EscalationReason::LowConfidence),
            "negative_sentiment" => Ok(EscalationReason::NegativeSentiment),
            "manual" => Ok(EscalationReason::Manual),
            other => Err(ventas_core::DomainError::validation(format!(
                "unknown escalation reason: {other}"
            ))),
        }
    }
}

/// Signals observed when the decision was taken, kept on the audit record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationSignals {
    pub confidence: Option<f64>,
    pub sentiment: Option<f64>,
}

/// Audit entry written whenever a conversation changes hands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: EscalationId,
    pub conversation_id: ConversationId,
    pub reason: EscalationReason,
    pub previous_status: ConversationStatus,
    pub next_status: ConversationStatus,
    pub signals: EscalationSignals,
    pub created_at: DateTime<Utc>,
}

/// Decides whether an automated conversation should be handed to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Drafts below this confidence are not sent
    pub confidence_threshold: f64,
    /// Sentiment strictly below this escalates
    pub sentiment_floor: f64,
    /// Words that count as the customer asking for a person
    pub handoff_keywords: Vec<String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            sentiment_floor: -0.7,
            handoff_keywords: ["humano", "agente", "asesor", "persona", "human", "agent"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl EscalationPolicy {
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_sentiment_floor(mut self, floor: f64) -> Self {
        self.sentiment_floor = floor;
        self
    }

    pub fn with_handoff_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handoff_keywords = keywords
            .into_iter()
            .map(|k| k.into().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    pub fn should_escalate(&self, confidence: f64, sentiment_score: f64, explicit_flag: bool) -> bool {
        self.evaluate(confidence, sentiment_score, explicit_flag).is_some()
    }

    /// First matching reason, checked in order: explicit, confidence, sentiment.
    ///
    /// NaN signals never satisfy a comparison, so they do not escalate by themselves.
    pub fn evaluate(
        &self,
        confidence: f64,
        sentiment_score: f64,
        explicit_flag: bool,
    ) -> Option<EscalationReason> {
        if explicit_flag {
            Some(EscalationReason::ExplicitRequest)
        } else if confidence < self.confidence_threshold {
            Some(EscalationReason::LowConfidence)
        } else if sentiment_score < self.sentiment_floor {
            Some(EscalationReason::NegativeSentiment)
        } else {
            None
        }
    }

    /// Sentiment-only check, for analyses run outside a reply.
    pub fn sentiment_override(&self, sentiment_score: f64) -> bool {
        sentiment_score < self.sentiment_floor
    }

    /// Whether the text contains one of the handoff keywords as a whole word.
    pub fn mentions_handoff(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .any(|word| self.handoff_keywords.iter().any(|k| k == word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_escalates() {
        let policy = EscalationPolicy::default().with_confidence_threshold(0.3);
        assert!(policy.should_escalate(0.2, 0.0, false));
        assert_eq!(
            policy.evaluate(0.2, 0.0, false),
            Some(EscalationReason::LowConfidence)
        );
    }

    #[test]
    fn negative_sentiment_overrides_high_confidence() {
        let policy = EscalationPolicy::default();
        assert!(policy.should_escalate(0.9, -0.9, false));
        assert_eq!(
            policy.evaluate(0.9, -0.9, false),
            Some(EscalationReason::NegativeSentiment)
        );
    }

    #[test]
    fn confident_and_calm_stays_automated() {
        let policy = EscalationPolicy::default();
        assert!(!policy.should_escalate(0.9, 0.1, false));
    }

    #[test]
    fn explicit_flag_wins() {
        let policy = EscalationPolicy::default();
        assert_eq!(
            policy.evaluate(0.99, 0.9, true),
            Some(EscalationReason::ExplicitRequest)
        );
    }

    #[test]
    fn thresholds_are_strict() {
        let policy = EscalationPolicy::default();
        assert!(!policy.should_escalate(0.3, -0.7, false));
    }

    #[test]
    fn handoff_keywords_match_whole_words() {
        let policy = EscalationPolicy::default();
        assert!(policy.mentions_handoff("Quiero hablar con un HUMANO, por favor"));
        assert!(policy.mentions_handoff("¿me pasas con un agente?"));
        assert!(!policy.mentions_handoff("necesito la agenda de entregas"));

        let custom = policy.with_handoff_keywords([" Supervisor ", ""]);
        assert!(custom.mentions_handoff("llamen al supervisor"));
        assert!(!custom.mentions_handoff("quiero un humano"));
    }
}
