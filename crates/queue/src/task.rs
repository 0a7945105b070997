//! Per-type payload schemas.
//!
//! A queue item stores its payload as opaque JSON next to its `type`. Handlers
//! decode it back into one of these structs; a payload that does not match its
//! schema can never succeed, so decoding failures are terminal.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use ventas_core::{ConversationId, CustomerId, DomainError, DomainResult};

use crate::error::HandlerError;
use crate::types::{QueueItem, QueueItemType};

/// Inbound customer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMessagePayload {
    pub conversation_id: ConversationId,
    pub customer_id: CustomerId,
    /// Platform message id, used to record the message idempotently
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub text: String,
    /// The platform (or the customer) asked for a human
    #[serde(default)]
    pub request_human: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Outbound follow-up message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFollowUpPayload {
    pub conversation_id: ConversationId,
    pub text: String,
}

/// Sentiment analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeSentimentPayload {
    pub conversation_id: ConversationId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Tagged union of all queueable work, keyed by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QueueTask {
    ProcessMessage(ProcessMessagePayload),
    SendFollowUp(SendFollowUpPayload),
    AnalyzeSentiment(AnalyzeSentimentPayload),
}

impl QueueTask {
    pub fn item_type(&self) -> QueueItemType {
        match self {
            QueueTask::ProcessMessage(_) => QueueItemType::ProcessMessage,
            QueueTask::SendFollowUp(_) => QueueItemType::SendFollowUp,
            QueueTask::AnalyzeSentiment(_) => QueueItemType::AnalyzeSentiment,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            QueueTask::ProcessMessage(p) => &p.conversation_id,
            QueueTask::SendFollowUp(p) => &p.conversation_id,
            QueueTask::AnalyzeSentiment(p) => &p.conversation_id,
        }
    }

    /// Field-level checks serde cannot express.
    pub fn validate(&self) -> DomainResult<()> {
        let text = match self {
            QueueTask::ProcessMessage(p) => &p.text,
            QueueTask::SendFollowUp(p) => &p.text,
            QueueTask::AnalyzeSentiment(p) => &p.text,
        };
        if text.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "{}: text must not be empty",
                self.item_type()
            )));
        }
        Ok(())
    }

    /// Build a pending queue item carrying this task. Invalid tasks never
    /// become items.
    pub fn into_item(self) -> DomainResult<QueueItem> {
        self.validate()?;
        let item_type = self.item_type();
        let payload = match self {
            QueueTask::ProcessMessage(p) => serde_json::to_value(p),
            QueueTask::SendFollowUp(p) => serde_json::to_value(p),
            QueueTask::AnalyzeSentiment(p) => serde_json::to_value(p),
        }
        .map_err(|e| DomainError::validation(format!("payload serialization failed: {e}")))?;
        Ok(QueueItem::new(item_type, payload))
    }

    /// Decode an item's payload according to its type.
    pub fn decode(item: &QueueItem) -> Result<Self, HandlerError> {
        let task = match item.item_type {
            QueueItemType::ProcessMessage => QueueTask::ProcessMessage(decode_payload(item)?),
            QueueItemType::SendFollowUp => QueueTask::SendFollowUp(decode_payload(item)?),
            QueueItemType::AnalyzeSentiment => QueueTask::AnalyzeSentiment(decode_payload(item)?),
        };
        task.validate()
            .map_err(|e| HandlerError::terminal(e.to_string()))?;
        Ok(task)
    }
}

/// Decode a payload into a specific schema; mismatches are terminal.
pub fn decode_payload<T: DeserializeOwned>(item: &QueueItem) -> Result<T, HandlerError> {
    serde_json::from_value(item.payload.clone()).map_err(|e| {
        HandlerError::terminal(format!("invalid {} payload: {e}", item.item_type))
    })
}
