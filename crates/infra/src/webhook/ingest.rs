//! Translate platform webhook events into queue items.
//!
//! A body is either one event or `{"events": [...]}`. Every event is validated
//! before anything is enqueued; the batch is then stored all-or-nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ventas_conversations::EscalationPolicy;
use ventas_core::{ConversationId, CustomerId, QueueItemId};
use ventas_queue::{
    AnalyzeSentimentPayload, ProcessMessagePayload, QueueItem, QueueTask, SendFollowUpPayload,
};

use crate::queue::{QueueStore, QueueStoreError, QueueTrigger};

use super::signing::verify_signature;

const MESSAGE_PRIORITY: i32 = 10;
const HANDOFF_PRIORITY: i32 = 20;
const SENTIMENT_PRIORITY: i32 = 5;
const FOLLOW_UP_PRIORITY: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] QueueStoreError),
}

/// What an accepted webhook produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub accepted: usize,
    pub ignored: usize,
    pub item_ids: Vec<QueueItemId>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Batch { events: Vec<serde_json::Value> },
    Single(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WebhookEvent {
    MessageReceived {
        conversation_id: ConversationId,
        customer_id: CustomerId,
        #[serde(default)]
        message_id: Option<String>,
        text: String,
        #[serde(default)]
        request_human: bool,
        #[serde(default)]
        channel: Option<String>,
    },
    FollowUpRequested {
        conversation_id: ConversationId,
        text: String,
        #[serde(default)]
        send_at: Option<DateTime<Utc>>,
    },
    SentimentRequested {
        conversation_id: ConversationId,
        text: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    /// Delivery receipts, typing indicators and anything else not actionable.
    #[serde(other)]
    Ignored,
}

pub struct WebhookIngestor {
    secret: String,
    queue: Arc<dyn QueueStore>,
    policy: EscalationPolicy,
    max_attempts: u32,
    trigger: Option<QueueTrigger>,
}

impl WebhookIngestor {
    pub fn new(secret: impl Into<String>, queue: Arc<dyn QueueStore>, policy: EscalationPolicy) -> Self {
        Self {
            secret: secret.into(),
            queue,
            policy,
            max_attempts: 3,
            trigger: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Wake the runner after each accepted batch.
    pub fn with_trigger(mut self, trigger: QueueTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Verify, validate and enqueue one webhook body.
    pub async fn ingest(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<IngestReceipt, IngestError> {
        let signature =
            signature.ok_or_else(|| IngestError::Unauthorized("missing signature".into()))?;
        if !verify_signature(&self.secret, body, signature) {
            warn!("webhook signature mismatch");
            return Err(IngestError::Unauthorized("invalid signature".into()));
        }

        let (items, ignored) = self.translate(body)?;
        let item_ids = if items.is_empty() {
            Vec::new()
        } else {
            self.queue.enqueue_all(items).await?
        };

        if !item_ids.is_empty() {
            if let Some(trigger) = &self.trigger {
                trigger.notify();
            }
        }
        info!(accepted = item_ids.len(), ignored, "webhook accepted");

        Ok(IngestReceipt {
            accepted: item_ids.len(),
            ignored,
            item_ids,
        })
    }

    fn translate(&self, body: &[u8]) -> Result<(Vec<QueueItem>, usize), IngestError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| IngestError::Validation(format!("malformed JSON body: {e}")))?;
        let raw_events = match envelope {
            Envelope::Batch { events } if events.is_empty() => {
                return Err(IngestError::Validation("events must not be empty".into()));
            }
            Envelope::Batch { events } => events,
            Envelope::Single(event) => vec![event],
        };

        let mut items = Vec::with_capacity(raw_events.len());
        let mut ignored = 0;
        for (index, raw) in raw_events.into_iter().enumerate() {
            let event: WebhookEvent = serde_json::from_value(raw)
                .map_err(|e| IngestError::Validation(format!("event {index}: {e}")))?;
            match self.to_item(event) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => ignored += 1,
                Err(e) => return Err(IngestError::Validation(format!("event {index}: {e}"))),
            }
        }
        Ok((items, ignored))
    }

    fn to_item(&self, event: WebhookEvent) -> Result<Option<QueueItem>, ventas_core::DomainError> {
        let (task, priority, send_at) = match event {
            WebhookEvent::MessageReceived {
                conversation_id,
                customer_id,
                message_id,
                text,
                request_human,
                channel,
            } => {
                let priority = if request_human || self.policy.mentions_handoff(&text) {
                    HANDOFF_PRIORITY
                } else {
                    MESSAGE_PRIORITY
                };
                let task = QueueTask::ProcessMessage(ProcessMessagePayload {
                    conversation_id,
                    customer_id,
                    message_id,
                    text,
                    request_human,
                    channel,
                });
                (task, priority, None)
            }
            WebhookEvent::FollowUpRequested {
                conversation_id,
                text,
                send_at,
            } => (
                QueueTask::SendFollowUp(SendFollowUpPayload {
                    conversation_id,
                    text,
                }),
                FOLLOW_UP_PRIORITY,
                send_at,
            ),
            WebhookEvent::SentimentRequested {
                conversation_id,
                text,
                message_id,
            } => (
                QueueTask::AnalyzeSentiment(AnalyzeSentimentPayload {
                    conversation_id,
                    text,
                    message_id,
                }),
                SENTIMENT_PRIORITY,
                None,
            ),
            WebhookEvent::Ignored => {
                debug!("non-actionable webhook event ignored");
                return Ok(None);
            }
        };

        let mut item = task
            .into_item()?
            .with_priority(priority)
            .with_max_attempts(self.max_attempts);
        if let Some(at) = send_at {
            item = item.schedule_at(at);
        }
        Ok(Some(item))
    }
}
