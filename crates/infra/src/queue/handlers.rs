//! Handlers for the three queue item types.
//!
//! Errors flagged transient by the capability clients or the store are
//! retried; everything that can never succeed (bad payloads, unknown or closed
//! conversations, rejected requests) is terminal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use ventas_ai::{AiError, ChatTurn, LlmClient, ReplyRequest};
use ventas_conversations::{
    ConversationStatus, EscalationReason, EscalationSignals, Message, MessageDirection,
    SentimentAnalysis,
};
use ventas_core::ConversationId;
use ventas_queue::{
    AnalyzeSentimentPayload, HandlerError, ProcessMessagePayload, QueueItem, QueueTask,
    SendFollowUpPayload, decode_payload,
};

use crate::conversations::{
    ConversationService, ConversationServiceError, ConversationStoreError, mutation,
};
use crate::external::MessagingError;

use super::processor::QueueHandler;
use super::store::QueueStore;

fn ai_error(err: AiError) -> HandlerError {
    if err.is_transient() {
        HandlerError::transient(err.to_string())
    } else {
        HandlerError::terminal(err.to_string())
    }
}

fn messaging_error(err: MessagingError) -> HandlerError {
    if err.is_transient() {
        HandlerError::transient(err.to_string())
    } else {
        HandlerError::terminal(err.to_string())
    }
}

fn store_error(err: ConversationStoreError) -> HandlerError {
    match err {
        ConversationStoreError::Storage(_) => HandlerError::transient(err.to_string()),
        ConversationStoreError::NotFound(_) | ConversationStoreError::Domain(_) => {
            HandlerError::terminal(err.to_string())
        }
    }
}

fn service_error(err: ConversationServiceError) -> HandlerError {
    match err {
        ConversationServiceError::Store(e) => store_error(e),
        ConversationServiceError::Messaging(e) => messaging_error(e),
    }
}

fn require_text(text: &str) -> Result<(), HandlerError> {
    if text.trim().is_empty() {
        return Err(HandlerError::terminal("text must not be empty"));
    }
    Ok(())
}

/// Automatic follow-up after a bot reply.
#[derive(Debug, Clone)]
pub struct FollowUpSettings {
    pub delay: Duration,
    pub text: String,
    pub max_attempts: u32,
}

/// `process_message`: record, analyse, then reply or escalate.
pub struct ProcessMessageHandler {
    service: ConversationService,
    llm: Arc<dyn LlmClient>,
    queue: Arc<dyn QueueStore>,
    follow_up: Option<FollowUpSettings>,
    history_limit: usize,
}

impl ProcessMessageHandler {
    pub fn new(
        service: ConversationService,
        llm: Arc<dyn LlmClient>,
        queue: Arc<dyn QueueStore>,
    ) -> Self {
        Self {
            service,
            llm,
            queue,
            follow_up: None,
            history_limit: 20,
        }
    }

    pub fn with_follow_up(mut self, follow_up: Option<FollowUpSettings>) -> Self {
        self.follow_up = follow_up;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    async fn history(
        &self,
        conversation_id: &ConversationId,
        current: &Message,
    ) -> Result<Vec<ChatTurn>, HandlerError> {
        let messages = self
            .service
            .store()
            .list_messages(conversation_id, self.history_limit + 1)
            .await
            .map_err(store_error)?;

        Ok(messages
            .into_iter()
            .filter(|m| {
                m.id != current.id
                    && (current.external_id.is_none() || m.external_id != current.external_id)
            })
            .map(|m| match m.direction {
                MessageDirection::Inbound => ChatTurn::user(m.content),
                MessageDirection::Outbound => ChatTurn::assistant(m.content),
            })
            .collect())
    }

    async fn schedule_follow_up(&self, conversation_id: &ConversationId) {
        let Some(settings) = &self.follow_up else {
            return;
        };

        let task = QueueTask::SendFollowUp(SendFollowUpPayload {
            conversation_id: conversation_id.clone(),
            text: settings.text.clone(),
        });
        let item = match task.into_item() {
            Ok(item) => item
                .with_priority(1)
                .with_max_attempts(settings.max_attempts)
                .delayed(settings.delay),
            Err(e) => {
                warn!(error = %e, "invalid follow-up task");
                return;
            }
        };

        // The reply already went out; a retry here would send it twice.
        match self.queue.enqueue(item).await {
            Ok(id) => debug!(follow_up_id = %id, "follow-up scheduled"),
            Err(e) => warn!(error = %e, "failed to schedule follow-up"),
        }
    }
}

#[async_trait]
impl QueueHandler for ProcessMessageHandler {
    async fn handle(&self, item: &QueueItem) -> Result<(), HandlerError> {
        let payload: ProcessMessagePayload = decode_payload(item)?;
        require_text(&payload.text)?;
        let conversation_id = &payload.conversation_id;
        let store = self.service.store();
        let now = Utc::now();

        let mut conversation = store
            .upsert(conversation_id, &payload.customer_id, now)
            .await
            .map_err(store_error)?;

        let inbound = Message::inbound(
            conversation_id.clone(),
            payload.message_id.clone(),
            payload.text.clone(),
            now,
        );
        let inserted = store.record_message(&inbound).await.map_err(store_error)?;
        if !inserted && item.attempts <= 1 {
            info!(%conversation_id, "message already recorded; duplicate delivery ignored");
            return Ok(());
        }

        if conversation.status == ConversationStatus::Resolved {
            let (reopened, _) = store
                .update(
                    conversation_id,
                    mutation(|c| {
                        c.reopen_on_inbound(Utc::now());
                        Ok(None)
                    }),
                )
                .await
                .map_err(store_error)?;
            conversation = reopened;
        }

        if !conversation.accepts_automation() {
            info!(
                %conversation_id,
                status = %conversation.status,
                human_took_over = conversation.human_took_over,
                "automation paused; message recorded only"
            );
            return Ok(());
        }

        let sentiment = self
            .llm
            .analyze_sentiment(&payload.text)
            .await
            .map_err(ai_error)?;
        let analysis = SentimentAnalysis::new(
            conversation_id.clone(),
            payload.message_id.clone(),
            sentiment.value(),
            Utc::now(),
        );
        store.record_sentiment(&analysis).await.map_err(store_error)?;

        let policy = self.service.policy();
        let explicit = payload.request_human || policy.mentions_handoff(&payload.text);

        let draft = if explicit {
            None
        } else {
            let request = ReplyRequest::new(conversation_id.as_str(), payload.text.clone())
                .with_history(self.history(conversation_id, &inbound).await?);
            Some(self.llm.draft_reply(&request).await.map_err(ai_error)?)
        };
        let confidence = draft.as_ref().map(|d| d.confidence);

        let decision = policy.evaluate(confidence.unwrap_or(1.0), analysis.score, explicit);
        match (decision, draft) {
            (Some(reason), _) => {
                let signals = EscalationSignals {
                    confidence,
                    sentiment: Some(analysis.score),
                };
                self.service
                    .escalate(conversation_id, reason, signals)
                    .await
                    .map_err(service_error)?;
                info!(%conversation_id, %reason, "handed to a human");
            }
            (None, Some(draft)) => {
                self.service
                    .messaging()
                    .send_message(conversation_id, &draft.text)
                    .await
                    .map_err(messaging_error)?;
                let reply = Message::bot_reply(conversation_id.clone(), draft.text, Utc::now());
                store.record_message(&reply).await.map_err(store_error)?;
                info!(%conversation_id, confidence = draft.confidence, "bot replied");
                self.schedule_follow_up(conversation_id).await;
            }
            (None, None) => {}
        }

        Ok(())
    }
}

/// `send_follow_up`: only while the bot still owns the conversation.
pub struct SendFollowUpHandler {
    service: ConversationService,
}

impl SendFollowUpHandler {
    pub fn new(service: ConversationService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for SendFollowUpHandler {
    async fn handle(&self, item: &QueueItem) -> Result<(), HandlerError> {
        let payload: SendFollowUpPayload = decode_payload(item)?;
        require_text(&payload.text)?;
        let conversation_id = &payload.conversation_id;
        let store = self.service.store();

        let Some(conversation) = store.get(conversation_id).await.map_err(store_error)? else {
            info!(%conversation_id, "follow-up skipped; unknown conversation");
            return Ok(());
        };
        if !conversation.accepts_automation() {
            info!(
                %conversation_id,
                status = %conversation.status,
                human_took_over = conversation.human_took_over,
                "follow-up skipped"
            );
            return Ok(());
        }

        self.service
            .messaging()
            .send_message(conversation_id, &payload.text)
            .await
            .map_err(messaging_error)?;
        store
            .record_message(&Message::bot_reply(
                conversation_id.clone(),
                payload.text,
                Utc::now(),
            ))
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

/// `analyze_sentiment`: persist the score; escalate when it is too low.
pub struct AnalyzeSentimentHandler {
    service: ConversationService,
    llm: Arc<dyn LlmClient>,
}

impl AnalyzeSentimentHandler {
    pub fn new(service: ConversationService, llm: Arc<dyn LlmClient>) -> Self {
        Self { service, llm }
    }
}

#[async_trait]
impl QueueHandler for AnalyzeSentimentHandler {
    async fn handle(&self, item: &QueueItem) -> Result<(), HandlerError> {
        let payload: AnalyzeSentimentPayload = decode_payload(item)?;
        require_text(&payload.text)?;
        let conversation_id = &payload.conversation_id;
        let store = self.service.store();

        let conversation = store
            .get(conversation_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| {
                HandlerError::terminal(format!("unknown conversation {conversation_id}"))
            })?;

        let score = self
            .llm
            .analyze_sentiment(&payload.text)
            .await
            .map_err(ai_error)?;
        let analysis = SentimentAnalysis::new(
            conversation_id.clone(),
            payload.message_id.clone(),
            score.value(),
            Utc::now(),
        );
        store.record_sentiment(&analysis).await.map_err(store_error)?;
        debug!(%conversation_id, score = analysis.score, label = analysis.label.as_str(), "sentiment recorded");

        let policy = self.service.policy();
        if policy.sentiment_override(analysis.score)
            && !conversation.is_closed()
            && !conversation.human_took_over
        {
            let signals = EscalationSignals {
                confidence: None,
                sentiment: Some(analysis.score),
            };
            self.service
                .escalate(conversation_id, EscalationReason::NegativeSentiment, signals)
                .await
                .map_err(service_error)?;
            info!(%conversation_id, "negative sentiment; handed to a human");
        }
        Ok(())
    }
}
