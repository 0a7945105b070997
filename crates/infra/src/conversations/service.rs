//! Conversation control: escalation and agent handoff.
//!
//! The platform is told first, then the store. A platform failure leaves the
//! stored state untouched, so the caller can retry the whole operation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use ventas_conversations::{
    Conversation, EscalationPolicy, EscalationReason, EscalationRecord, EscalationSignals,
};
use ventas_core::{AgentId, ConversationId, DomainError};

use crate::external::{MessagingClient, MessagingError};

use super::store::{ConversationStore, ConversationStoreError, mutation};

#[derive(Debug, thiserror::Error)]
pub enum ConversationServiceError {
    #[error(transparent)]
    Store(#[from] ConversationStoreError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    messaging: Arc<dyn MessagingClient>,
    policy: EscalationPolicy,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        messaging: Arc<dyn MessagingClient>,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            store,
            messaging,
            policy,
        }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn messaging(&self) -> &Arc<dyn MessagingClient> {
        &self.messaging
    }

    async fn require(&self, id: &ConversationId) -> Result<Conversation, ConversationServiceError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ConversationStoreError::NotFound(id.clone()).into())
    }

    /// Hand the conversation to a human and append the audit record.
    ///
    /// Returns `None` if it was already escalated.
    #[instrument(skip(self, signals), fields(conversation_id = %id, reason = %reason))]
    pub async fn escalate(
        &self,
        id: &ConversationId,
        reason: EscalationReason,
        signals: EscalationSignals,
    ) -> Result<Option<EscalationRecord>, ConversationServiceError> {
        let current = self.require(id).await?;
        if current.is_closed() {
            return Err(ConversationStoreError::Domain(DomainError::invalid_transition(format!(
                "cannot escalate closed conversation {id}"
            )))
            .into());
        }

        self.messaging.take_control(id).await?;
        let (_, record) = self
            .store
            .update(id, mutation(move |c| c.escalate(reason, signals, Utc::now())))
            .await?;

        if record.is_some() {
            info!("conversation escalated to a human");
        }
        Ok(record)
    }

    /// Assign an agent; the first human takeover is audited as manual.
    #[instrument(skip(self), fields(conversation_id = %id, agent = %agent))]
    pub async fn assign(
        &self,
        id: &ConversationId,
        agent: AgentId,
    ) -> Result<Conversation, ConversationServiceError> {
        let current = self.require(id).await?;
        if !current.human_took_over && !current.is_closed() {
            self.messaging.take_control(id).await?;
        }
        let (conversation, _) = self
            .store
            .update(id, mutation(move |c| c.assign(agent, Utc::now())))
            .await?;
        Ok(conversation)
    }

    /// Return the conversation to the bot.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn release(&self, id: &ConversationId) -> Result<Conversation, ConversationServiceError> {
        let current = self.require(id).await?;
        if current.human_took_over {
            self.messaging.release_control(id).await?;
        }
        let (conversation, _) = self
            .store
            .update(
                id,
                mutation(|c| {
                    c.release(Utc::now())?;
                    Ok(None)
                }),
            )
            .await?;
        Ok(conversation)
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn resolve(&self, id: &ConversationId) -> Result<Conversation, ConversationServiceError> {
        let (conversation, _) = self
            .store
            .update(
                id,
                mutation(|c| {
                    c.resolve(Utc::now())?;
                    Ok(None)
                }),
            )
            .await?;
        Ok(conversation)
    }

    /// Close for good. Idempotent.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn close(&self, id: &ConversationId) -> Result<Conversation, ConversationServiceError> {
        let (conversation, _) = self
            .store
            .update(
                id,
                mutation(|c| {
                    c.close(Utc::now());
                    Ok(None)
                }),
            )
            .await?;
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::InMemoryConversationStore;
    use crate::external::{MessagingCall, RecordingMessagingClient};
    use ventas_conversations::ConversationStatus;
    use ventas_core::CustomerId;

    async fn setup() -> (ConversationService, Arc<RecordingMessagingClient>, ConversationId) {
        let store = InMemoryConversationStore::arc();
        let messaging = Arc::new(RecordingMessagingClient::new());
        let conv = ConversationId::parse("conv-9").unwrap();
        store
            .upsert(&conv, &CustomerId::parse("cust-9").unwrap(), Utc::now())
            .await
            .unwrap();
        let service = ConversationService::new(store, messaging.clone(), EscalationPolicy::default());
        (service, messaging, conv)
    }

    #[tokio::test]
    async fn escalation_takes_platform_control_and_audits_once() {
        let (service, messaging, conv) = setup().await;
        let signals = EscalationSignals {
            confidence: Some(0.1),
            sentiment: None,
        };

        let first = service
            .escalate(&conv, EscalationReason::LowConfidence, signals)
            .await
            .unwrap();
        let second = service
            .escalate(&conv, EscalationReason::LowConfidence, signals)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(service.store().list_escalations(&conv).await.unwrap().len(), 1);
        assert!(messaging.calls().contains(&MessagingCall::TakeControl {
            conversation_id: "conv-9".into()
        }));
    }

    #[tokio::test]
    async fn platform_failure_leaves_state_untouched() {
        let (service, messaging, conv) = setup().await;
        messaging.fail_next(MessagingError::Unavailable("down".into()));

        let err = service
            .escalate(&conv, EscalationReason::ExplicitRequest, EscalationSignals::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ConversationServiceError::Messaging(_)));
        let stored = service.store().get(&conv).await.unwrap().unwrap();
        assert_eq!(stored.status, ConversationStatus::Active);
        assert!(service.store().list_escalations(&conv).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_conversation_cannot_be_escalated() {
        let (service, messaging, conv) = setup().await;
        service.close(&conv).await.unwrap();

        let err = service
            .escalate(&conv, EscalationReason::ExplicitRequest, EscalationSignals::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConversationServiceError::Store(ConversationStoreError::Domain(_))
        ));
        assert!(messaging.calls().is_empty());
    }

    #[tokio::test]
    async fn assign_then_release_round_trip() {
        let (service, messaging, conv) = setup().await;
        let agent = AgentId::parse("agent-1").unwrap();

        let assigned = service.assign(&conv, agent).await.unwrap();
        assert!(assigned.human_took_over);
        let released = service.release(&conv).await.unwrap();
        assert!(released.accepts_automation());

        let audit = service.store().list_escalations(&conv).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].reason, EscalationReason::Manual);
        assert_eq!(messaging.calls().len(), 2);
    }
}
