//! Conversation storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ventas_conversations::{Conversation, EscalationRecord, Message, SentimentAnalysis};
use ventas_core::{ConversationId, CustomerId, DomainError, DomainResult};

/// A state change applied to a conversation under the store's lock or row lock.
///
/// When it returns a record, the record is appended to the escalation audit in
/// the same atomic step as the state write.
pub type ConversationMutation =
    Box<dyn FnOnce(&mut Conversation) -> DomainResult<Option<EscalationRecord>> + Send>;

/// Box a closure as a [`ConversationMutation`].
pub fn mutation<F>(f: F) -> ConversationMutation
where
    F: FnOnce(&mut Conversation) -> DomainResult<Option<EscalationRecord>> + Send + 'static,
{
    Box::new(f)
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Return the conversation, creating it as active if it does not exist.
    async fn upsert(
        &self,
        id: &ConversationId,
        customer_id: &CustomerId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, ConversationStoreError>;

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, ConversationStoreError>;

    /// Apply `mutation` atomically and persist the outcome.
    ///
    /// Nothing is written when the mutation fails.
    async fn update(
        &self,
        id: &ConversationId,
        mutation: ConversationMutation,
    ) -> Result<(Conversation, Option<EscalationRecord>), ConversationStoreError>;

    /// Store a message; returns `false` if one with the same external id exists.
    async fn record_message(&self, message: &Message) -> Result<bool, ConversationStoreError>;

    /// The latest `limit` messages, oldest first.
    async fn list_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, ConversationStoreError>;

    async fn record_sentiment(
        &self,
        analysis: &SentimentAnalysis,
    ) -> Result<(), ConversationStoreError>;

    async fn list_sentiments(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<SentimentAnalysis>, ConversationStoreError>;

    /// Escalation audit for a conversation, oldest first.
    async fn list_escalations(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<EscalationRecord>, ConversationStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConversationStoreError {
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Default)]
struct Tables {
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<Message>,
    sentiments: Vec<SentimentAnalysis>,
    escalations: Vec<EscalationRecord>,
}

/// In-memory conversation store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    tables: RwLock<Tables>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, ConversationStoreError> {
        self.tables
            .write()
            .map_err(|_| ConversationStoreError::Storage("conversation lock poisoned".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, ConversationStoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| ConversationStoreError::Storage("conversation lock poisoned".into()))?;
        Ok(f(&tables))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn upsert(
        &self,
        id: &ConversationId,
        customer_id: &CustomerId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, ConversationStoreError> {
        let mut tables = self.write()?;
        let conversation = tables
            .conversations
            .entry(id.clone())
            .or_insert_with(|| Conversation::new(id.clone(), customer_id.clone(), now));
        Ok(conversation.clone())
    }

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, ConversationStoreError> {
        self.read(|t| t.conversations.get(id).cloned())
    }

    async fn update(
        &self,
        id: &ConversationId,
        mutation: ConversationMutation,
    ) -> Result<(Conversation, Option<EscalationRecord>), ConversationStoreError> {
        let mut tables = self.write()?;
        let stored = tables
            .conversations
            .get(id)
            .ok_or_else(|| ConversationStoreError::NotFound(id.clone()))?;

        let mut next = stored.clone();
        let record = mutation(&mut next)?;
        next.check_invariants()?;

        tables.conversations.insert(id.clone(), next.clone());
        if let Some(record) = &record {
            tables.escalations.push(record.clone());
        }
        Ok((next, record))
    }

    async fn record_message(&self, message: &Message) -> Result<bool, ConversationStoreError> {
        let mut tables = self.write()?;
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(ConversationStoreError::NotFound(message.conversation_id.clone()));
        }
        if let Some(external_id) = &message.external_id {
            let duplicate = tables.messages.iter().any(|m| {
                m.conversation_id == message.conversation_id
                    && m.external_id.as_ref() == Some(external_id)
            });
            if duplicate {
                return Ok(false);
            }
        }
        tables.messages.push(message.clone());
        Ok(true)
    }

    async fn list_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, ConversationStoreError> {
        self.read(|t| {
            let all: Vec<_> = t
                .messages
                .iter()
                .filter(|m| &m.conversation_id == id)
                .cloned()
                .collect();
            let skip = all.len().saturating_sub(limit);
            all.into_iter().skip(skip).collect()
        })
    }

    async fn record_sentiment(
        &self,
        analysis: &SentimentAnalysis,
    ) -> Result<(), ConversationStoreError> {
        let mut tables = self.write()?;
        if !tables.conversations.contains_key(&analysis.conversation_id) {
            return Err(ConversationStoreError::NotFound(analysis.conversation_id.clone()));
        }
        tables.sentiments.push(analysis.clone());
        Ok(())
    }

    async fn list_sentiments(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<SentimentAnalysis>, ConversationStoreError> {
        self.read(|t| {
            t.sentiments
                .iter()
                .filter(|s| &s.conversation_id == id)
                .cloned()
                .collect()
        })
    }

    async fn list_escalations(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<EscalationRecord>, ConversationStoreError> {
        self.read(|t| {
            t.escalations
                .iter()
                .filter(|r| &r.conversation_id == id)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ventas_conversations::{ConversationStatus, EscalationReason, EscalationSignals};

    fn ids() -> (ConversationId, CustomerId) {
        (
            ConversationId::parse("conv-1").unwrap(),
            CustomerId::parse("cust-1").unwrap(),
        )
    }

    fn escalate() -> ConversationMutation {
        mutation(|c| {
            c.escalate(
                EscalationReason::ExplicitRequest,
                EscalationSignals::default(),
                Utc::now(),
            )
        })
    }

    #[tokio::test]
    async fn upsert_keeps_existing_state() {
        let store = InMemoryConversationStore::new();
        let (conv, cust) = ids();

        store.upsert(&conv, &cust, Utc::now()).await.unwrap();
        store.update(&conv, escalate()).await.unwrap();
        let again = store.upsert(&conv, &cust, Utc::now()).await.unwrap();

        assert_eq!(again.status, ConversationStatus::Escalated);
    }

    #[tokio::test]
    async fn escalation_writes_state_and_audit_together() {
        let store = InMemoryConversationStore::new();
        let (conv, cust) = ids();
        store.upsert(&conv, &cust, Utc::now()).await.unwrap();

        let (updated, record) = store.update(&conv, escalate()).await.unwrap();
        assert!(updated.human_took_over);
        assert!(record.is_some());

        // Second escalation is a no-op: no new audit row.
        let (_, record) = store.update(&conv, escalate()).await.unwrap();
        assert!(record.is_none());
        assert_eq!(store.list_escalations(&conv).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_mutation_writes_nothing() {
        let store = InMemoryConversationStore::new();
        let (conv, cust) = ids();
        store.upsert(&conv, &cust, Utc::now()).await.unwrap();
        store
            .update(
                &conv,
                mutation(|c| {
                    c.close(Utc::now());
                    Ok(None)
                }),
            )
            .await
            .unwrap();

        let err = store.update(&conv, escalate()).await.unwrap_err();
        assert!(matches!(err, ConversationStoreError::Domain(_)));
        assert!(store.list_escalations(&conv).await.unwrap().is_empty());
        assert_eq!(
            store.get(&conv).await.unwrap().unwrap().status,
            ConversationStatus::Closed
        );
    }

    #[tokio::test]
    async fn messages_are_idempotent_on_external_id() {
        let store = InMemoryConversationStore::new();
        let (conv, cust) = ids();
        store.upsert(&conv, &cust, Utc::now()).await.unwrap();

        let first = Message::inbound(conv.clone(), Some("m-1".into()), "hola", Utc::now());
        let redelivered = Message::inbound(conv.clone(), Some("m-1".into()), "hola", Utc::now());
        assert!(store.record_message(&first).await.unwrap());
        assert!(!store.record_message(&redelivered).await.unwrap());

        let reply = Message::bot_reply(conv.clone(), "buenas", Utc::now());
        assert!(store.record_message(&reply).await.unwrap());

        let last = store.list_messages(&conv, 1).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].content, "buenas");
        assert_eq!(store.list_messages(&conv, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let store = InMemoryConversationStore::new();
        let (conv, _) = ids();

        assert!(matches!(
            store.update(&conv, escalate()).await,
            Err(ConversationStoreError::NotFound(_))
        ));
        let analysis = SentimentAnalysis::new(conv.clone(), None, 0.1, Utc::now());
        assert!(store.record_sentiment(&analysis).await.is_err());
    }
}
