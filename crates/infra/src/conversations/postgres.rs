//! Postgres-backed conversation store.
//!
//! `update` runs in a transaction holding `SELECT ... FOR UPDATE` on the
//! conversation row, so concurrent escalations serialize and the audit insert
//! commits or rolls back with the state change.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ventas_conversations::{
    Conversation, ConversationStatus, EscalationReason, EscalationRecord, EscalationSignals,
    Message, MessageDirection, MessageSender, SentimentAnalysis, SentimentLabel,
};
use ventas_core::{
    AgentId, AnalysisId, ConversationId, CustomerId, EscalationId, MessageId,
};

use super::store::{ConversationMutation, ConversationStore, ConversationStoreError};

const CONVERSATION_COLUMNS: &str =
    "id, customer_id, status, human_took_over, human_takeover_at, assigned_to, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresConversationStore {
    pool: PgPool,
}

impl PostgresConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PostgresConversationStore {
    #[instrument(skip(self, now), fields(conversation_id = %id), err)]
    async fn upsert(
        &self,
        id: &ConversationId,
        customer_id: &CustomerId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, ConversationStoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(&format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
             VALUES ($1, $2, 'active', FALSE, NULL, NULL, $3, $3) \
             ON CONFLICT (id) DO UPDATE SET id = conversations.id \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(customer_id.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert", e))?;
        conversation_from_row(&row)
    }

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, ConversationStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    #[instrument(skip(self, mutation), fields(conversation_id = %id), err)]
    async fn update(
        &self,
        id: &ConversationId,
        mutation: ConversationMutation,
    ) -> Result<(Conversation, Option<EscalationRecord>), ConversationStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update", e))?;

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?
        .ok_or_else(|| ConversationStoreError::NotFound(id.clone()))?;

        let mut conversation = conversation_from_row(&row)?;
        // Dropping `tx` on error rolls back and releases the row lock.
        let record = mutation(&mut conversation)?;
        conversation.check_invariants()?;

        sqlx::query(
            "UPDATE conversations \
             SET status = $2, human_took_over = $3, human_takeover_at = $4, assigned_to = $5, \
                 updated_at = $6 \
             WHERE id = $1",
        )
        .bind(conversation.id.as_str())
        .bind(conversation.status.as_str())
        .bind(conversation.human_took_over)
        .bind(conversation.human_takeover_at)
        .bind(conversation.assigned_to.as_ref().map(|a| a.as_str()))
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if let Some(record) = &record {
            sqlx::query(
                "INSERT INTO escalations \
                 (id, conversation_id, reason, previous_status, next_status, confidence, sentiment, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(record.id.as_uuid())
            .bind(record.conversation_id.as_str())
            .bind(record.reason.as_str())
            .bind(record.previous_status.as_str())
            .bind(record.next_status.as_str())
            .bind(record.signals.confidence)
            .bind(record.signals.sentiment)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("update", e))?;
        Ok((conversation, record))
    }

    async fn record_message(&self, message: &Message) -> Result<bool, ConversationStoreError> {
        let result = sqlx::query(
            "INSERT INTO messages (id, conversation_id, external_id, direction, sender, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (conversation_id, external_id) WHERE external_id IS NOT NULL DO NOTHING",
        )
        .bind(message.id.as_uuid())
        .bind(message.conversation_id.as_str())
        .bind(message.external_id.as_deref())
        .bind(message.direction.as_str())
        .bind(message.sender.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_message", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, ConversationStoreError> {
        let rows = sqlx::query(
            "SELECT * FROM ( \
                 SELECT id, conversation_id, external_id, direction, sender, content, created_at \
                 FROM messages WHERE conversation_id = $1 \
                 ORDER BY created_at DESC, id DESC LIMIT $2 \
             ) latest ORDER BY created_at ASC, id ASC",
        )
        .bind(id.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_messages", e))?;
        rows.iter().map(message_from_row).collect()
    }

    async fn record_sentiment(
        &self,
        analysis: &SentimentAnalysis,
    ) -> Result<(), ConversationStoreError> {
        sqlx::query(
            "INSERT INTO sentiment_analyses \
             (id, conversation_id, message_external_id, score, label, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(analysis.id.as_uuid())
        .bind(analysis.conversation_id.as_str())
        .bind(analysis.message_external_id.as_deref())
        .bind(analysis.score)
        .bind(analysis.label.as_str())
        .bind(analysis.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_sentiment", e))?;
        Ok(())
    }

    async fn list_sentiments(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<SentimentAnalysis>, ConversationStoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, message_external_id, score, label, created_at \
             FROM sentiment_analyses WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sentiments", e))?;
        rows.iter().map(sentiment_from_row).collect()
    }

    async fn list_escalations(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<EscalationRecord>, ConversationStoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, reason, previous_status, next_status, confidence, sentiment, created_at \
             FROM escalations WHERE conversation_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_escalations", e))?;
        rows.iter().map(escalation_from_row).collect()
    }
}

fn conversation_from_row(row: &PgRow) -> Result<Conversation, ConversationStoreError> {
    let status: String = row.try_get("status").map_err(row_error)?;
    let assigned_to: Option<String> = row.try_get("assigned_to").map_err(row_error)?;
    Ok(Conversation {
        id: ConversationId::parse(row.try_get::<String, _>("id").map_err(row_error)?)?,
        customer_id: CustomerId::parse(row.try_get::<String, _>("customer_id").map_err(row_error)?)?,
        status: ConversationStatus::from_str(&status)?,
        human_took_over: row.try_get("human_took_over").map_err(row_error)?,
        human_takeover_at: row.try_get("human_takeover_at").map_err(row_error)?,
        assigned_to: assigned_to.map(AgentId::parse).transpose()?,
        created_at: row.try_get("created_at").map_err(row_error)?,
        updated_at: row.try_get("updated_at").map_err(row_error)?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, ConversationStoreError> {
    let direction: String = row.try_get("direction").map_err(row_error)?;
    let sender: String = row.try_get("sender").map_err(row_error)?;
    Ok(Message {
        id: MessageId::from_uuid(row.try_get("id").map_err(row_error)?),
        conversation_id: ConversationId::parse(
            row.try_get::<String, _>("conversation_id").map_err(row_error)?,
        )?,
        external_id: row.try_get("external_id").map_err(row_error)?,
        direction: MessageDirection::from_str(&direction)?,
        sender: MessageSender::from_str(&sender)?,
        content: row.try_get("content").map_err(row_error)?,
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn sentiment_from_row(row: &PgRow) -> Result<SentimentAnalysis, ConversationStoreError> {
    let label: String = row.try_get("label").map_err(row_error)?;
    Ok(SentimentAnalysis {
        id: AnalysisId::from_uuid(row.try_get("id").map_err(row_error)?),
        conversation_id: ConversationId::parse(
            row.try_get::<String, _>("conversation_id").map_err(row_error)?,
        )?,
        message_external_id: row.try_get("message_external_id").map_err(row_error)?,
        score: row.try_get("score").map_err(row_error)?,
        label: SentimentLabel::from_str(&label)?,
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn escalation_from_row(row: &PgRow) -> Result<EscalationRecord, ConversationStoreError> {
    let reason: String = row.try_get("reason").map_err(row_error)?;
    let previous: String = row.try_get("previous_status").map_err(row_error)?;
    let next: String = row.try_get("next_status").map_err(row_error)?;
    Ok(EscalationRecord {
        id: EscalationId::from_uuid(row.try_get("id").map_err(row_error)?),
        conversation_id: ConversationId::parse(
            row.try_get::<String, _>("conversation_id").map_err(row_error)?,
        )?,
        reason: EscalationReason::from_str(&reason)?,
        previous_status: ConversationStatus::from_str(&previous)?,
        next_status: ConversationStatus::from_str(&next)?,
        signals: EscalationSignals {
            confidence: row.try_get("confidence").map_err(row_error)?,
            sentiment: row.try_get("sentiment").map_err(row_error)?,
        },
        created_at: row.try_get("created_at").map_err(row_error)?,
    })
}

fn row_error(err: sqlx::Error) -> ConversationStoreError {
    ConversationStoreError::Storage(format!("failed to decode conversation row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ConversationStoreError {
    match err {
        sqlx::Error::Database(db_err) => ConversationStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            ConversationStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => ConversationStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
