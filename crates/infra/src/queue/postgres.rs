//! Postgres-backed queue store.
//!
//! ## Conditional writes
//!
//! | Operation        | Guard                                             |
//! |------------------|---------------------------------------------------|
//! | `claim`          | `status = 'pending' AND process_at <= now`        |
//! | `record_outcome` | `status = 'processing' AND attempts = <claimed>`  |
//! | `retry_failed`   | `status = 'failed'`                               |
//!
//! A guard that matches no row means another worker (or the operator) moved
//! the item first; callers treat that as "lost the race", not as an error.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ventas_core::QueueItemId;
use ventas_queue::{QueueItem, QueueItemType, QueueStatus};

use super::store::{QueueStats, QueueStore, QueueStoreError};

const COLUMNS: &str = "id, item_type, payload, priority, status, attempts, max_attempts, \
process_at, last_error, created_at, updated_at, claimed_at, processed_at";

#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[instrument(skip(self, item), fields(item_id = %item.id, item_type = %item.item_type), err)]
    async fn enqueue(&self, item: QueueItem) -> Result<QueueItemId, QueueStoreError> {
        insert(&self.pool, &item)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e, Some(item.id)))?;
        Ok(item.id)
    }

    #[instrument(skip(self, items), fields(count = items.len()), err)]
    async fn enqueue_all(&self, items: Vec<QueueItem>) -> Result<Vec<QueueItemId>, QueueStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("enqueue_all", e, None))?;

        for item in &items {
            insert(&mut *tx, item)
                .await
                .map_err(|e| map_sqlx_error("enqueue_all", e, Some(item.id)))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("enqueue_all", e, None))?;
        Ok(items.iter().map(|i| i.id).collect())
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM queue_items WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e, Some(id)))?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn dequeue_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM queue_items \
             WHERE status = 'pending' AND process_at <= $1 \
             ORDER BY priority DESC, created_at ASC, id ASC \
             LIMIT $2"
        ))
        .bind(now)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("dequeue_due", e, None))?;
        rows.iter().map(item_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE queue_items \
             SET status = 'processing', attempts = attempts + 1, claimed_at = $2, updated_at = $2 \
             WHERE id = $1 AND status = 'pending' AND process_at <= $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim", e, Some(id)))?;
        row.as_ref().map(item_from_row).transpose()
    }

    #[instrument(skip(self, item), fields(item_id = %item.id, attempt = item.attempts), err)]
    async fn record_outcome(&self, item: &QueueItem) -> Result<bool, QueueStoreError> {
        let result = sqlx::query(
            "UPDATE queue_items \
             SET status = $3, process_at = $4, last_error = $5, updated_at = $6, \
                 claimed_at = $7, processed_at = $8 \
             WHERE id = $1 AND status = 'processing' AND attempts = $2",
        )
        .bind(item.id.as_uuid())
        .bind(to_i32(item.attempts))
        .bind(item.status.as_str())
        .bind(item.process_at)
        .bind(item.last_error.as_deref())
        .bind(item.updated_at)
        .bind(item.claimed_at)
        .bind(item.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_outcome", e, Some(item.id)))?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM queue_items \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e, None))?;
        rows.iter().map(item_from_row).collect()
    }

    async fn list_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM queue_items \
             WHERE status = 'processing' AND claimed_at < $1 \
             ORDER BY claimed_at ASC \
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stale_claims", e, None))?;
        rows.iter().map(item_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn retry_failed(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<QueueItem, QueueStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE queue_items \
             SET status = 'pending', attempts = 0, process_at = $2, updated_at = $2, \
                 claimed_at = NULL, processed_at = NULL \
             WHERE id = $1 AND status = 'failed' \
             RETURNING {COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("retry_failed", e, Some(id)))?;

        match row {
            Some(row) => item_from_row(&row),
            None => match self.get(id).await? {
                Some(item) => Err(QueueStoreError::InvalidState(format!(
                    "only failed items can be retried (item {id} is {})",
                    item.status
                ))),
                None => Err(QueueStoreError::NotFound(id)),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueStoreError> {
        let result = sqlx::query(
            "DELETE FROM queue_items \
             WHERE status IN ('completed', 'failed') AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_finished", e, None))?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<QueueStats, QueueStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM queue_items GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e, None))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(row_error)?;
            let count: i64 = row.try_get("count").map_err(row_error)?;
            let status = QueueStatus::from_str(&status)
                .map_err(|e| QueueStoreError::Storage(e.to_string()))?;
            stats.bump(status, count.max(0) as u64);
        }
        Ok(stats)
    }
}

async fn insert<'e, E>(executor: E, item: &QueueItem) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(&format!(
        "INSERT INTO queue_items ({COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    ))
    .bind(item.id.as_uuid())
    .bind(item.item_type.as_str())
    .bind(&item.payload)
    .bind(item.priority)
    .bind(item.status.as_str())
    .bind(to_i32(item.attempts))
    .bind(to_i32(item.max_attempts))
    .bind(item.process_at)
    .bind(item.last_error.as_deref())
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(item.claimed_at)
    .bind(item.processed_at)
    .execute(executor)
    .await?;
    Ok(())
}

fn item_from_row(row: &PgRow) -> Result<QueueItem, QueueStoreError> {
    let item_type: String = row.try_get("item_type").map_err(row_error)?;
    let status: String = row.try_get("status").map_err(row_error)?;
    let attempts: i32 = row.try_get("attempts").map_err(row_error)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(row_error)?;
    let id: uuid::Uuid = row.try_get("id").map_err(row_error)?;

    Ok(QueueItem {
        id: QueueItemId::from_uuid(id),
        item_type: QueueItemType::from_str(&item_type)
            .map_err(|e| QueueStoreError::Storage(e.to_string()))?,
        payload: row.try_get("payload").map_err(row_error)?,
        priority: row.try_get("priority").map_err(row_error)?,
        status: QueueStatus::from_str(&status)
            .map_err(|e| QueueStoreError::Storage(e.to_string()))?,
        attempts: attempts.max(0) as u32,
        max_attempts: max_attempts.max(1) as u32,
        process_at: row.try_get("process_at").map_err(row_error)?,
        last_error: row.try_get("last_error").map_err(row_error)?,
        created_at: row.try_get("created_at").map_err(row_error)?,
        updated_at: row.try_get("updated_at").map_err(row_error)?,
        claimed_at: row.try_get("claimed_at").map_err(row_error)?,
        processed_at: row.try_get("processed_at").map_err(row_error)?,
    })
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_error(err: sqlx::Error) -> QueueStoreError {
    QueueStoreError::Storage(format!("failed to decode queue row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error, id: Option<QueueItemId>) -> QueueStoreError {
    match err {
        sqlx::Error::Database(db_err) => match (db_err.code().as_deref(), id) {
            // Unique violation on the primary key
            (Some("23505"), Some(id)) => QueueStoreError::AlreadyExists(id),
            _ => QueueStoreError::Storage(format!(
                "database error in {operation}: {}",
                db_err.message()
            )),
        },
        sqlx::Error::PoolClosed => {
            QueueStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => QueueStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
