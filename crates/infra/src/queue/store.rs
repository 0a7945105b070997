//! Queue storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use ventas_core::QueueItemId;
use ventas_queue::{QueueItem, QueueStatus};

/// Queue store abstraction.
///
/// Every state change that races with other workers is a conditional write:
/// [`QueueStore::claim`] only moves `pending` rows, and
/// [`QueueStore::record_outcome`] only lands while the row still holds the
/// caller's claim.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new item.
    async fn enqueue(&self, item: QueueItem) -> Result<QueueItemId, QueueStoreError>;

    /// Insert several items; either all of them land or none do.
    async fn enqueue_all(&self, items: Vec<QueueItem>) -> Result<Vec<QueueItemId>, QueueStoreError>;

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError>;

    /// Up to `limit` pending items due at `now`, highest priority first, then oldest.
    async fn dequeue_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError>;

    /// Atomically move a due pending item to processing and count the attempt.
    ///
    /// Returns `None` when another worker got there first (or the item is not
    /// due / not pending any more).
    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError>;

    /// Write back the result of a claimed attempt.
    ///
    /// Lands only if the stored row is still `processing` with the same attempt
    /// count; returns whether it did.
    async fn record_outcome(&self, item: &QueueItem) -> Result<bool, QueueStoreError>;

    /// Items by status (all when `None`), newest first.
    async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError>;

    /// Processing items claimed before `cutoff`.
    async fn list_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError>;

    /// Move a failed item back to pending with a fresh attempt budget.
    async fn retry_failed(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<QueueItem, QueueStoreError>;

    /// Delete completed/failed items that finished before `cutoff`.
    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueStoreError>;

    async fn stats(&self) -> Result<QueueStats, QueueStoreError>;
}

/// Queue store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueStoreError {
    #[error("queue item not found: {0}")]
    NotFound(QueueItemId),
    #[error("queue item already exists: {0}")]
    AlreadyExists(QueueItemId),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Item counts grouped by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }

    pub(crate) fn bump(&mut self, status: QueueStatus, by: u64) {
        match status {
            QueueStatus::Pending => self.pending += by,
            QueueStatus::Processing => self.processing += by,
            QueueStatus::Completed => self.completed += by,
            QueueStatus::Failed => self.failed += by,
        }
    }
}

/// Dispatch order: priority desc, then created_at asc, then id.
pub(crate) fn dispatch_order(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// In-memory queue store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    items: RwLock<HashMap<QueueItemId, QueueItem>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<QueueItemId, QueueItem>>, QueueStoreError> {
        self.items
            .read()
            .map_err(|_| QueueStoreError::Storage("queue lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<QueueItemId, QueueItem>>, QueueStoreError> {
        self.items
            .write()
            .map_err(|_| QueueStoreError::Storage("queue lock poisoned".into()))
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, item: QueueItem) -> Result<QueueItemId, QueueStoreError> {
        let mut items = self.write()?;
        if items.contains_key(&item.id) {
            return Err(QueueStoreError::AlreadyExists(item.id));
        }
        let id = item.id;
        items.insert(id, item);
        Ok(id)
    }

    async fn enqueue_all(&self, batch: Vec<QueueItem>) -> Result<Vec<QueueItemId>, QueueStoreError> {
        let mut items = self.write()?;
        if let Some(dup) = batch.iter().find(|i| items.contains_key(&i.id)) {
            return Err(QueueStoreError::AlreadyExists(dup.id));
        }
        let ids = batch.iter().map(|i| i.id).collect();
        for item in batch {
            items.insert(item.id, item);
        }
        Ok(ids)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn dequeue_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.read()?;
        let mut due: Vec<_> = items.values().filter(|i| i.is_due(now)).cloned().collect();
        due.sort_by(dispatch_order);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        let mut items = self.write()?;
        let Some(item) = items.get_mut(&id) else {
            return Ok(None);
        };
        if !item.is_due(now) {
            return Ok(None);
        }
        item.claim(now)
            .map_err(|e| QueueStoreError::InvalidState(e.to_string()))?;
        Ok(Some(item.clone()))
    }

    async fn record_outcome(&self, item: &QueueItem) -> Result<bool, QueueStoreError> {
        let mut items = self.write()?;
        match items.get_mut(&item.id) {
            Some(stored)
                if stored.status == QueueStatus::Processing && stored.attempts == item.attempts =>
            {
                *stored = item.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.read()?;
        let mut result: Vec<_> = items
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let items = self.read()?;
        let mut result: Vec<_> = items
            .values()
            .filter(|i| {
                i.status == QueueStatus::Processing && i.claimed_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect();
        result.sort_by_key(|i| i.claimed_at);
        result.truncate(limit);
        Ok(result)
    }

    async fn retry_failed(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> Result<QueueItem, QueueStoreError> {
        let mut items = self.write()?;
        let item = items.get_mut(&id).ok_or(QueueStoreError::NotFound(id))?;
        item.retry(now)
            .map_err(|e| QueueStoreError::InvalidState(e.to_string()))?;
        Ok(item.clone())
    }

    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueStoreError> {
        let mut items = self.write()?;
        let before = items.len();
        items.retain(|_, i| {
            !(i.status.is_terminal() && i.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - items.len()) as u64)
    }

    async fn stats(&self) -> Result<QueueStats, QueueStoreError> {
        let items = self.read()?;
        let mut stats = QueueStats::default();
        for item in items.values() {
            stats.bump(item.status, 1);
        }
        Ok(stats)
    }
}
