//! Queue processor: claim, dispatch by type, apply the retry policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{Instrument, debug, error, info, info_span, warn};

use ventas_queue::{FailureOutcome, HandlerError, QueueItem, QueueItemType, RetryPolicy};

use super::store::{QueueStore, QueueStoreError};

/// Executes one queue item type.
///
/// Return [`HandlerError::Transient`] for failures worth retrying and
/// [`HandlerError::Terminal`] for failures that can never succeed.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(&self, item: &QueueItem) -> Result<(), HandlerError>;
}

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound for a single batch
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Processing claims older than this are considered abandoned. Must exceed
    /// the longest handler run, or a live item can be dispatched twice.
    pub stale_after: Duration,
    /// Terminal items older than this are purged
    pub retention: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            retry: RetryPolicy::default(),
            stale_after: Duration::from_secs(15 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// What a batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Items this invocation claimed
    pub claimed: usize,
    pub completed: usize,
    /// Failed attempts sent back to pending
    pub retried: usize,
    /// Items that reached terminal failure
    pub failed: usize,
    /// Items lost to another worker, or whose write-back did not land
    pub skipped: usize,
}

/// What a maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub purged: u64,
    pub released: usize,
}

enum Attempt {
    Completed,
    Retried,
    Failed,
    Lost,
}

pub struct QueueProcessor {
    store: Arc<dyn QueueStore>,
    handlers: HashMap<QueueItemType, Arc<dyn QueueHandler>>,
    config: ProcessorConfig,
}

impl QueueProcessor {
    pub fn new(store: Arc<dyn QueueStore>, config: ProcessorConfig) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register the handler for a type, replacing any previous one.
    pub fn register_handler(&mut self, item_type: QueueItemType, handler: Arc<dyn QueueHandler>) {
        self.handlers.insert(item_type, handler);
    }

    pub fn with_handler(mut self, item_type: QueueItemType, handler: Arc<dyn QueueHandler>) -> Self {
        self.register_handler(item_type, handler);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Eligible items, at most `limit` and never more than the configured batch size.
    pub async fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueItem>, QueueStoreError> {
        let limit = limit.min(self.config.batch_size);
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.dequeue_due(Utc::now(), limit).await
    }

    /// Run one batch.
    ///
    /// Only a failure to read the batch is returned as an error; per-item
    /// failures are logged and reflected in the report.
    pub async fn process_batch(&self, limit: usize) -> Result<BatchReport, QueueStoreError> {
        let items = self.dequeue_batch(limit).await?;
        let mut report = BatchReport::default();

        for candidate in items {
            let claimed = match self.store.claim(candidate.id, Utc::now()).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    debug!(item_id = %candidate.id, "item already claimed elsewhere");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(item_id = %candidate.id, error = %e, "claim failed");
                    report.skipped += 1;
                    continue;
                }
            };

            report.claimed += 1;
            let span = info_span!(
                "queue_item",
                item_id = %claimed.id,
                item_type = %claimed.item_type,
                attempt = claimed.attempts
            );
            match self.run_claimed(claimed).instrument(span).await {
                Attempt::Completed => report.completed += 1,
                Attempt::Retried => report.retried += 1,
                Attempt::Failed => report.failed += 1,
                Attempt::Lost => report.skipped += 1,
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                "queue batch processed"
            );
        }
        Ok(report)
    }

    async fn run_claimed(&self, mut item: QueueItem) -> Attempt {
        let result = self.dispatch(&item).await;
        let now = Utc::now();

        let attempt = match result {
            Ok(()) => match item.complete(now) {
                Ok(()) => Attempt::Completed,
                Err(e) => {
                    error!(error = %e, "cannot complete item");
                    return Attempt::Lost;
                }
            },
            Err(handler_error) => match item.fail(&handler_error, now, &self.config.retry) {
                Ok(FailureOutcome::Retry { delay, process_at }) => {
                    warn!(
                        error = %handler_error,
                        delay_ms = delay.as_millis() as u64,
                        %process_at,
                        "attempt failed; retry scheduled"
                    );
                    Attempt::Retried
                }
                Ok(FailureOutcome::Failed) => {
                    error!(
                        error = %handler_error,
                        terminal = handler_error.is_terminal(),
                        "item failed permanently"
                    );
                    Attempt::Failed
                }
                Err(e) => {
                    error!(error = %e, "cannot fail item");
                    return Attempt::Lost;
                }
            },
        };

        match self.store.record_outcome(&item).await {
            Ok(true) => attempt,
            Ok(false) => {
                warn!("outcome discarded; the claim is no longer held");
                Attempt::Lost
            }
            Err(e) => {
                // The claim stays in processing and is recovered by stale-claim release.
                error!(error = %e, "failed to record outcome");
                Attempt::Lost
            }
        }
    }

    /// Run the handler on its own task so a panic becomes a transient error.
    async fn dispatch(&self, item: &QueueItem) -> Result<(), HandlerError> {
        let Some(handler) = self.handlers.get(&item.item_type).cloned() else {
            return Err(HandlerError::terminal(format!(
                "no handler registered for {}",
                item.item_type
            )));
        };

        let owned = item.clone();
        let task = tokio::spawn(
            async move { handler.handle(&owned).await }.instrument(tracing::Span::current()),
        );

        match task.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                Err(HandlerError::transient("handler panicked"))
            }
            Err(join_error) => Err(HandlerError::unexpected(join_error)),
        }
    }

    /// Purge old terminal items and return abandoned claims to the queue.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, QueueStoreError> {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or(chrono::Duration::MAX);

        let purged = match now.checked_sub_signed(retention) {
            Some(cutoff) => self.store.purge_finished(cutoff).await?,
            None => 0,
        };

        let mut released = 0;
        if let Some(cutoff) = now.checked_sub_signed(stale_after) {
            let stale = self
                .store
                .list_stale_claims(cutoff, self.config.batch_size.max(1) * 10)
                .await?;
            for mut item in stale {
                let expired = HandlerError::transient("claim expired before an outcome was recorded");
                if item.fail(&expired, now, &self.config.retry).is_err() {
                    continue;
                }
                if self.store.record_outcome(&item).await? {
                    warn!(item_id = %item.id, attempt = item.attempts, status = %item.status, "released stale claim");
                    released += 1;
                }
            }
        }

        if purged > 0 || released > 0 {
            info!(purged, released, "queue maintenance");
        }
        Ok(MaintenanceReport { purged, released })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ventas_queue::QueueStatus;

    struct Scripted {
        calls: AtomicUsize,
        behavior: fn(usize) -> Result<(), HandlerError>,
    }

    impl Scripted {
        fn new(behavior: fn(usize) -> Result<(), HandlerError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
            })
        }
    }

    #[async_trait]
    impl QueueHandler for Scripted {
        async fn handle(&self, _item: &QueueItem) -> Result<(), HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.behavior)(n)
        }
    }

    struct Panics;

    #[async_trait]
    impl QueueHandler for Panics {
        async fn handle(&self, _item: &QueueItem) -> Result<(), HandlerError> {
            panic!("boom");
        }
    }

    fn instant_retries() -> ProcessorConfig {
        ProcessorConfig {
            retry: RetryPolicy::new(3, Duration::ZERO, Duration::ZERO),
            ..ProcessorConfig::default()
        }
    }

    async fn enqueue(store: &InMemoryQueueStore, item_type: QueueItemType) -> ventas_core::QueueItemId {
        store.enqueue(QueueItem::new(item_type, json!({}))).await.unwrap()
    }

    #[tokio::test]
    async fn successful_item_completes() {
        let store = InMemoryQueueStore::arc();
        let id = enqueue(&store, QueueItemType::ProcessMessage).await;
        let processor = QueueProcessor::new(store.clone(), ProcessorConfig::default())
            .with_handler(QueueItemType::ProcessMessage, Scripted::new(|_| Ok(())));

        let report = processor.process_batch(10).await.unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert!(item.processed_at.is_some());
        assert_eq!(item.attempts, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_with_backoff() {
        let store = InMemoryQueueStore::arc();
        let id = enqueue(&store, QueueItemType::ProcessMessage).await;
        let processor = QueueProcessor::new(store.clone(), ProcessorConfig::default()).with_handler(
            QueueItemType::ProcessMessage,
            Scripted::new(|_| Err(HandlerError::transient("llm timeout"))),
        );

        let before = Utc::now();
        let report = processor.process_batch(10).await.unwrap();

        assert_eq!(report.retried, 1);
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.last_error.as_deref(), Some("llm timeout"));
        // attempt 1 failed: 2^1 seconds
        assert!(item.process_at >= before + chrono::Duration::seconds(2));

        // Not due yet, so the next batch is empty.
        assert_eq!(processor.process_batch(10).await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn exhausted_item_fails_terminally() {
        let store = InMemoryQueueStore::arc();
        let id = enqueue(&store, QueueItemType::SendFollowUp).await;
        let handler = Scripted::new(|_| Err(HandlerError::transient("messaging down")));
        let processor = QueueProcessor::new(store.clone(), instant_retries())
            .with_handler(QueueItemType::SendFollowUp, handler.clone());

        for _ in 0..5 {
            processor.process_batch(10).await.unwrap();
        }

        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let store = InMemoryQueueStore::arc();
        let id = enqueue(&store, QueueItemType::AnalyzeSentiment).await;
        let processor = QueueProcessor::new(store.clone(), instant_retries()).with_handler(
            QueueItemType::AnalyzeSentiment,
            Scripted::new(|n| {
                if n < 2 {
                    Err(HandlerError::transient("flaky"))
                } else {
                    Ok(())
                }
            }),
        );

        for _ in 0..3 {
            processor.process_batch(10).await.unwrap();
        }

        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert_eq!(item.attempts, 3);
    }

    #[tokio::test]
    async fn terminal_failure_skips_remaining_attempts() {
        let store = InMemoryQueueStore::arc();
        let id = enqueue(&store, QueueItemType::ProcessMessage).await;
        let processor = QueueProcessor::new(store.clone(), instant_retries()).with_handler(
            QueueItemType::ProcessMessage,
            Scripted::new(|_| Err(HandlerError::terminal("invalid payload"))),
        );

        let report = processor.process_batch(10).await.unwrap();

        assert_eq!(report.failed, 1);
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.attempts, 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_abort_the_batch() {
        let store = InMemoryQueueStore::arc();
        let bad = enqueue(&store, QueueItemType::AnalyzeSentiment).await;
        let good = enqueue(&store, QueueItemType::ProcessMessage).await;
        let processor = QueueProcessor::new(store.clone(), ProcessorConfig::default())
            .with_handler(QueueItemType::AnalyzeSentiment, Arc::new(Panics))
            .with_handler(QueueItemType::ProcessMessage, Scripted::new(|_| Ok(())));

        let report = processor.process_batch(10).await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.retried, 1);
        let bad = store.get(bad).await.unwrap().unwrap();
        assert_eq!(bad.status, QueueStatus::Pending);
        assert_eq!(bad.last_error.as_deref(), Some("handler panicked"));
        assert_eq!(
            store.get(good).await.unwrap().unwrap().status,
            QueueStatus::Completed
        );
    }

    #[tokio::test]
    async fn unregistered_type_fails_terminally() {
        let store = InMemoryQueueStore::arc();
        let id = enqueue(&store, QueueItemType::SendFollowUp).await;
        let processor = QueueProcessor::new(store.clone(), ProcessorConfig::default());

        processor.process_batch(10).await.unwrap();

        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert!(item.last_error.unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn batch_size_bounds_the_batch() {
        let store = InMemoryQueueStore::arc();
        for _ in 0..5 {
            enqueue(&store, QueueItemType::ProcessMessage).await;
        }
        let config = ProcessorConfig {
            batch_size: 2,
            ..ProcessorConfig::default()
        };
        let processor = QueueProcessor::new(store.clone(), config)
            .with_handler(QueueItemType::ProcessMessage, Scripted::new(|_| Ok(())));

        assert_eq!(processor.dequeue_batch(100).await.unwrap().len(), 2);
        assert_eq!(processor.process_batch(100).await.unwrap().completed, 2);
        assert_eq!(store.stats().await.unwrap().pending, 3);
    }

    #[tokio::test]
    async fn maintenance_releases_stale_claims() {
        let store = InMemoryQueueStore::arc();
        let two_hours_ago = Utc::now() - chrono::Duration::hours(2);
        let id = store
            .enqueue(QueueItem::new(QueueItemType::ProcessMessage, json!({})).schedule_at(two_hours_ago))
            .await
            .unwrap();
        store
            .claim(id, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap()
            .unwrap();

        let processor = QueueProcessor::new(store.clone(), instant_retries());
        let report = processor.run_maintenance().await.unwrap();

        assert_eq!(report.released, 1);
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempts, 1);
        assert!(item.last_error.unwrap().contains("claim expired"));
    }
}
