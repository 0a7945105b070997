//! Background driver for the queue processor.
//!
//! - Schedule: one batch every `poll_interval`
//! - Event trigger: [`QueueTrigger::notify`] after enqueueing; triggers coalesce
//! - Maintenance: every `maintenance_every` ticks, purge and stale-claim release
//! - Failures are logged and never stop the loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::processor::QueueProcessor;

/// Wakes the runner ahead of its next tick.
///
/// Any number of notifications before the runner wakes count as one.
#[derive(Debug, Clone, Default)]
pub struct QueueTrigger(Arc<Notify>);

impl QueueTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn notified(&self) {
        self.0.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct QueueRunner {
    pub poll_interval: Duration,
    /// Run maintenance once every this many ticks (0 disables it)
    pub maintenance_every: u32,
}

impl Default for QueueRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            maintenance_every: 12,
        }
    }
}

/// Handle for the running queue runner (shutdown + trigger hook).
#[derive(Debug)]
pub struct QueueRunnerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    trigger: QueueTrigger,
    join: Option<JoinHandle<()>>,
}

impl QueueRunnerHandle {
    pub fn trigger(&self) -> QueueTrigger {
        self.trigger.clone()
    }

    /// Stop after the batch in flight, if any.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl QueueRunner {
    pub fn spawn(&self, processor: Arc<QueueProcessor>, trigger: QueueTrigger) -> QueueRunnerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let cfg = self.clone();
        let loop_trigger = trigger.clone();
        let join = tokio::spawn(async move { runner_loop(cfg, processor, loop_trigger, shutdown_rx).await });

        QueueRunnerHandle {
            shutdown: Some(shutdown_tx),
            trigger,
            join: Some(join),
        }
    }
}

async fn runner_loop(
    cfg: QueueRunner,
    processor: Arc<QueueProcessor>,
    trigger: QueueTrigger,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    info!(
        poll_interval_ms = cfg.poll_interval.as_millis() as u64,
        batch_size = processor.config().batch_size,
        "queue runner started"
    );

    let mut interval = tokio::time::interval(cfg.poll_interval.max(Duration::from_millis(10)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u32 = 0;

    loop {
        let scheduled = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = interval.tick() => true,
            _ = trigger.notified() => false,
        };

        let batch_size = processor.config().batch_size;
        if let Err(e) = processor.process_batch(batch_size).await {
            error!(error = %e, "queue batch failed");
        }

        if scheduled && cfg.maintenance_every > 0 {
            ticks = ticks.wrapping_add(1);
            if ticks % cfg.maintenance_every == 0 {
                if let Err(e) = processor.run_maintenance().await {
                    error!(error = %e, "queue maintenance failed");
                }
            }
        }
    }

    info!("queue runner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryQueueStore, ProcessorConfig, QueueHandler, QueueStore};
    use async_trait::async_trait;
    use serde_json::json;
    use ventas_queue::{HandlerError, QueueItem, QueueItemType, QueueStatus};

    struct Succeeds;

    #[async_trait]
    impl QueueHandler for Succeeds {
        async fn handle(&self, _item: &QueueItem) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn trigger_processes_without_waiting_for_the_interval() {
        let store = InMemoryQueueStore::arc();
        let processor = Arc::new(
            QueueProcessor::new(store.clone(), ProcessorConfig::default())
                .with_handler(QueueItemType::ProcessMessage, Arc::new(Succeeds)),
        );
        let runner = QueueRunner {
            poll_interval: Duration::from_secs(3600),
            maintenance_every: 0,
        };
        let handle = runner.spawn(processor, QueueTrigger::new());

        let id = store
            .enqueue(QueueItem::new(QueueItemType::ProcessMessage, json!({})))
            .await
            .unwrap();
        handle.trigger().notify();

        let mut done = false;
        for _ in 0..100 {
            if store.get(id).await.unwrap().unwrap().status == QueueStatus::Completed {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert!(done);
    }
}
