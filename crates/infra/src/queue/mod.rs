//! Queue storage and execution.
//!
//! ## Components
//!
//! - `QueueStore`: persistence with conditional claim / outcome writes
//! - `QueueProcessor`: dequeues a bounded batch, claims, dispatches by type,
//!   applies the retry policy
//! - `handlers`: the `process_message`, `send_follow_up` and
//!   `analyze_sentiment` implementations
//! - `QueueRunner`: interval / trigger driven loop with retention and
//!   stale-claim maintenance

pub mod handlers;
pub mod postgres;
pub mod processor;
pub mod runner;
pub mod store;

pub use handlers::{AnalyzeSentimentHandler, FollowUpSettings, ProcessMessageHandler, SendFollowUpHandler};
pub use postgres::PostgresQueueStore;
pub use processor::{BatchReport, MaintenanceReport, ProcessorConfig, QueueHandler, QueueProcessor};
pub use runner::{QueueRunner, QueueRunnerHandle, QueueTrigger};
pub use store::{InMemoryQueueStore, QueueStats, QueueStore, QueueStoreError};
