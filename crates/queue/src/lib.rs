//! `ventas-queue`: the queue item model.
//!
//! ## Design
//!
//! - Items are typed (`QueueItemType`) and carry an opaque JSON payload
//! - Per-type payload schemas live in [`task`] and are checked at dispatch time
//! - Status moves pending → processing → {completed, failed}; a failed attempt
//!   with budget left goes back to pending with a future `process_at`
//! - Retry delay is exponential (`base * 2^attempts`) with a ceiling
//!
//! Storage and execution live in `ventas-infra`.

pub mod error;
pub mod task;
pub mod types;

pub use error::HandlerError;
pub use task::{
    AnalyzeSentimentPayload, ProcessMessagePayload, QueueTask, SendFollowUpPayload, decode_payload,
};
pub use types::{FailureOutcome, QueueItem, QueueItemType, QueueStatus, RetryPolicy};
