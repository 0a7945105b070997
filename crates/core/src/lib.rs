//! `ventas-core`: shared identifiers and the domain error model.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AgentId, AnalysisId, ConversationId, CustomerId, EscalationId, MessageId, QueueItemId};
