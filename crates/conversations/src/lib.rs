//! `ventas-conversations`: conversation lifecycle and the escalation policy.
//!
//! Pure domain: no storage, no platform clients. The queue handlers in
//! `ventas-infra` load a [`Conversation`], ask the [`EscalationPolicy`] what to
//! do and persist the resulting state together with its audit record.

pub mod conversation;
pub mod escalation;
pub mod message;

pub use conversation::{Conversation, ConversationStatus};
pub use escalation::{EscalationPolicy, EscalationReason, EscalationRecord, EscalationSignals};
pub use message::{Message, MessageDirection, MessageSender, SentimentAnalysis, SentimentLabel};
