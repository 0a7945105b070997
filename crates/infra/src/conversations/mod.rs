//! Conversation persistence and control.
//!
//! - `ConversationStore`: conversations, messages, sentiment, escalation audit
//! - `ConversationService`: escalation / assign / release / close, keeping the
//!   messaging platform and the store in step

pub mod postgres;
pub mod service;
pub mod store;

pub use postgres::PostgresConversationStore;
pub use service::{ConversationService, ConversationServiceError};
pub use store::{
    ConversationMutation, ConversationStore, ConversationStoreError, InMemoryConversationStore,
    mutation,
};
