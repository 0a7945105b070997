//! `ventas-ai`
//!
//! **Responsibility:** LLM capability boundary.
//!
//! This crate is intentionally **not** part of the domain model:
//! - It must not depend on conversation or queue state.
//! - It must not mutate anything; it returns drafts and scores.
//! - Errors say whether a retry could help ([`AiError::is_transient`]).

pub mod chat_completions;
pub mod client;
pub mod result;
pub mod static_client;

pub use chat_completions::{ChatCompletionsClient, ChatCompletionsConfig};
pub use client::{ChatRole, ChatTurn, LlmClient, ReplyRequest};
pub use result::{AiError, DraftReply, SentimentScore};
pub use static_client::StaticLlmClient;
