use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::{AiError, DraftReply, SentimentScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One earlier turn of the conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub conversation_id: String,
    pub customer_message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl ReplyRequest {
    pub fn new(conversation_id: impl Into<String>, customer_message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            customer_message: customer_message.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AiError> {
        if self.customer_message.trim().is_empty() {
            return Err(AiError::InvalidInput("customer message is empty".into()));
        }
        Ok(())
    }
}

/// Text completion and sentiment scoring.
///
/// Implementations must be safe to share across processor tasks.
#[async_trait]
pub trait LlmClient: Send + Sync + 'static {
    async fn draft_reply(&self, request: &ReplyRequest) -> Result<DraftReply, AiError>;

    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentScore, AiError>;
}
