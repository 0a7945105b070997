use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{LlmClient, ReplyRequest};
use crate::result::{AiError, DraftReply, SentimentScore};

/// Deterministic client for local runs and tests.
///
/// Returns the configured reply and score for every call. A queued failure is
/// returned once by the next call, then the client goes back to answering.
#[derive(Debug)]
pub struct StaticLlmClient {
    reply: DraftReply,
    sentiment: SentimentScore,
    failures: Mutex<Vec<AiError>>,
}

impl Default for StaticLlmClient {
    fn default() -> Self {
        Self::new(
            "¡Gracias por escribirnos! Un momento y te ayudamos con tu consulta.",
            0.9,
            0.0,
        )
    }
}

impl StaticLlmClient {
    pub fn new(reply: impl Into<String>, confidence: f64, sentiment: f64) -> Self {
        Self {
            reply: DraftReply::new(reply, confidence),
            sentiment: SentimentScore::new(sentiment),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: AiError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(error);
        }
    }

    fn take_failure(&self) -> Option<AiError> {
        self.failures.lock().ok().and_then(|mut f| f.pop())
    }
}

#[async_trait]
impl LlmClient for StaticLlmClient {
    async fn draft_reply(&self, request: &ReplyRequest) -> Result<DraftReply, AiError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        request.validate()?;
        Ok(self.reply.clone())
    }

    async fn analyze_sentiment(&self, _text: &str) -> Result<SentimentScore, AiError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.sentiment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_with_configured_values() {
        let client = StaticLlmClient::new("hola", 0.4, -0.9);

        let draft = client
            .draft_reply(&ReplyRequest::new("conv-1", "buenas"))
            .await
            .unwrap();
        assert_eq!(draft.text, "hola");
        assert_eq!(draft.confidence, 0.4);
        assert_eq!(client.analyze_sentiment("x").await.unwrap().value(), -0.9);
    }

    #[tokio::test]
    async fn queued_failure_is_returned_once() {
        let client = StaticLlmClient::default();
        client.fail_next(AiError::RateLimited("429".into()));

        assert!(client.analyze_sentiment("x").await.is_err());
        assert!(client.analyze_sentiment("x").await.is_ok());
    }
}
