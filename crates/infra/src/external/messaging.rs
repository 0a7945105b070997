//! Messaging platform capability (MyAlice.ai).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{instrument, warn};

use ventas_core::ConversationId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MessagingError {
    #[error("messaging platform unavailable: {0}")]
    Unavailable(String),
    #[error("messaging request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("messaging client error: {0}")]
    Internal(String),
}

impl MessagingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MessagingError::Unavailable(_))
    }
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait MessagingClient: Send + Sync + 'static {
    async fn send_message(&self, conversation_id: &ConversationId, text: &str) -> Result<(), MessagingError>;

    /// Stop the platform bot; a human agent owns the conversation.
    async fn take_control(&self, conversation_id: &ConversationId) -> Result<(), MessagingError>;

    /// Hand the conversation back to automation.
    async fn release_control(&self, conversation_id: &ConversationId) -> Result<(), MessagingError>;
}

/// What a [`RecordingMessagingClient`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagingCall {
    Send { conversation_id: String, text: String },
    TakeControl { conversation_id: String },
    ReleaseControl { conversation_id: String },
}

/// In-memory client for tests/dev: records calls, optionally fails the next one.
#[derive(Debug, Default)]
pub struct RecordingMessagingClient {
    calls: Mutex<Vec<MessagingCall>>,
    failures: Mutex<Vec<MessagingError>>,
}

impl RecordingMessagingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MessagingCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MessagingCall::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next(&self, error: MessagingError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(error);
        }
    }

    fn record(&self, call: MessagingCall) -> Result<(), MessagingError> {
        if let Some(err) = self.failures.lock().ok().and_then(|mut f| f.pop()) {
            return Err(err);
        }
        self.calls
            .lock()
            .map_err(|_| MessagingError::Internal("recording lock poisoned".into()))?
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for RecordingMessagingClient {
    async fn send_message(&self, conversation_id: &ConversationId, text: &str) -> Result<(), MessagingError> {
        self.record(MessagingCall::Send {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
        })
    }

    async fn take_control(&self, conversation_id: &ConversationId) -> Result<(), MessagingError> {
        self.record(MessagingCall::TakeControl {
            conversation_id: conversation_id.to_string(),
        })
    }

    async fn release_control(&self, conversation_id: &ConversationId) -> Result<(), MessagingError> {
        self.record(MessagingCall::ReleaseControl {
            conversation_id: conversation_id.to_string(),
        })
    }
}

/// REST client for the MyAlice.ai conversation API.
#[derive(Debug, Clone)]
pub struct MyAliceClient {
    base_url: String,
    api_key: String,
    http: Client,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    text: &'a str,
}

impl MyAliceClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, MessagingError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(MessagingError::Internal("MyAlice API key cannot be empty".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| MessagingError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn url(&self, conversation_id: &ConversationId, action: &str) -> String {
        format!("{}/conversations/{}/{action}", self.base_url, conversation_id)
    }

    async fn post<B: Serialize + ?Sized>(&self, url: String, body: Option<&B>) -> Result<(), MessagingError> {
        let mut request = self.http.post(&url).header("X-Myalice-Api-Key", &self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                MessagingError::Unavailable(e.to_string())
            } else {
                MessagingError::Internal(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), %url, "messaging request failed");
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(MessagingError::Unavailable(format!("{status}: {message}")))
        } else {
            Err(MessagingError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl MessagingClient for MyAliceClient {
    #[instrument(skip(self, text), fields(conversation_id = %conversation_id))]
    async fn send_message(&self, conversation_id: &ConversationId, text: &str) -> Result<(), MessagingError> {
        self.post(self.url(conversation_id, "messages"), Some(&SendMessageBody { text }))
            .await
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn take_control(&self, conversation_id: &ConversationId) -> Result<(), MessagingError> {
        self.post::<()>(self.url(conversation_id, "take-control"), None).await
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn release_control(&self, conversation_id: &ConversationId) -> Result<(), MessagingError> {
        self.post::<()>(self.url(conversation_id, "release-control"), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_client_records_and_fails_once() {
        let client = RecordingMessagingClient::new();
        let conv = ConversationId::parse("conv-1").unwrap();

        client.fail_next(MessagingError::Unavailable("503".into()));
        assert!(client.send_message(&conv, "hola").await.unwrap_err().is_transient());

        client.send_message(&conv, "hola").await.unwrap();
        client.take_control(&conv).await.unwrap();

        assert_eq!(client.sent_texts(), vec!["hola".to_string()]);
        assert_eq!(
            client.calls().last(),
            Some(&MessagingCall::TakeControl {
                conversation_id: "conv-1".into()
            })
        );
    }

    #[test]
    fn myalice_requires_a_key() {
        assert!(MyAliceClient::new("https://api.myalice.ai", "").is_err());
        let client = MyAliceClient::new("https://api.myalice.ai/", "k").unwrap();
        let conv = ConversationId::parse("abc").unwrap();
        assert_eq!(
            client.url(&conv, "messages"),
            "https://api.myalice.ai/conversations/abc/messages"
        );
    }
}
