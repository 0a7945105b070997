//! OpenAI-compatible `/chat/completions` client.
//!
//! Works against any provider that speaks the same protocol (OpenAI,
//! DeepSeek, Abacus.AI, local gateways). The model is asked for a JSON object;
//! parsing is tolerant of providers that ignore `response_format`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::client::{ChatRole, ChatTurn, LlmClient, ReplyRequest};
use crate::result::{AiError, DraftReply, SentimentScore};

const REPLY_PROMPT: &str = "Eres un asistente de ventas. Responde al cliente de forma breve y amable. \
Devuelve un objeto JSON {\"reply\": string, \"confidence\": number entre 0 y 1} donde \
confidence indica que tan seguro estas de que la respuesta resuelve la consulta.";

const SENTIMENT_PROMPT: &str = "Clasifica el sentimiento del mensaje del cliente. \
Devuelve un objeto JSON {\"score\": number entre -1 (muy negativo) y 1 (muy positivo)}.";

#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl ChatCompletionsConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    config: ChatCompletionsConfig,
    endpoint: String,
    http: Client,
}

impl ChatCompletionsClient {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::InvalidInput("LLM API key cannot be empty".into()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Internal(format!("failed to build HTTP client: {e}")))?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            config,
            endpoint,
            http,
        })
    }

    async fn complete(&self, messages: Vec<ChatTurn>) -> Result<String, AiError> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat completion request failed");
            return Err(map_status(status, message));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiError::InvalidResponse("no choices in completion".into()))
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    #[instrument(skip(self, request), fields(conversation_id = %request.conversation_id))]
    async fn draft_reply(&self, request: &ReplyRequest) -> Result<DraftReply, AiError> {
        request.validate()?;

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatTurn {
            role: ChatRole::System,
            content: REPLY_PROMPT.to_string(),
        });
        messages.extend(request.history.iter().cloned());
        messages.push(ChatTurn::user(request.customer_message.clone()));

        let content = self.complete(messages).await?;
        let draft = parse_draft(&content)?;
        debug!(confidence = draft.confidence, "drafted reply");
        Ok(draft)
    }

    #[instrument(skip(self, text))]
    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentScore, AiError> {
        if text.trim().is_empty() {
            return Err(AiError::InvalidInput("text is empty".into()));
        }

        let messages = vec![
            ChatTurn {
                role: ChatRole::System,
                content: SENTIMENT_PROMPT.to_string(),
            },
            ChatTurn::user(text),
        ];

        let content = self.complete(messages).await?;
        parse_sentiment(&content)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: String,
}

fn map_transport_error(err: reqwest::Error) -> AiError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        AiError::Unavailable(err.to_string())
    } else {
        AiError::Internal(err.to_string())
    }
}

fn map_status(status: StatusCode, message: String) -> AiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        AiError::RateLimited(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        AiError::Unavailable(format!("{status}: {message}"))
    } else {
        AiError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Parse the model's reply content.
///
/// Expects `{"reply": "...", "confidence": 0.8}`. Plain text is accepted as the
/// reply with zero confidence, so it never goes out without review.
pub fn parse_draft(content: &str) -> Result<DraftReply, AiError> {
    let trimmed = strip_code_fence(content);
    if trimmed.is_empty() {
        return Err(AiError::InvalidResponse("empty completion".into()));
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => {
            let text = map
                .get("reply")
                .or_else(|| map.get("text"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AiError::InvalidResponse("missing `reply` field".into()))?;
            let confidence = map.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(DraftReply::new(text, confidence))
        }
        _ => Ok(DraftReply::new(trimmed, 0.0)),
    }
}

/// Parse a sentiment completion: `{"score": -0.4}` or a bare number.
pub fn parse_sentiment(content: &str) -> Result<SentimentScore, AiError> {
    let trimmed = strip_code_fence(content);

    let score = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map
            .get("score")
            .or_else(|| map.get("sentiment"))
            .and_then(Value::as_f64),
        Ok(Value::Number(n)) => n.as_f64(),
        _ => trimmed.parse::<f64>().ok(),
    };

    score
        .map(SentimentScore::new)
        .ok_or_else(|| AiError::InvalidResponse(format!("unparseable sentiment: {trimmed}")))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structured_draft() {
        let draft = parse_draft(r#"{"reply": "Claro, te ayudo", "confidence": 0.82}"#).unwrap();
        assert_eq!(draft.text, "Claro, te ayudo");
        assert!((draft.confidence - 0.82).abs() < f64::EPSILON);
    }

    #[test]
    fn plain_text_draft_has_no_confidence() {
        let draft = parse_draft("Hola, gracias por escribir").unwrap();
        assert_eq!(draft.text, "Hola, gracias por escribir");
        assert_eq!(draft.confidence, 0.0);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let draft = parse_draft("```json\n{\"reply\": \"ok\", \"confidence\": 2}\n```").unwrap();
        assert_eq!(draft.text, "ok");
        assert_eq!(draft.confidence, 1.0);
    }

    #[test]
    fn draft_without_reply_is_invalid() {
        let err = parse_draft(r#"{"confidence": 0.9}"#).unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse(_)));
        assert!(parse_draft("   ").is_err());
    }

    #[test]
    fn parses_sentiment_shapes() {
        assert_eq!(parse_sentiment(r#"{"score": -0.4}"#).unwrap().value(), -0.4);
        assert_eq!(parse_sentiment("0.25").unwrap().value(), 0.25);
        assert_eq!(parse_sentiment(r#"{"sentiment": -7}"#).unwrap().value(), -1.0);
        assert!(parse_sentiment("muy enojado").is_err());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            AiError::RateLimited(_)
        ));
        assert!(map_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!map_status(StatusCode::UNAUTHORIZED, String::new()).is_transient());
    }

    #[test]
    fn rejects_empty_api_key() {
        let config = ChatCompletionsConfig::new("https://api.openai.com/v1", " ", "gpt-4o-mini");
        assert!(ChatCompletionsClient::new(config).is_err());
    }
}
