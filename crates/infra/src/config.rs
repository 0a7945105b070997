//! Application configuration.
//!
//! Loaded from environment variables, optionally seeded from a `.env` file.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use ventas_conversations::EscalationPolicy;
use ventas_queue::RetryPolicy;

use crate::queue::{FollowUpSettings, ProcessorConfig, QueueRunner};

/// LLM provider settings (any OpenAI-compatible endpoint).
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// MyAlice.ai settings.
#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server bind address (e.g. "0.0.0.0:8080")
    pub bind_address: String,

    /// Postgres URL; in-memory stores when absent
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    /// Shared secret for `X-Signature` on inbound webhooks
    pub webhook_secret: String,

    /// Bearer token for the operator endpoints
    pub admin_token: String,

    /// `json` or `pretty`
    pub log_format: String,

    pub escalation: EscalationPolicy,
    pub processor: ProcessorConfig,
    pub runner: QueueRunner,

    /// Static client when unset
    pub llm: Option<LlmSettings>,
    /// Recording client when unset
    pub messaging: Option<MessagingSettings>,
    pub follow_up: Option<FollowUpSettings>,
}

impl AppConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let webhook_secret = var("WEBHOOK_SECRET").context("WEBHOOK_SECRET must be set")?;
        let admin_token = var("ADMIN_TOKEN").context("ADMIN_TOKEN must be set")?;

        let mut escalation = EscalationPolicy::default()
            .with_confidence_threshold(parsed(&var, "ESCALATION_CONFIDENCE_THRESHOLD", 0.3)?)
            .with_sentiment_floor(parsed(&var, "ESCALATION_SENTIMENT_FLOOR", -0.7)?);
        if let Some(keywords) = var("ESCALATION_KEYWORDS") {
            escalation = escalation.with_handoff_keywords(keywords.split(','));
        }
        if !(0.0..=1.0).contains(&escalation.confidence_threshold) {
            bail!("ESCALATION_CONFIDENCE_THRESHOLD must be within [0, 1]");
        }
        if !(-1.0..=1.0).contains(&escalation.sentiment_floor) {
            bail!("ESCALATION_SENTIMENT_FLOOR must be within [-1, 1]");
        }

        let retry = RetryPolicy::new(
            parsed::<u32, _>(&var, "QUEUE_MAX_ATTEMPTS", 3)?.max(1),
            Duration::from_secs(1),
            Duration::from_secs(parsed(&var, "QUEUE_MAX_BACKOFF_SECS", 3600)?),
        );
        let retention_days: u64 = parsed(&var, "QUEUE_RETENTION_DAYS", 7)?;
        let retention_secs = retention_days
            .checked_mul(24 * 60 * 60)
            .context("QUEUE_RETENTION_DAYS is out of range")?;
        let processor = ProcessorConfig {
            batch_size: parsed::<usize, _>(&var, "QUEUE_BATCH_SIZE", 10)?.max(1),
            retry,
            stale_after: Duration::from_secs(parsed(&var, "QUEUE_STALE_AFTER_SECS", 15 * 60)?),
            retention: Duration::from_secs(retention_secs),
        };
        let runner = QueueRunner {
            poll_interval: Duration::from_millis(
                parsed::<u64, _>(&var, "QUEUE_POLL_INTERVAL_MS", 5_000)?.max(10),
            ),
            ..QueueRunner::default()
        };

        let llm = match var("LLM_API_KEY") {
            Some(api_key) => Some(LlmSettings {
                base_url: var("LLM_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".into()),
                api_key,
                model: var("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            }),
            None => None,
        };
        let messaging = match var("MYALICE_API_KEY") {
            Some(api_key) => Some(MessagingSettings {
                base_url: var("MYALICE_BASE_URL").unwrap_or_else(|| "https://api.myalice.ai/v1".into()),
                api_key,
            }),
            None => None,
        };
        let follow_up = match var("FOLLOW_UP_DELAY_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("FOLLOW_UP_DELAY_SECS is not a number: {raw}"))?;
                Some(FollowUpSettings {
                    delay: Duration::from_secs(secs),
                    text: var("FOLLOW_UP_TEXT").unwrap_or_else(|| {
                        "¿Pudimos resolver tu consulta? Si necesitas algo más, escríbenos.".into()
                    }),
                    max_attempts: processor.retry.max_attempts,
                })
            }
            None => None,
        };

        Ok(Self {
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".into()),
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            webhook_secret,
            admin_token,
            log_format: var("LOG_FORMAT").unwrap_or_else(|| "json".into()),
            escalation,
            processor,
            runner,
            llm,
            messaging,
            follow_up,
        })
    }

    /// Configuration for tests: in-memory stores, static clients.
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            database_url: None,
            database_max_connections: 1,
            webhook_secret: "test-webhook-secret".into(),
            admin_token: "test-admin-token".into(),
            log_format: "pretty".into(),
            escalation: EscalationPolicy::default(),
            processor: ProcessorConfig::default(),
            runner: QueueRunner::default(),
            llm: None,
            messaging: None,
            follow_up: None,
        }
    }
}

fn parsed<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
