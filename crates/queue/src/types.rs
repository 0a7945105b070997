//! Core queue item types and the retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ventas_core::{DomainError, DomainResult, QueueItemId};

use crate::error::HandlerError;

/// Queue item type, used to route an item to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemType {
    /// Inbound customer message: draft a reply or escalate.
    ProcessMessage,
    /// Scheduled outbound follow-up.
    SendFollowUp,
    /// Standalone sentiment analysis for a conversation.
    AnalyzeSentiment,
}

impl QueueItemType {
    pub const ALL: [QueueItemType; 3] = [
        QueueItemType::ProcessMessage,
        QueueItemType::SendFollowUp,
        QueueItemType::AnalyzeSentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemType::ProcessMessage => "process_message",
            QueueItemType::SendFollowUp => "send_follow_up",
            QueueItemType::AnalyzeSentiment => "analyze_sentiment",
        }
    }
}

impl core::fmt::Display for QueueItemType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for QueueItemType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown queue item type: {s}")))
    }
}

/// Queue item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for `process_at` and a worker
    Pending,
    /// Claimed by a worker
    Processing,
    /// Handler succeeded
    Completed,
    /// Terminal failure or attempts exhausted
    Failed,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 4] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Completed,
        QueueStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl core::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for QueueStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown queue status: {s}")))
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt budget given to newly created items
    pub max_attempts: u32,
    /// Delay unit; attempt `k` waits `base_delay * 2^k`
    pub base_delay: Duration,
    /// Ceiling for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the next try after `attempt` attempts have failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;

        let delay_ms = 2_u64
            .checked_pow(attempt)
            .and_then(|factor| base_ms.checked_mul(factor))
            .unwrap_or(u64::MAX);

        Duration::from_millis(delay_ms.min(max_ms))
    }
}

/// What happened to an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending, invisible until `process_at`.
    Retry {
        delay: Duration,
        process_at: DateTime<Utc>,
    },
    /// No further attempts.
    Failed,
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    #[serde(rename = "type")]
    pub item_type: QueueItemType,
    /// Type-specific JSON payload, see [`crate::task`]
    pub payload: serde_json::Value,
    /// Higher runs sooner
    pub priority: i32,
    pub status: QueueStatus,
    /// Attempts started so far (incremented on claim)
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest dispatch time
    pub process_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the current claim was taken
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal status
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Create a pending item, due immediately.
    pub fn new(item_type: QueueItemType, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: QueueItemId::new(),
            item_type,
            payload,
            priority: 0,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: RetryPolicy::default().max_attempts,
            process_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            processed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// A budget of zero is bumped to one: every item gets at least one try.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Schedule the item for later execution.
    pub fn schedule_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = at;
        self
    }

    /// Schedule the item with a delay from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.process_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self
    }

    /// Eligible for dequeue at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.process_at <= now
    }

    /// pending → processing; counts the attempt.
    pub fn claim(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != QueueStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "cannot claim item {} in status {}",
                self.id, self.status
            )));
        }
        self.status = QueueStatus::Processing;
        self.attempts += 1;
        self.claimed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// processing → completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_processing("complete")?;
        self.status = QueueStatus::Completed;
        self.processed_at = Some(now);
        self.claimed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// processing → pending (with backoff) or failed.
    pub fn fail(
        &mut self,
        error: &HandlerError,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> DomainResult<FailureOutcome> {
        self.ensure_processing("fail")?;
        self.last_error = Some(error.message().to_string());
        self.claimed_at = None;
        self.updated_at = now;

        if error.is_terminal() || self.attempts >= self.max_attempts {
            self.status = QueueStatus::Failed;
            self.processed_at = Some(now);
            return Ok(FailureOutcome::Failed);
        }

        let delay = policy.delay_for_attempt(self.attempts);
        let process_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.status = QueueStatus::Pending;
        self.process_at = process_at;
        Ok(FailureOutcome::Retry { delay, process_at })
    }

    /// Operator retry: failed → pending with a fresh attempt budget.
    pub fn retry(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != QueueStatus::Failed {
            return Err(DomainError::invalid_transition(format!(
                "only failed items can be retried (item {} is {})",
                self.id, self.status
            )));
        }
        self.status = QueueStatus::Pending;
        self.attempts = 0;
        self.process_at = now;
        self.processed_at = None;
        self.claimed_at = None;
        self.updated_at = now;
        Ok(())
    }

    fn ensure_processing(&self, action: &str) -> DomainResult<()> {
        if self.status != QueueStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} item {} in status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}
