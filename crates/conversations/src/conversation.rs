use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ventas_core::{AgentId, ConversationId, CustomerId, DomainError, DomainResult, EscalationId};

use crate::escalation::{EscalationReason, EscalationRecord, EscalationSignals};

/// Conversation status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Escalated,
    Resolved,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Escalated => "escalated",
            ConversationStatus::Resolved => "resolved",
            ConversationStatus::Closed => "closed",
        }
    }
}

impl core::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ConversationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "escalated" => Ok(ConversationStatus::Escalated),
            "resolved" => Ok(ConversationStatus::Resolved),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(DomainError::validation(format!(
                "unknown conversation status: {other}"
            ))),
        }
    }
}

/// A customer conversation mirrored from the messaging platform.
///
/// Invariants:
/// - `human_took_over` implies `Escalated`, or `Active` with an assignee
/// - `Closed` is final: no transitions, no automated processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub customer_id: CustomerId,
    pub status: ConversationStatus,
    pub human_took_over: bool,
    pub human_takeover_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, customer_id: CustomerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id,
            status: ConversationStatus::Active,
            human_took_over: false,
            human_takeover_at: None,
            assigned_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == ConversationStatus::Closed
    }

    /// Whether the bot may reply or schedule work on its own.
    pub fn accepts_automation(&self) -> bool {
        !self.is_closed() && !self.human_took_over
    }

    /// A new customer message on a resolved conversation reopens it.
    ///
    /// Returns whether the status changed.
    pub fn reopen_on_inbound(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ConversationStatus::Resolved {
            self.status = ConversationStatus::Active;
            self.updated_at = now;
            return true;
        }
        false
    }

    /// Hand the conversation to a human.
    ///
    /// Already-escalated conversations are left untouched and produce no record.
    pub fn escalate(
        &mut self,
        reason: EscalationReason,
        signals: EscalationSignals,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<EscalationRecord>> {
        self.ensure_open("escalate")?;
        if self.status == ConversationStatus::Escalated && self.human_took_over {
            return Ok(None);
        }

        let previous_status = self.status;
        self.status = ConversationStatus::Escalated;
        self.human_took_over = true;
        self.human_takeover_at = Some(now);
        self.updated_at = now;

        Ok(Some(self.record(reason, previous_status, signals, now)))
    }

    /// Assign an agent. Taking over a bot-handled conversation is audited.
    pub fn assign(
        &mut self,
        agent: AgentId,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<EscalationRecord>> {
        self.ensure_open("assign")?;

        let record = if self.human_took_over {
            None
        } else {
            let previous_status = self.status;
            self.human_took_over = true;
            self.human_takeover_at = Some(now);
            if self.status == ConversationStatus::Resolved {
                self.status = ConversationStatus::Active;
            }
            Some(self.record(
                EscalationReason::Manual,
                previous_status,
                EscalationSignals::default(),
                now,
            ))
        };

        self.assigned_to = Some(agent);
        self.updated_at = now;
        Ok(record)
    }

    /// Give the conversation back to the bot.
    pub fn release(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open("release")?;
        self.status = ConversationStatus::Active;
        self.human_took_over = false;
        self.human_takeover_at = None;
        self.assigned_to = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open("resolve")?;
        self.status = ConversationStatus::Resolved;
        self.human_took_over = false;
        self.human_takeover_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Closing is idempotent.
    pub fn close(&mut self, now: DateTime<Utc>) {
        if self.is_closed() {
            return;
        }
        self.status = ConversationStatus::Closed;
        self.human_took_over = false;
        self.updated_at = now;
    }

    /// Check the takeover invariant.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.human_took_over {
            let ok = match self.status {
                ConversationStatus::Escalated => true,
                ConversationStatus::Active => self.assigned_to.is_some(),
                _ => false,
            };
            if !ok {
                return Err(DomainError::invalid_transition(format!(
                    "conversation {} taken over by a human while {}",
                    self.id, self.status
                )));
            }
        }
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> DomainResult<()> {
        if self.is_closed() {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} closed conversation {}",
                self.id
            )));
        }
        Ok(())
    }

    fn record(
        &self,
        reason: EscalationReason,
        previous_status: ConversationStatus,
        signals: EscalationSignals,
        now: DateTime<Utc>,
    ) -> EscalationRecord {
        EscalationRecord {
            id: EscalationId::new(),
            conversation_id: self.id.clone(),
            reason,
            previous_status,
            next_status: self.status,
            signals,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn conversation() -> Conversation {
        Conversation::new(
            ConversationId::parse("conv-1").unwrap(),
            CustomerId::parse("cust-1").unwrap(),
            Utc::now(),
        )
    }

    fn agent() -> AgentId {
        AgentId::parse("agent-7").unwrap()
    }

    #[test]
    fn escalation_hands_off_and_records() {
        let mut c = conversation();
        let now = Utc::now();

        let record = c
            .escalate(
                EscalationReason::LowConfidence,
                EscalationSignals {
                    confidence: Some(0.2),
                    sentiment: Some(0.0),
                },
                now,
            )
            .unwrap()
            .unwrap();

        assert_eq!(c.status, ConversationStatus::Escalated);
        assert!(c.human_took_over);
        assert_eq!(c.human_takeover_at, Some(now));
        assert_eq!(record.previous_status, ConversationStatus::Active);
        assert_eq!(record.next_status, ConversationStatus::Escalated);
        assert_eq!(record.signals.confidence, Some(0.2));
        assert!(!c.accepts_automation());
    }

    #[test]
    fn escalating_twice_is_a_noop() {
        let mut c = conversation();
        let now = Utc::now();

        c.escalate(EscalationReason::ExplicitRequest, EscalationSignals::default(), now)
            .unwrap();
        let again = c
            .escalate(EscalationReason::NegativeSentiment, EscalationSignals::default(), now)
            .unwrap();

        assert!(again.is_none());
    }

    #[test]
    fn closed_conversations_reject_transitions() {
        let mut c = conversation();
        c.close(Utc::now());

        assert!(!c.accepts_automation());
        assert!(c
            .escalate(EscalationReason::Manual, EscalationSignals::default(), Utc::now())
            .is_err());
        assert!(c.assign(agent(), Utc::now()).is_err());
        assert!(c.release(Utc::now()).is_err());
    }

    #[test]
    fn manual_assignment_is_audited_once() {
        let mut c = conversation();
        let now = Utc::now();

        let first = c.assign(agent(), now).unwrap();
        assert_eq!(first.map(|r| r.reason), Some(EscalationReason::Manual));
        assert_eq!(c.status, ConversationStatus::Active);
        assert!(c.human_took_over);

        let second = c.assign(AgentId::parse("agent-8").unwrap(), now).unwrap();
        assert!(second.is_none());
        assert_eq!(c.assigned_to.as_ref().map(|a| a.as_str()), Some("agent-8"));
        c.check_invariants().unwrap();
    }

    #[test]
    fn escalating_an_assigned_conversation_restamps_takeover() {
        let mut c = conversation();
        let assigned_at = Utc::now();
        c.assign(agent(), assigned_at).unwrap();
        let escalated_at = assigned_at + chrono::Duration::minutes(5);

        let record = c
            .escalate(EscalationReason::NegativeSentiment, EscalationSignals::default(), escalated_at)
            .unwrap();

        assert!(record.is_some());
        assert_eq!(c.status, ConversationStatus::Escalated);
        assert_eq!(c.human_takeover_at, Some(escalated_at));
    }

    #[test]
    fn release_returns_control_to_the_bot() {
        let mut c = conversation();
        let now = Utc::now();
        c.escalate(EscalationReason::ExplicitRequest, EscalationSignals::default(), now)
            .unwrap();

        c.release(now).unwrap();

        assert_eq!(c.status, ConversationStatus::Active);
        assert!(c.accepts_automation());
        assert!(c.human_takeover_at.is_none());
    }

    #[test]
    fn resolved_conversation_reopens_on_new_message() {
        let mut c = conversation();
        c.resolve(Utc::now()).unwrap();

        assert!(c.reopen_on_inbound(Utc::now()));
        assert_eq!(c.status, ConversationStatus::Active);
        assert!(!c.reopen_on_inbound(Utc::now()));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Escalate,
        Assign,
        Release,
        Resolve,
        Close,
        Reopen,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Escalate),
            Just(Op::Assign),
            Just(Op::Release),
            Just(Op::Resolve),
            Just(Op::Close),
            Just(Op::Reopen),
        ]
    }

    proptest! {
        #[test]
        fn takeover_invariant_holds_for_any_sequence(ops in proptest::collection::vec(op(), 0..30)) {
            let mut c = conversation();
            let now = Utc::now();

            for op in ops {
                let was_closed = c.is_closed();
                let _ = match op {
                    Op::Escalate => c
                        .escalate(EscalationReason::LowConfidence, EscalationSignals::default(), now)
                        .map(|_| ()),
                    Op::Assign => c.assign(agent(), now).map(|_| ()),
                    Op::Release => c.release(now),
                    Op::Resolve => c.resolve(now),
                    Op::Close => {
                        c.close(now);
                        Ok(())
                    }
                    Op::Reopen => {
                        c.reopen_on_inbound(now);
                        Ok(())
                    }
                };

                prop_assert!(c.check_invariants().is_ok());
                if was_closed {
                    prop_assert!(c.is_closed());
                }
            }
        }
    }
}
