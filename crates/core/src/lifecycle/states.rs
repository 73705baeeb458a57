use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::permit::{ActorRole, PermitStatus, UserId};
use crate::domain::permit_type::ControlPhase;

/// Lifecycle events a permit can receive. `Expire` is system-invoked only;
/// the rest map one-to-one onto operator actions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitEvent {
    Submit,
    Approve,
    Reject,
    Activate,
    Suspend,
    Resume,
    Close,
    Cancel,
    Expire,
}

impl PermitEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Activate => "activate",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Close => "close",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
        }
    }

    /// Reject and cancel must carry an operator-supplied reason.
    pub fn requires_reason(&self) -> bool {
        matches!(self, Self::Reject | Self::Cancel)
    }
}

/// Everything the transition function needs besides the current status.
/// The orchestrator resolves checklist gaps (via the resolver) and actor
/// relationships before applying an event, so the machine stays pure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionContext {
    pub actor_id: UserId,
    pub actor_role: ActorRole,
    /// True when the acting user is the permit's requester.
    pub acting_as_requester: bool,
    pub worker_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub missing_pre_work_controls: Vec<String>,
    pub missing_close_out_controls: Vec<String>,
    pub reason: Option<String>,
}

impl TransitionContext {
    /// Context for the expiry sweeper: no human actor, no checklist input.
    pub fn system(now: DateTime<Utc>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            actor_id: UserId("system".to_string()),
            actor_role: ActorRole::Admin,
            acting_as_requester: false,
            worker_count: 0,
            start_time,
            end_time,
            now,
            missing_pre_work_controls: Vec::new(),
            missing_close_out_controls: Vec::new(),
            reason: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: PermitStatus,
    pub to: PermitStatus,
    pub event: PermitEvent,
}

/// Guard data carried on checklist failures so callers can render which
/// controls are blocking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteControls {
    pub phase: ControlPhase,
    pub missing: Vec<String>,
}
