use thiserror::Error;

use crate::domain::permit::PermitStatus;
use crate::domain::permit_type::ControlPhase;
use crate::lifecycle::states::{
    IncompleteControls, PermitEvent, TransitionContext, TransitionOutcome,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {status:?} using event {event:?}")]
    InvalidTransition { status: PermitStatus, event: PermitEvent },
    #[error("{} required {} controls incomplete: {:?}", .0.missing.len(), .0.phase.as_str(), .0.missing)]
    ControlsIncomplete(IncompleteControls),
    #[error("event {event:?} requires approval authority (manager or admin)")]
    ApprovalAuthorityRequired { event: PermitEvent },
    #[error("only the requester or a manager may cancel a permit")]
    CancelNotPermitted,
    #[error("at least one authorized worker is required before submission")]
    NoWorkers,
    #[error("end time must be after start time")]
    InvalidWindow,
    #[error("event {event:?} requires a reason")]
    ReasonRequired { event: PermitEvent },
    #[error("permit window has not elapsed yet")]
    NotYetExpired,
}

/// The canonical permit state machine. Pure: a failed guard returns an
/// error and nothing else changes, which callers rely on for the
/// no-partial-transition invariant.
#[derive(Clone, Debug, Default)]
pub struct PermitStateMachine;

impl PermitStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_status(&self) -> PermitStatus {
        PermitStatus::Draft
    }

    pub fn apply(
        &self,
        current: &PermitStatus,
        event: &PermitEvent,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        use PermitEvent::{
            Activate, Approve, Cancel, Close, Expire, Reject, Resume, Submit, Suspend,
        };
        use PermitStatus::{
            Active, Approved, Cancelled, Closed, Draft, Expired, Rejected, Submitted, Suspended,
        };

        if event.requires_reason()
            && context.reason.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(TransitionError::ReasonRequired { event: event.clone() });
        }

        let to = match (current, event) {
            (Draft, Submit) => {
                if context.end_time <= context.start_time {
                    return Err(TransitionError::InvalidWindow);
                }
                if context.worker_count == 0 {
                    return Err(TransitionError::NoWorkers);
                }
                if !context.missing_pre_work_controls.is_empty() {
                    return Err(TransitionError::ControlsIncomplete(IncompleteControls {
                        phase: ControlPhase::PreWork,
                        missing: context.missing_pre_work_controls.clone(),
                    }));
                }
                Submitted
            }
            (Submitted, Approve) => {
                require_approval_authority(event, context)?;
                Approved
            }
            (Submitted, Reject) => {
                require_approval_authority(event, context)?;
                Rejected
            }
            (Approved, Activate) => {
                require_approval_authority(event, context)?;
                // Window validity is re-checked here; activation timing
                // itself is deliberately not hard-gated.
                if context.end_time <= context.start_time {
                    return Err(TransitionError::InvalidWindow);
                }
                // Controls can be un-completed between submission and
                // activation, so the pre-work gate applies here too.
                if !context.missing_pre_work_controls.is_empty() {
                    return Err(TransitionError::ControlsIncomplete(IncompleteControls {
                        phase: ControlPhase::PreWork,
                        missing: context.missing_pre_work_controls.clone(),
                    }));
                }
                Active
            }
            (Active, Suspend) => {
                require_approval_authority(event, context)?;
                Suspended
            }
            (Suspended, Resume) => {
                require_approval_authority(event, context)?;
                Active
            }
            (Active, Close) => {
                if !context.missing_close_out_controls.is_empty() {
                    return Err(TransitionError::ControlsIncomplete(IncompleteControls {
                        phase: ControlPhase::CloseOut,
                        missing: context.missing_close_out_controls.clone(),
                    }));
                }
                Closed
            }
            (Draft | Submitted | Approved | Active | Suspended, Cancel) => {
                if !context.acting_as_requester && !context.actor_role.can_approve() {
                    return Err(TransitionError::CancelNotPermitted);
                }
                Cancelled
            }
            (Submitted | Approved | Active | Suspended, Expire) => {
                if context.now < context.end_time {
                    return Err(TransitionError::NotYetExpired);
                }
                Expired
            }
            _ => {
                return Err(TransitionError::InvalidTransition {
                    status: current.clone(),
                    event: event.clone(),
                });
            }
        };

        Ok(TransitionOutcome { from: current.clone(), to, event: event.clone() })
    }
}

fn require_approval_authority(
    event: &PermitEvent,
    context: &TransitionContext,
) -> Result<(), TransitionError> {
    if context.actor_role.can_approve() {
        Ok(())
    } else {
        Err(TransitionError::ApprovalAuthorityRequired { event: event.clone() })
    }
}
