use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use permitly_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use permitly_core::conflicts::{ConflictDetector, ConflictWarning, TimeWindow};
use permitly_core::controls::ControlChecklistResolver;
use permitly_core::domain::permit::{
    ActorRole, HistoryEntryId, Permit, PermitId, PermitNumber, PermitStatus, SiteId,
    StateHistoryEntry, UserId, Worker,
};
use permitly_core::domain::permit_type::{ControlPhase, PermitType, PermitTypeId};
use permitly_core::errors::{DomainError, ServiceError};
use permitly_core::lifecycle::{
    PermitEvent, PermitStateMachine, TransitionContext, TransitionOutcome,
};
use permitly_db::repositories::{
    HistoryRepository, PermitRepository, PermitTypeRepository, RepositoryError,
};

use crate::notify::{NotificationEvent, Notifier};

/// Identity of the user performing an operation. Role resolution happens at
/// the interface layer; the service trusts what it is handed.
#[derive(Clone, Debug)]
pub struct ActorContext {
    pub user_id: UserId,
    pub role: ActorRole,
}

#[derive(Clone, Debug)]
pub struct CreatePermitRequest {
    pub permit_type_id: PermitTypeId,
    pub site_id: SiteId,
    pub location: Option<String>,
    pub work_description: String,
    pub hazards: Option<String>,
    pub special_conditions: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Defaults to `start_time` plus the permit type's validity window.
    pub end_time: Option<DateTime<Utc>>,
    pub workers: Vec<Worker>,
}

#[derive(Clone, Debug)]
pub struct TransitionRequest {
    pub actor: ActorContext,
    /// Operator-supplied reason or notes. Mandatory for reject and cancel,
    /// recorded on the history row either way.
    pub reason: Option<String>,
    /// Actual start/end of the work, when the caller reports one on
    /// activate or close.
    pub actual_time: Option<DateTime<Utc>>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PermitView {
    pub permit: Permit,
    pub warnings: Vec<ConflictWarning>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BoardColumn {
    pub status: PermitStatus,
    pub permits: Vec<Permit>,
}

const BOARD_COLUMN_ORDER: &[PermitStatus] = &[
    PermitStatus::Draft,
    PermitStatus::Submitted,
    PermitStatus::Approved,
    PermitStatus::Active,
    PermitStatus::Suspended,
    PermitStatus::Closed,
    PermitStatus::Rejected,
    PermitStatus::Expired,
    PermitStatus::Cancelled,
];

pub struct PermitService {
    permits: Arc<dyn PermitRepository>,
    permit_types: Arc<dyn PermitTypeRepository>,
    history: Arc<dyn HistoryRepository>,
    machine: PermitStateMachine,
    resolver: ControlChecklistResolver,
    detector: ConflictDetector,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl PermitService {
    pub fn new(
        permits: Arc<dyn PermitRepository>,
        permit_types: Arc<dyn PermitTypeRepository>,
        history: Arc<dyn HistoryRepository>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            permits,
            permit_types,
            history,
            machine: PermitStateMachine::new(),
            resolver: ControlChecklistResolver::new(),
            detector: ConflictDetector::new(),
            audit,
            notifier,
        }
    }

    pub async fn create(
        &self,
        request: CreatePermitRequest,
        actor: ActorContext,
        correlation_id: &str,
    ) -> Result<PermitView, ServiceError> {
        let permit_type = self.require_permit_type(&request.permit_type_id).await?;

        if request.work_description.trim().is_empty() {
            return Err(validation("work_description", "must not be empty"));
        }

        let end_time = request.end_time.unwrap_or_else(|| {
            request.start_time + Duration::hours(i64::from(permit_type.default_validity_hours))
        });
        if end_time <= request.start_time {
            return Err(validation("end_time", "must be after start_time"));
        }

        let now = Utc::now();
        let id = PermitId(Uuid::new_v4().to_string());
        let permit = Permit {
            permit_number: permit_number_for(&id, now),
            id,
            permit_type_id: request.permit_type_id,
            site_id: request.site_id,
            location: request.location,
            work_description: request.work_description,
            hazards: request.hazards,
            special_conditions: request.special_conditions,
            status: self.machine.initial_status(),
            start_time: request.start_time,
            end_time,
            actual_start_time: None,
            actual_end_time: None,
            requested_by: actor.user_id.clone(),
            approved_by: None,
            workers: request.workers,
            controls: BTreeMap::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.permits.insert(permit.clone()).await.map_err(persistence)?;

        self.audit.emit(
            AuditEvent::new(
                Some(permit.id.clone()),
                correlation_id,
                "permit.created",
                AuditCategory::Lifecycle,
                actor.user_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("permit_number", permit.permit_number.0.clone()),
        );
        info!(
            event_name = "permit.created",
            correlation_id = %correlation_id,
            permit_id = %permit.id.0,
            permit_number = %permit.permit_number.0,
            "permit created in draft"
        );

        Ok(PermitView { permit, warnings: Vec::new() })
    }

    pub async fn submit(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Submit, request).await
    }

    pub async fn approve(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Approve, request).await
    }

    pub async fn reject(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Reject, request).await
    }

    pub async fn activate(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Activate, request).await
    }

    pub async fn suspend(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Suspend, request).await
    }

    pub async fn resume(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Resume, request).await
    }

    pub async fn close(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Close, request).await
    }

    pub async fn cancel(
        &self,
        permit_id: &PermitId,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.transition(permit_id, PermitEvent::Cancel, request).await
    }

    /// System-initiated expiry. Already-terminal permits are an Ok no-op so
    /// sweeper passes stay idempotent.
    pub async fn expire(
        &self,
        permit_id: &PermitId,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<PermitView, ServiceError> {
        let permit = self.require_permit(permit_id).await?;
        if permit.status.is_terminal() {
            return Ok(PermitView { permit, warnings: Vec::new() });
        }

        let request = TransitionRequest {
            actor: ActorContext { user_id: UserId("system".to_string()), role: ActorRole::Admin },
            reason: None,
            actual_time: Some(now),
            correlation_id: correlation_id.to_string(),
        };
        self.transition(permit_id, PermitEvent::Expire, request).await
    }

    pub async fn set_control(
        &self,
        permit_id: &PermitId,
        control_id: &str,
        completed: bool,
        notes: Option<String>,
        actor: ActorContext,
        correlation_id: &str,
    ) -> Result<PermitView, ServiceError> {
        for attempt in 0..2 {
            let permit = self.require_permit(permit_id).await?;
            if permit.status.is_terminal() {
                return Err(validation(
                    "status",
                    "controls are read-only once the permit reaches a terminal status",
                ));
            }

            let permit_type = self.require_permit_type(&permit.permit_type_id).await?;
            if self.resolver.find_control(&permit_type, control_id).is_none() {
                return Err(validation(
                    "control_id",
                    "control is not defined by the permit type",
                ));
            }

            let expected_version = permit.version;
            let mut updated = permit;
            updated.controls.insert(control_id.to_string(), completed);
            updated.version += 1;
            updated.updated_at = Utc::now();

            match self.permits.update(updated.clone(), expected_version).await {
                Ok(()) => {
                    let mut event = AuditEvent::new(
                        Some(updated.id.clone()),
                        correlation_id,
                        "permit.control_updated",
                        AuditCategory::Checklist,
                        actor.user_id.0.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("control_id", control_id)
                    .with_metadata("completed", completed.to_string());
                    if let Some(notes) = &notes {
                        event = event.with_metadata("notes", notes.clone());
                    }
                    self.audit.emit(event);
                    return Ok(PermitView { permit: updated, warnings: Vec::new() });
                }
                Err(RepositoryError::StaleVersion { .. }) if attempt == 0 => continue,
                Err(RepositoryError::StaleVersion { .. }) => {
                    return Err(ServiceError::ConcurrentModification {
                        permit_id: permit_id.0.clone(),
                    });
                }
                Err(error) => return Err(persistence(error)),
            }
        }
        unreachable!("control update loop returns within two attempts")
    }

    pub async fn add_worker(
        &self,
        permit_id: &PermitId,
        worker: Worker,
        actor: ActorContext,
        correlation_id: &str,
    ) -> Result<PermitView, ServiceError> {
        if worker.name.trim().is_empty() {
            return Err(validation("worker.name", "must not be empty"));
        }
        self.mutate_workers(permit_id, actor, correlation_id, move |workers| {
            if workers.iter().any(|existing| existing.name == worker.name) {
                return Err(validation("worker.name", "worker is already on the permit"));
            }
            workers.push(worker.clone());
            Ok(())
        })
        .await
    }

    pub async fn remove_worker(
        &self,
        permit_id: &PermitId,
        worker_name: &str,
        actor: ActorContext,
        correlation_id: &str,
    ) -> Result<PermitView, ServiceError> {
        let name = worker_name.to_string();
        self.mutate_workers(permit_id, actor, correlation_id, move |workers| {
            let before = workers.len();
            workers.retain(|worker| worker.name != name);
            if workers.len() == before {
                return Err(validation("worker.name", "worker is not on the permit"));
            }
            Ok(())
        })
        .await
    }

    pub async fn board(
        &self,
        site_id: Option<&SiteId>,
        permit_type_id: Option<&PermitTypeId>,
    ) -> Result<Vec<BoardColumn>, ServiceError> {
        let permits =
            self.permits.list_for_board(site_id, permit_type_id).await.map_err(persistence)?;

        let mut columns: Vec<BoardColumn> = BOARD_COLUMN_ORDER
            .iter()
            .map(|status| BoardColumn { status: status.clone(), permits: Vec::new() })
            .collect();
        for permit in permits {
            if let Some(column) =
                columns.iter_mut().find(|column| column.status == permit.status)
            {
                column.permits.push(permit);
            }
        }

        Ok(columns)
    }

    pub async fn check_conflicts(
        &self,
        site_id: &SiteId,
        window: &TimeWindow,
        location_hint: Option<&str>,
        exclude: Option<&PermitId>,
    ) -> Result<Vec<ConflictWarning>, ServiceError> {
        let candidates =
            self.permits.find_conflict_candidates(site_id).await.map_err(persistence)?;
        Ok(self.detector.find_conflicts(&candidates, window, location_hint, exclude))
    }

    pub async fn history(
        &self,
        permit_id: &PermitId,
    ) -> Result<Vec<StateHistoryEntry>, ServiceError> {
        self.require_permit(permit_id).await?;
        self.history.list_for_permit(permit_id).await.map_err(persistence)
    }

    pub async fn get(&self, permit_id: &PermitId) -> Result<Permit, ServiceError> {
        self.require_permit(permit_id).await
    }

    pub async fn list_permit_types(&self) -> Result<Vec<PermitType>, ServiceError> {
        self.permit_types.list().await.map_err(persistence)
    }

    /// Shared transition path: resolve checklist gaps, run the state
    /// machine, then commit the permit and its history row atomically with
    /// a version check (retry once on a lost race).
    async fn transition(
        &self,
        permit_id: &PermitId,
        event: PermitEvent,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        for attempt in 0..2 {
            let permit = self.require_permit(permit_id).await?;
            let permit_type = self.require_permit_type(&permit.permit_type_id).await?;
            let context = self.transition_context(&permit, &permit_type, &request);

            let outcome = match self.machine.apply(&permit.status, &event, &context) {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.emit_rejection(&permit, &event, &request, &error.to_string());
                    return Err(error.into());
                }
            };

            let now = Utc::now();
            let expected_version = permit.version;
            let mut updated = permit;
            apply_transition_effects(&mut updated, &outcome, &request, now);

            let entry = StateHistoryEntry {
                id: HistoryEntryId(Uuid::new_v4().to_string()),
                permit_id: updated.id.clone(),
                from_status: Some(outcome.from.clone()),
                to_status: outcome.to.clone(),
                changed_by: request.actor.user_id.clone(),
                changed_at: now,
                notes: request.reason.clone(),
            };

            match self.permits.commit_transition(updated.clone(), expected_version, entry).await {
                Ok(()) => {
                    return self.finalize_transition(updated, outcome, request).await;
                }
                Err(RepositoryError::StaleVersion { .. }) if attempt == 0 => {
                    warn!(
                        event_name = "permit.transition_retry",
                        correlation_id = %request.correlation_id,
                        permit_id = %permit_id.0,
                        transition_event = event.as_str(),
                        "version check failed, retrying against fresh state"
                    );
                    continue;
                }
                Err(RepositoryError::StaleVersion { .. }) => {
                    return Err(ServiceError::ConcurrentModification {
                        permit_id: permit_id.0.clone(),
                    });
                }
                Err(error) => return Err(persistence(error)),
            }
        }
        unreachable!("transition loop returns within two attempts")
    }

    async fn finalize_transition(
        &self,
        permit: Permit,
        outcome: TransitionOutcome,
        request: TransitionRequest,
    ) -> Result<PermitView, ServiceError> {
        self.audit.emit(
            AuditEvent::new(
                Some(permit.id.clone()),
                request.correlation_id.clone(),
                "permit.transition_applied",
                AuditCategory::Lifecycle,
                request.actor.user_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("from", outcome.from.as_str())
            .with_metadata("to", outcome.to.as_str())
            .with_metadata("event", outcome.event.as_str()),
        );
        info!(
            event_name = "permit.transition_applied",
            correlation_id = %request.correlation_id,
            permit_id = %permit.id.0,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            "permit transition applied"
        );

        let notification =
            NotificationEvent::for_permit(format!("permit.{}", outcome.to.as_str()), &permit);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move { notifier.notify(notification).await });

        let warnings = if matches!(outcome.event, PermitEvent::Submit | PermitEvent::Activate) {
            self.check_conflicts(
                &permit.site_id,
                &TimeWindow::new(permit.start_time, permit.end_time),
                permit.location.as_deref(),
                Some(&permit.id),
            )
            .await?
        } else {
            Vec::new()
        };

        Ok(PermitView { permit, warnings })
    }

    fn transition_context(
        &self,
        permit: &Permit,
        permit_type: &PermitType,
        request: &TransitionRequest,
    ) -> TransitionContext {
        TransitionContext {
            actor_id: request.actor.user_id.clone(),
            actor_role: request.actor.role.clone(),
            acting_as_requester: request.actor.user_id == permit.requested_by,
            worker_count: permit.workers.len(),
            start_time: permit.start_time,
            end_time: permit.end_time,
            now: request.actual_time.unwrap_or_else(Utc::now),
            missing_pre_work_controls: self.resolver.missing_controls(
                permit_type,
                &permit.controls,
                ControlPhase::PreWork,
            ),
            missing_close_out_controls: self.resolver.missing_controls(
                permit_type,
                &permit.controls,
                ControlPhase::CloseOut,
            ),
            reason: request.reason.clone(),
        }
    }

    fn emit_rejection(
        &self,
        permit: &Permit,
        event: &PermitEvent,
        request: &TransitionRequest,
        detail: &str,
    ) {
        self.audit.emit(
            AuditEvent::new(
                Some(permit.id.clone()),
                request.correlation_id.clone(),
                "permit.transition_rejected",
                AuditCategory::Lifecycle,
                request.actor.user_id.0.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("event", event.as_str())
            .with_metadata("status", permit.status.as_str())
            .with_metadata("detail", detail),
        );
    }

    async fn mutate_workers<F>(
        &self,
        permit_id: &PermitId,
        actor: ActorContext,
        correlation_id: &str,
        mutate: F,
    ) -> Result<PermitView, ServiceError>
    where
        F: Fn(&mut Vec<Worker>) -> Result<(), ServiceError>,
    {
        for attempt in 0..2 {
            let permit = self.require_permit(permit_id).await?;
            if permit.status != PermitStatus::Draft {
                return Err(validation("status", "the crew can only change while in draft"));
            }

            let expected_version = permit.version;
            let mut updated = permit;
            mutate(&mut updated.workers)?;
            updated.version += 1;
            updated.updated_at = Utc::now();

            match self.permits.update(updated.clone(), expected_version).await {
                Ok(()) => {
                    self.audit.emit(AuditEvent::new(
                        Some(updated.id.clone()),
                        correlation_id,
                        "permit.workers_updated",
                        AuditCategory::Lifecycle,
                        actor.user_id.0.clone(),
                        AuditOutcome::Success,
                    ));
                    return Ok(PermitView { permit: updated, warnings: Vec::new() });
                }
                Err(RepositoryError::StaleVersion { .. }) if attempt == 0 => continue,
                Err(RepositoryError::StaleVersion { .. }) => {
                    return Err(ServiceError::ConcurrentModification {
                        permit_id: permit_id.0.clone(),
                    });
                }
                Err(error) => return Err(persistence(error)),
            }
        }
        unreachable!("worker mutation loop returns within two attempts")
    }

    async fn require_permit(&self, permit_id: &PermitId) -> Result<Permit, ServiceError> {
        self.permits
            .find_by_id(permit_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "permit",
                id: permit_id.0.clone(),
            })
    }

    async fn require_permit_type(
        &self,
        permit_type_id: &PermitTypeId,
    ) -> Result<PermitType, ServiceError> {
        self.permit_types
            .find_by_id(permit_type_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ServiceError::NotFound {
                kind: "permit_type",
                id: permit_type_id.0.clone(),
            })
    }
}

fn apply_transition_effects(
    permit: &mut Permit,
    outcome: &TransitionOutcome,
    request: &TransitionRequest,
    now: DateTime<Utc>,
) {
    permit.status = outcome.to.clone();
    permit.version += 1;
    permit.updated_at = now;

    match outcome.event {
        PermitEvent::Approve => {
            permit.approved_by = Some(request.actor.user_id.clone());
        }
        PermitEvent::Activate => {
            permit.actual_start_time = Some(request.actual_time.unwrap_or(now));
        }
        PermitEvent::Close => {
            permit.actual_end_time = Some(request.actual_time.unwrap_or(now));
        }
        _ => {}
    }
}

fn permit_number_for(id: &PermitId, now: DateTime<Utc>) -> PermitNumber {
    use chrono::Datelike;

    let short = id.0.split('-').next().unwrap_or(&id.0);
    PermitNumber(format!("PTW-{}-{short}", now.year()))
}

fn validation(field: &str, message: &str) -> ServiceError {
    ServiceError::Domain(DomainError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    })
}

fn persistence(error: RepositoryError) -> ServiceError {
    ServiceError::Persistence(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use permitly_core::audit::InMemoryAuditSink;
    use permitly_core::conflicts::TimeWindow;
    use permitly_core::domain::permit::{
        ActorRole, Permit, PermitId, PermitStatus, SiteId, StateHistoryEntry, UserId, Worker,
    };
    use permitly_core::domain::permit_type::{
        ControlPhase, PermitType, PermitTypeId, RequiredControl,
    };
    use permitly_core::errors::{DomainError, ServiceError};
    use permitly_core::lifecycle::TransitionError;
    use permitly_db::repositories::{
        InMemoryHistoryRepository, InMemoryPermitRepository, InMemoryPermitTypeRepository,
        PermitRepository, PermitTypeRepository, RepositoryError,
    };

    use crate::notify::NoopNotifier;

    use super::{ActorContext, CreatePermitRequest, PermitService, TransitionRequest};

    struct Harness {
        service: PermitService,
        permits: Arc<InMemoryPermitRepository>,
        audit: InMemoryAuditSink,
    }

    async fn harness() -> Harness {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let permits = Arc::new(InMemoryPermitRepository::with_history((*history).clone()));
        let permit_types = Arc::new(InMemoryPermitTypeRepository::default());
        let audit = InMemoryAuditSink::default();

        permit_types.save(hot_work()).await.expect("seed permit type");

        let service = PermitService::new(
            permits.clone(),
            permit_types,
            history,
            Arc::new(audit.clone()),
            Arc::new(NoopNotifier),
        );

        Harness { service, permits, audit }
    }

    fn hot_work() -> PermitType {
        PermitType {
            id: PermitTypeId("pt-hot-work".to_string()),
            code: "hot_work".to_string(),
            name: "Hot Work".to_string(),
            icon: Some("flame".to_string()),
            default_validity_hours: 8,
            requires_approval: true,
            controls: vec![
                RequiredControl {
                    id: "fire-watch".to_string(),
                    description: "Fire watch posted".to_string(),
                    phase: ControlPhase::PreWork,
                    required: true,
                },
                RequiredControl {
                    id: "final-fire-check".to_string(),
                    description: "Final fire check after last spark".to_string(),
                    phase: ControlPhase::CloseOut,
                    required: true,
                },
            ],
        }
    }

    enum CommitFault {
        HistoryWriteFails,
        RacingCancel,
    }

    /// Permit repository that injects a single scripted failure into the
    /// next transition commit, then behaves normally again.
    struct FaultyCommitRepository {
        inner: InMemoryPermitRepository,
        fault: Mutex<Option<CommitFault>>,
    }

    impl FaultyCommitRepository {
        fn new(inner: InMemoryPermitRepository) -> Self {
            Self { inner, fault: Mutex::new(None) }
        }

        fn arm(&self, fault: CommitFault) {
            *self.fault.lock().expect("fault lock") = Some(fault);
        }
    }

    #[async_trait::async_trait]
    impl PermitRepository for FaultyCommitRepository {
        async fn find_by_id(&self, id: &PermitId) -> Result<Option<Permit>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn insert(&self, permit: Permit) -> Result<(), RepositoryError> {
            self.inner.insert(permit).await
        }

        async fn update(
            &self,
            permit: Permit,
            expected_version: u32,
        ) -> Result<(), RepositoryError> {
            self.inner.update(permit, expected_version).await
        }

        async fn commit_transition(
            &self,
            permit: Permit,
            expected_version: u32,
            entry: StateHistoryEntry,
        ) -> Result<(), RepositoryError> {
            let fault = self.fault.lock().expect("fault lock").take();
            match fault {
                None => self.inner.commit_transition(permit, expected_version, entry).await,
                Some(CommitFault::HistoryWriteFails) => {
                    Err(RepositoryError::Decode("history row could not be written".to_string()))
                }
                Some(CommitFault::RacingCancel) => {
                    let stored = self
                        .inner
                        .find_by_id(&permit.id)
                        .await?
                        .expect("racing writer finds the permit");
                    let mut cancelled = stored.clone();
                    cancelled.status = PermitStatus::Cancelled;
                    cancelled.version += 1;
                    self.inner.update(cancelled, stored.version).await?;
                    Err(RepositoryError::StaleVersion {
                        permit_id: permit.id.0,
                        expected_version,
                    })
                }
            }
        }

        async fn find_conflict_candidates(
            &self,
            site_id: &SiteId,
        ) -> Result<Vec<Permit>, RepositoryError> {
            self.inner.find_conflict_candidates(site_id).await
        }

        async fn list_expirable(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<Permit>, RepositoryError> {
            self.inner.list_expirable(now).await
        }

        async fn list_for_board(
            &self,
            site_id: Option<&SiteId>,
            permit_type_id: Option<&PermitTypeId>,
        ) -> Result<Vec<Permit>, RepositoryError> {
            self.inner.list_for_board(site_id, permit_type_id).await
        }
    }

    struct FaultyHarness {
        service: PermitService,
        permits: Arc<FaultyCommitRepository>,
    }

    async fn faulty_harness() -> FaultyHarness {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let permits = Arc::new(FaultyCommitRepository::new(
            InMemoryPermitRepository::with_history((*history).clone()),
        ));
        let permit_types = Arc::new(InMemoryPermitTypeRepository::default());
        permit_types.save(hot_work()).await.expect("seed permit type");

        let service = PermitService::new(
            permits.clone(),
            permit_types,
            history,
            Arc::new(InMemoryAuditSink::default()),
            Arc::new(NoopNotifier),
        );

        FaultyHarness { service, permits }
    }

    fn requester() -> ActorContext {
        ActorContext { user_id: UserId("u-req".to_string()), role: ActorRole::Employee }
    }

    fn manager() -> ActorContext {
        ActorContext { user_id: UserId("u-mgr".to_string()), role: ActorRole::Manager }
    }

    fn as_actor(actor: ActorContext) -> TransitionRequest {
        TransitionRequest { actor, reason: None, actual_time: None, correlation_id: "req-test".to_string() }
    }

    fn with_reason(actor: ActorContext, reason: &str) -> TransitionRequest {
        TransitionRequest {
            actor,
            reason: Some(reason.to_string()),
            actual_time: None,
            correlation_id: "req-test".to_string(),
        }
    }

    fn create_request() -> CreatePermitRequest {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        CreatePermitRequest {
            permit_type_id: PermitTypeId("pt-hot-work".to_string()),
            site_id: SiteId("site-1".to_string()),
            location: Some("roof deck".to_string()),
            work_description: "torch cutting".to_string(),
            hazards: Some("sparks".to_string()),
            special_conditions: None,
            start_time: start,
            end_time: Some(start + Duration::hours(8)),
            workers: vec![Worker { name: "A. Mason".to_string(), role: Some("welder".to_string()) }],
        }
    }

    #[tokio::test]
    async fn full_lifecycle_appends_one_history_row_per_transition() {
        let h = harness().await;
        let created =
            h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();

        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("complete pre-work control");
        h.service.submit(&id, as_actor(requester())).await.expect("submit");
        h.service.approve(&id, as_actor(manager())).await.expect("approve");
        h.service.activate(&id, as_actor(manager())).await.expect("activate");
        h.service
            .set_control(&id, "final-fire-check", true, None, manager(), "req-test")
            .await
            .expect("complete close-out control");
        let closed = h.service.close(&id, as_actor(manager())).await.expect("close");

        assert_eq!(closed.permit.status, PermitStatus::Closed);
        assert!(closed.permit.actual_end_time.is_some());
        assert_eq!(closed.permit.approved_by, Some(UserId("u-mgr".to_string())));

        let history = h.service.history(&id).await.expect("history");
        let walk: Vec<&str> =
            history.iter().map(|entry| entry.to_status.as_str()).collect();
        assert_eq!(walk, vec!["submitted", "approved", "active", "closed"]);
    }

    #[tokio::test]
    async fn submit_attaches_conflict_warnings_without_blocking() {
        let h = harness().await;

        let other = h
            .service
            .create(create_request(), requester(), "req-other")
            .await
            .expect("create other");
        let other_id = other.permit.id.clone();
        h.service
            .set_control(&other_id, "fire-watch", true, None, requester(), "req-other")
            .await
            .expect("controls");
        h.service.submit(&other_id, as_actor(requester())).await.expect("submit other");

        let permit = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = permit.permit.id.clone();
        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("controls");
        let submitted = h.service.submit(&id, as_actor(requester())).await.expect("submit");

        assert_eq!(submitted.permit.status, PermitStatus::Submitted);
        assert_eq!(submitted.warnings.len(), 1);
        assert_eq!(submitted.warnings[0].permit_id, other_id);
        assert!(submitted.warnings[0].location_match);
    }

    #[tokio::test]
    async fn reject_without_reason_is_a_guard_violation() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();
        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("controls");
        h.service.submit(&id, as_actor(requester())).await.expect("submit");

        let error = h
            .service
            .reject(&id, as_actor(manager()))
            .await
            .expect_err("reject needs a reason");
        assert!(matches!(error, ServiceError::Domain(DomainError::Guard(_))));

        // Rejected attempt leaves no history row.
        let history = h.service.history(&id).await.expect("history");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn expire_is_an_ok_no_op_on_terminal_permits() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();
        h.service
            .cancel(&id, with_reason(requester(), "work postponed"))
            .await
            .expect("cancel draft");

        let now = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let view = h.service.expire(&id, now, "sweep-1").await.expect("expire no-op");

        assert_eq!(view.permit.status, PermitStatus::Cancelled);
        let history = h.service.history(&id).await.expect("history");
        assert_eq!(history.len(), 1, "no-op expiry must not append history");
    }

    #[tokio::test]
    async fn expire_moves_overdue_active_permits() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();
        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("controls");
        h.service.submit(&id, as_actor(requester())).await.expect("submit");
        h.service.approve(&id, as_actor(manager())).await.expect("approve");
        h.service.activate(&id, as_actor(manager())).await.expect("activate");

        let past_end = Utc.with_ymd_and_hms(2026, 3, 1, 16, 0, 0).unwrap();
        let expired = h.service.expire(&id, past_end, "sweep-1").await.expect("expire");

        assert_eq!(expired.permit.status, PermitStatus::Expired);
        let history = h.service.history(&id).await.expect("history");
        assert_eq!(history.last().map(|entry| entry.to_status.as_str()), Some("expired"));
    }

    #[tokio::test]
    async fn activate_blocks_after_a_pre_work_control_is_uncompleted() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();
        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("complete pre-work control");
        h.service.submit(&id, as_actor(requester())).await.expect("submit");
        h.service
            .set_control(&id, "fire-watch", false, None, requester(), "req-test")
            .await
            .expect("uncomplete pre-work control");
        h.service.approve(&id, as_actor(manager())).await.expect("approve");

        let error = h
            .service
            .activate(&id, as_actor(manager()))
            .await
            .expect_err("incomplete pre-work controls must block activation");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::Guard(TransitionError::ControlsIncomplete(_)))
        ));

        let stored = h.permits.find_by_id(&id).await.expect("find").expect("exists");
        assert_eq!(stored.status, PermitStatus::Approved);
        let history = h.service.history(&id).await.expect("history");
        assert_eq!(history.last().map(|entry| entry.to_status.as_str()), Some("approved"));
    }

    #[tokio::test]
    async fn failed_transition_commit_leaves_permit_and_history_untouched() {
        let h = faulty_harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();
        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("controls");

        h.permits.arm(CommitFault::HistoryWriteFails);
        let error =
            h.service.submit(&id, as_actor(requester())).await.expect_err("commit must fail");
        assert!(matches!(error, ServiceError::Persistence(_)));

        let stored = h.permits.find_by_id(&id).await.expect("find").expect("exists");
        assert_eq!(stored.status, PermitStatus::Draft);
        assert_eq!(stored.version, 2);
        assert!(h.service.history(&id).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn losing_a_race_to_a_cancelling_writer_surfaces_a_guard_error() {
        let h = faulty_harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();
        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("controls");
        h.service.submit(&id, as_actor(requester())).await.expect("submit");

        // A concurrent cancel lands between this approve's load and commit.
        h.permits.arm(CommitFault::RacingCancel);
        let error = h
            .service
            .approve(&id, as_actor(manager()))
            .await
            .expect_err("approve must lose the race");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::Guard(TransitionError::InvalidTransition { .. }))
        ));

        let stored = h.permits.find_by_id(&id).await.expect("find").expect("exists");
        assert_eq!(stored.status, PermitStatus::Cancelled);
        // The approve attempt left no history row behind.
        let history = h.service.history(&id).await.expect("history");
        assert_eq!(history.last().map(|entry| entry.to_status.as_str()), Some("submitted"));
    }

    #[tokio::test]
    async fn unknown_control_id_is_rejected() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");

        let error = h
            .service
            .set_control(&created.permit.id, "made-up", true, None, requester(), "req-test")
            .await
            .expect_err("unknown control must fail");
        assert!(matches!(
            error,
            ServiceError::Domain(DomainError::Validation { ref field, .. }) if field == "control_id"
        ));
    }

    #[tokio::test]
    async fn workers_are_frozen_after_submission() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();

        let added = h
            .service
            .add_worker(
                &id,
                Worker { name: "B. Okafor".to_string(), role: None },
                requester(),
                "req-test",
            )
            .await
            .expect("add worker in draft");
        assert_eq!(added.permit.workers.len(), 2);

        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("controls");
        h.service.submit(&id, as_actor(requester())).await.expect("submit");

        let error = h
            .service
            .remove_worker(&id, "B. Okafor", requester(), "req-test")
            .await
            .expect_err("crew is frozen after submit");
        assert!(matches!(error, ServiceError::Domain(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn writes_reload_fresh_state_after_an_interleaved_write() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();

        // Another writer bumps the stored version behind the service's back.
        let stored = h.permits.find_by_id(&id).await.expect("find").expect("exists");
        let mut racing = stored.clone();
        racing.version += 1;
        h.permits.update(racing, stored.version).await.expect("racing write");

        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("write against fresh state succeeds");

        let after = h.permits.find_by_id(&id).await.expect("find").expect("exists");
        assert!(after.control_completed("fire-watch"));
        assert_eq!(after.version, 3);
    }

    #[tokio::test]
    async fn board_groups_by_status_and_check_conflicts_is_pure() {
        let h = harness().await;
        let created = h.service.create(create_request(), requester(), "req-test").await.expect("create");
        let id = created.permit.id.clone();
        h.service
            .set_control(&id, "fire-watch", true, None, requester(), "req-test")
            .await
            .expect("controls");
        h.service.submit(&id, as_actor(requester())).await.expect("submit");

        let board = h.service.board(None, None).await.expect("board");
        let submitted_column = board
            .iter()
            .find(|column| column.status == PermitStatus::Submitted)
            .expect("submitted column");
        assert_eq!(submitted_column.permits.len(), 1);

        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        );
        let warnings = h
            .service
            .check_conflicts(&SiteId("site-1".to_string()), &window, None, None)
            .await
            .expect("check conflicts");
        assert_eq!(warnings.len(), 1);

        // The read did not mutate anything.
        let after = h.permits.find_by_id(&id).await.expect("find").expect("exists");
        assert_eq!(after.status, PermitStatus::Submitted);

        let rejected_events = h
            .audit
            .events()
            .iter()
            .filter(|event| event.event_type == "permit.transition_rejected")
            .count();
        assert_eq!(rejected_events, 0);
    }
}
