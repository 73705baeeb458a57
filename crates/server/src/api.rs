//! JSON API for the permit lifecycle.
//!
//! Endpoints (all under `/api/v1`):
//! - `POST   /permits`                                  — create a draft permit
//! - `GET    /permits/board`                            — permits grouped by status
//! - `POST   /permits/check-conflicts`                  — dry-run conflict check
//! - `GET    /permits/{id}`                             — fetch one permit
//! - `POST   /permits/{id}/submit|approve|reject|activate|suspend|resume|close|cancel`
//! - `POST   /permits/{id}/controls/{control_id}/complete`
//! - `POST   /permits/{id}/controls/{control_id}/uncomplete`
//! - `POST   /permits/{id}/workers`                     — add a worker (draft only)
//! - `DELETE /permits/{id}/workers/{name}`              — remove a worker (draft only)
//! - `GET    /permits/{id}/history`                     — state history, oldest first
//! - `GET    /permit-types`                             — seeded permit type catalog

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use permitly_core::conflicts::{ConflictWarning, TimeWindow};
use permitly_core::domain::permit::{
    ActorRole, Permit, PermitId, SiteId, StateHistoryEntry, UserId, Worker,
};
use permitly_core::domain::permit_type::{PermitType, PermitTypeId};
use permitly_core::errors::{InterfaceError, ServiceError};
use permitly_core::lifecycle::PermitEvent;

use crate::service::{
    ActorContext, BoardColumn, CreatePermitRequest, PermitService, PermitView, TransitionRequest,
};

#[derive(Clone)]
pub struct ApiState {
    service: Arc<PermitService>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ActorPayload {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermitBody {
    pub permit_type_id: String,
    pub site_id: String,
    pub location: Option<String>,
    pub work_description: String,
    pub hazards: Option<String>,
    pub special_conditions: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub workers: Vec<Worker>,
    pub actor: ActorPayload,
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub actor: ActorPayload,
    pub reason: Option<String>,
    /// Reported actual start (activate) or end (close) of the work.
    pub actual_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ControlBody {
    pub actor: ActorPayload,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddWorkerBody {
    pub actor: ActorPayload,
    pub worker: Worker,
}

#[derive(Debug, Deserialize)]
pub struct RemoveWorkerBody {
    pub actor: ActorPayload,
}

#[derive(Debug, Deserialize)]
pub struct CheckConflictsBody {
    pub site_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    /// Permit to ignore, so a permit never conflicts with itself.
    pub exclude_permit_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BoardQuery {
    pub site_id: Option<String>,
    pub permit_type_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type Rejection = (StatusCode, Json<ApiError>);

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(service: Arc<PermitService>) -> Router {
    Router::new()
        .route("/api/v1/permits", post(create_permit))
        .route("/api/v1/permits/board", get(board))
        .route("/api/v1/permits/check-conflicts", post(check_conflicts))
        .route("/api/v1/permits/{id}", get(get_permit))
        .route("/api/v1/permits/{id}/submit", post(submit_permit))
        .route("/api/v1/permits/{id}/approve", post(approve_permit))
        .route("/api/v1/permits/{id}/reject", post(reject_permit))
        .route("/api/v1/permits/{id}/activate", post(activate_permit))
        .route("/api/v1/permits/{id}/suspend", post(suspend_permit))
        .route("/api/v1/permits/{id}/resume", post(resume_permit))
        .route("/api/v1/permits/{id}/close", post(close_permit))
        .route("/api/v1/permits/{id}/cancel", post(cancel_permit))
        .route("/api/v1/permits/{id}/controls/{control_id}/complete", post(complete_control))
        .route("/api/v1/permits/{id}/controls/{control_id}/uncomplete", post(uncomplete_control))
        .route("/api/v1/permits/{id}/workers", post(add_worker))
        .route("/api/v1/permits/{id}/workers/{name}", delete(remove_worker))
        .route("/api/v1/permits/{id}/history", get(permit_history))
        .route("/api/v1/permit-types", get(list_permit_types))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_permit(
    State(state): State<ApiState>,
    Json(body): Json<CreatePermitBody>,
) -> Result<(StatusCode, Json<PermitView>), Rejection> {
    let correlation_id = new_correlation_id();
    let actor = parse_actor(&body.actor, &correlation_id)?;

    let request = CreatePermitRequest {
        permit_type_id: PermitTypeId(body.permit_type_id),
        site_id: SiteId(body.site_id),
        location: body.location,
        work_description: body.work_description,
        hazards: body.hazards,
        special_conditions: body.special_conditions,
        start_time: body.start_time,
        end_time: body.end_time,
        workers: body.workers,
    };

    let view = state
        .service
        .create(request, actor, &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Permit>, Rejection> {
    let correlation_id = new_correlation_id();
    let permit = state
        .service
        .get(&PermitId(id))
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok(Json(permit))
}

async fn submit_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Submit, body).await
}

async fn approve_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Approve, body).await
}

async fn reject_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Reject, body).await
}

async fn activate_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Activate, body).await
}

async fn suspend_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Suspend, body).await
}

async fn resume_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Resume, body).await
}

async fn close_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Close, body).await
}

async fn cancel_permit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<PermitView>, Rejection> {
    apply_transition(&state, id, PermitEvent::Cancel, body).await
}

async fn apply_transition(
    state: &ApiState,
    id: String,
    event: PermitEvent,
    body: TransitionBody,
) -> Result<Json<PermitView>, Rejection> {
    let correlation_id = new_correlation_id();
    let actor = parse_actor(&body.actor, &correlation_id)?;
    let permit_id = PermitId(id);
    let request = TransitionRequest {
        actor,
        reason: body.reason,
        actual_time: body.actual_time,
        correlation_id: correlation_id.clone(),
    };

    let result = match event {
        PermitEvent::Submit => state.service.submit(&permit_id, request).await,
        PermitEvent::Approve => state.service.approve(&permit_id, request).await,
        PermitEvent::Reject => state.service.reject(&permit_id, request).await,
        PermitEvent::Activate => state.service.activate(&permit_id, request).await,
        PermitEvent::Suspend => state.service.suspend(&permit_id, request).await,
        PermitEvent::Resume => state.service.resume(&permit_id, request).await,
        PermitEvent::Close => state.service.close(&permit_id, request).await,
        PermitEvent::Cancel => state.service.cancel(&permit_id, request).await,
        PermitEvent::Expire => {
            // Expiry is system-initiated; there is no route for it.
            return Err(not_found(&correlation_id));
        }
    };

    result.map(Json).map_err(|error| reject(error, &correlation_id))
}

async fn complete_control(
    State(state): State<ApiState>,
    Path((id, control_id)): Path<(String, String)>,
    Json(body): Json<ControlBody>,
) -> Result<Json<PermitView>, Rejection> {
    set_control(&state, id, control_id, true, body).await
}

async fn uncomplete_control(
    State(state): State<ApiState>,
    Path((id, control_id)): Path<(String, String)>,
    Json(body): Json<ControlBody>,
) -> Result<Json<PermitView>, Rejection> {
    set_control(&state, id, control_id, false, body).await
}

async fn set_control(
    state: &ApiState,
    id: String,
    control_id: String,
    completed: bool,
    body: ControlBody,
) -> Result<Json<PermitView>, Rejection> {
    let correlation_id = new_correlation_id();
    let actor = parse_actor(&body.actor, &correlation_id)?;
    state
        .service
        .set_control(&PermitId(id), &control_id, completed, body.notes, actor, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn add_worker(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<AddWorkerBody>,
) -> Result<Json<PermitView>, Rejection> {
    let correlation_id = new_correlation_id();
    let actor = parse_actor(&body.actor, &correlation_id)?;
    state
        .service
        .add_worker(&PermitId(id), body.worker, actor, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn remove_worker(
    State(state): State<ApiState>,
    Path((id, name)): Path<(String, String)>,
    Json(body): Json<RemoveWorkerBody>,
) -> Result<Json<PermitView>, Rejection> {
    let correlation_id = new_correlation_id();
    let actor = parse_actor(&body.actor, &correlation_id)?;
    state
        .service
        .remove_worker(&PermitId(id), &name, actor, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn board(
    State(state): State<ApiState>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<Vec<BoardColumn>>, Rejection> {
    let correlation_id = new_correlation_id();
    let site_id = query.site_id.map(SiteId);
    let permit_type_id = query.permit_type_id.map(PermitTypeId);
    state
        .service
        .board(site_id.as_ref(), permit_type_id.as_ref())
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn check_conflicts(
    State(state): State<ApiState>,
    Json(body): Json<CheckConflictsBody>,
) -> Result<Json<Vec<ConflictWarning>>, Rejection> {
    let correlation_id = new_correlation_id();
    let window = TimeWindow::new(body.start_time, body.end_time);
    let exclude = body.exclude_permit_id.map(PermitId);
    state
        .service
        .check_conflicts(
            &SiteId(body.site_id),
            &window,
            body.location.as_deref(),
            exclude.as_ref(),
        )
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn permit_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StateHistoryEntry>>, Rejection> {
    let correlation_id = new_correlation_id();
    state
        .service
        .history(&PermitId(id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn list_permit_types(
    State(state): State<ApiState>,
) -> Result<Json<Vec<PermitType>>, Rejection> {
    let correlation_id = new_correlation_id();
    state
        .service
        .list_permit_types()
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

fn parse_actor(payload: &ActorPayload, correlation_id: &str) -> Result<ActorContext, Rejection> {
    let user_id = payload.user_id.trim();
    if user_id.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError {
                error: "actor.user_id must not be empty".to_string(),
                correlation_id: correlation_id.to_string(),
            }),
        ));
    }
    let role = ActorRole::parse(&payload.role).ok_or_else(|| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError {
                error: format!("unknown actor role `{}`", payload.role),
                correlation_id: correlation_id.to_string(),
            }),
        )
    })?;
    Ok(ActorContext { user_id: UserId(user_id.to_string()), role })
}

fn not_found(correlation_id: &str) -> Rejection {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            error: "not found".to_string(),
            correlation_id: correlation_id.to_string(),
        }),
    )
}

fn reject(error: ServiceError, correlation_id: &str) -> Rejection {
    let interface = error.into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } | InterfaceError::GuardViolation { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status == StatusCode::SERVICE_UNAVAILABLE {
        warn!(
            event_name = "api.persistence_failure",
            correlation_id = %correlation_id,
            permit_id = "unknown",
            error = %interface,
            "request failed on persistence"
        );
    }
    (
        status,
        Json(ApiError {
            error: interface.user_message(),
            correlation_id: correlation_id.to_string(),
        }),
    )
}
