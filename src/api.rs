use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::db::DbHandle;
use crate::errors::WorkflowError;
use crate::models::{PhaseStatus, Principal, ReviewOutcome, Role};
use crate::review::ReviewMeta;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// Statuses and outcomes arrive as strings and are parsed through the
/// closed enums, so an unknown value is a 400 with the offending input
/// named, not a deserializer 422.
#[derive(Deserialize)]
pub struct CompleteReviewRequest {
    pub outcome: String,
    pub comments: Option<String>,
    #[serde(default = "default_true")]
    pub auto_advance: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct RequestTransitionRequest {
    pub from_id: i64,
    pub to_id: i64,
}

#[derive(Deserialize)]
pub struct OverrideRequest {
    pub target_status: String,
    pub reason: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

/// The acting principal, supplied by the external identity layer via
/// headers. Required on every state-mutating call — there is no fallback
/// identity, absence is rejected outright.
fn require_principal(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let user_id = headers
        .get("x-acting-user")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError(WorkflowError::Authorization(
                "missing X-Acting-User header: an explicit acting principal is required".to_string(),
            ))
        })?
        .to_string();
    let role = headers
        .get("x-acting-role")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError(WorkflowError::Authorization(
                "missing X-Acting-Role header".to_string(),
            ))
        })?;
    let role = Role::from_str(role).map_err(|e| ApiError(WorkflowError::Authorization(e)))?;
    Ok(Principal { user_id, role })
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/templates", get(list_templates))
        .route(
            "/api/projects/{project_id}/phases",
            get(get_workflow).post(initialize_phases),
        )
        .route("/api/projects/{project_id}/transition", post(request_transition))
        .route("/api/projects/{project_id}/bottlenecks", get(get_bottlenecks))
        .route("/api/instances/{id}/submit-review", post(submit_for_review))
        .route("/api/instances/{id}/override", post(emergency_override))
        .route("/api/instances/{id}/audit", get(get_audit_trail))
        .route("/api/reviews/{id}/complete", post(complete_review))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_templates(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let defs = state.db.call(|db| db.list_definitions()).await?;
    Ok(Json(defs))
}

async fn initialize_phases(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_principal(&headers)?;
    let views = state
        .db
        .call(move |db| db.initialize_phases(project_id, &principal))
        .await?;
    Ok((StatusCode::CREATED, Json(views)))
}

async fn get_workflow(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let views = state.db.call(move |db| db.get_workflow(project_id)).await?;
    Ok(Json(views))
}

async fn submit_for_review(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(meta): Json<ReviewMeta>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_principal(&headers)?;
    let review = state
        .db
        .call(move |db| db.submit_for_review(id, &meta, &principal))
        .await?;
    Ok(Json(review))
}

async fn complete_review(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<CompleteReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_principal(&headers)?;
    let outcome = ReviewOutcome::from_str(&req.outcome)
        .map_err(|e| ApiError(WorkflowError::Validation(e)))?;
    let result = state
        .db
        .call(move |db| {
            db.complete_review(
                id,
                outcome,
                req.comments.as_deref(),
                &principal,
                req.auto_advance,
            )
        })
        .await?;
    Ok(Json(result))
}

async fn request_transition(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<RequestTransitionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_principal(&headers)?;
    let result = state
        .db
        .call(move |db| db.request_transition(project_id, req.from_id, req.to_id, &principal))
        .await?;
    Ok(Json(result))
}

async fn emergency_override(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<OverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_principal(&headers)?;
    let target = PhaseStatus::from_str(&req.target_status)
        .map_err(|e| ApiError(WorkflowError::Validation(e)))?;
    let result = state
        .db
        .call(move |db| db.emergency_override(id, target, &req.reason, &principal))
        .await?;
    Ok(Json(result))
}

async fn get_bottlenecks(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let blockers = state.db.call(move |db| db.bottlenecks(project_id)).await?;
    Ok(Json(blockers))
}

async fn get_audit_trail(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.db.call(move |db| db.audit_trail(id)).await?;
    Ok(Json(entries))
}
