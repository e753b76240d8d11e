//! Deferred-link workflow handlers: create, resolve, complete, landing link.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    CompleteWorkflowResponse, CreateWorkflowRequest, CreateWorkflowResponse,
    ResolveWorkflowResponse,
};
use crate::api::extract::AuthenticatedUser;
use crate::app_state::AppState;
use crate::domain::{EffectiveStatus, NewWorkflow};
use crate::error::{CoreError, ErrorResponse};

/// `POST /workflows`: issue a new deferred-link workflow.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRequest`] on an out-of-range TTL, a bad
/// payload, or a zero resolve cap.
#[utoipa::path(
    post,
    path = "/api/v1/workflows",
    tag = "Workflows",
    summary = "Create a workflow",
    description = "Creates an active workflow owned by the caller, with its expiry fixed at creation, and returns the public link.",
    request_body = CreateWorkflowRequest,
    params(("x-user-id" = String, Header, description = "Verified user id")),
    responses(
        (status = 201, description = "Workflow created", body = CreateWorkflowResponse),
        (status = 400, description = "Invalid workflow", body = ErrorResponse),
    )
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let new = NewWorkflow::validate(
        req.workflow_type,
        req.payload,
        Some(user.user_id),
        req.ttl_hours,
        req.campaign,
        req.max_resolves,
    )?;
    let created = state.workflows.create(new).await?;
    Ok((StatusCode::CREATED, Json(CreateWorkflowResponse::from(created))))
}

/// `GET /workflows/{id}`: resolve a workflow.
///
/// # Errors
///
/// Returns [`CoreError`] for a malformed or unknown id and once the resolve
/// cap is used up.
#[utoipa::path(
    get,
    path = "/api/v1/workflows/{id}",
    tag = "Workflows",
    summary = "Resolve a workflow",
    description = "Returns the workflow with its status computed at request time. Expired workflows resolve with status `EXPIRED`.",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow resolved", body = ResolveWorkflowResponse),
        (status = 400, description = "Malformed id", body = ErrorResponse),
        (status = 404, description = "Unknown workflow", body = ErrorResponse),
        (status = 410, description = "Resolve limit reached", body = ErrorResponse),
    )
)]
pub async fn resolve_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let resolved = state.workflows.resolve(&id).await?;
    Ok(Json(ResolveWorkflowResponse::from(resolved)))
}

/// `POST /workflows/{id}/complete`: complete a workflow.
///
/// # Errors
///
/// Returns [`CoreError`] for a malformed or unknown id, and
/// [`CoreError::WorkflowExpired`] once the workflow has expired.
#[utoipa::path(
    post,
    path = "/api/v1/workflows/{id}/complete",
    tag = "Workflows",
    summary = "Complete a workflow",
    description = "Marks an active workflow completed. Completing it again succeeds and keeps the first completion instant.",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow completed", body = CompleteWorkflowResponse),
        (status = 404, description = "Unknown workflow", body = ErrorResponse),
        (status = 409, description = "Workflow expired", body = ErrorResponse),
    )
)]
pub async fn complete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let workflow = state.workflows.complete(&id).await?;
    Ok(Json(CompleteWorkflowResponse {
        id: workflow.id,
        status: EffectiveStatus::Completed,
        completed_at: workflow.completed_at,
    }))
}

/// `GET /wf/{id}`: public landing link.
///
/// # Errors
///
/// Returns [`CoreError`] for a malformed or unknown id.
#[utoipa::path(
    get,
    path = "/wf/{id}",
    tag = "Workflows",
    summary = "Follow a workflow link",
    description = "Counts the click and redirects to the landing page with the workflow id attached.",
    params(("id" = String, Path, description = "Workflow id")),
    responses(
        (status = 302, description = "Redirect to the landing page"),
        (status = 404, description = "Unknown workflow", body = ErrorResponse),
    )
)]
pub async fn follow_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let workflow = state.workflows.record_click(&id).await?;
    let separator = if state.landing_url.contains('?') { '&' } else { '?' };
    let target = format!("{}{separator}workflow_id={}", state.landing_url, workflow.id);
    Ok((StatusCode::FOUND, [(axum::http::header::LOCATION, target)]).into_response())
}

/// Workflow API routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create_workflow))
        .route("/workflows/{id}", get(resolve_workflow))
        .route("/workflows/{id}/complete", post(complete_workflow))
}

/// Public landing route, mounted at the root.
pub fn link_routes() -> Router<AppState> {
    Router::new().route("/wf/{id}", get(follow_link))
}
