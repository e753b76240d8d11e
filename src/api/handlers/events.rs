//! Event tracking and user state handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{TrackEventRequest, TrackEventResponse, UserStateResponse};
use crate::api::extract::AuthenticatedUser;
use crate::app_state::AppState;
use crate::error::{CoreError, ErrorResponse};

/// `POST /events`: append a behavioral event to the caller's ledger.
///
/// # Errors
///
/// Returns [`CoreError`] on invalid tokens, timezone or metadata, and on
/// store failures.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Track an event",
    description = "Appends an event idempotently by `event_id` and updates the caller's streak and activity in the same transaction. A replayed id returns `duplicate` and changes nothing.",
    request_body = TrackEventRequest,
    params(("x-user-id" = String, Header, description = "Verified user id")),
    responses(
        (status = 200, description = "Event created or already recorded", body = TrackEventResponse),
        (status = 400, description = "Invalid event", body = ErrorResponse),
    )
)]
pub async fn track_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<TrackEventRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let cmd = req.into_command(user.user_id)?;
    let event_id = cmd.event_id.clone();
    let outcome = state.ledger.track(cmd).await?;
    Ok(Json(TrackEventResponse {
        status: outcome.status(),
        event_id,
    }))
}

/// `GET /me/state`: the caller's streak summary and schedule.
///
/// # Errors
///
/// Returns [`CoreError::UserNotFound`] before the first event or
/// preference of the caller.
#[utoipa::path(
    get,
    path = "/api/v1/me/state",
    tag = "Events",
    summary = "Get own user state",
    params(("x-user-id" = String, Header, description = "Verified user id")),
    responses(
        (status = 200, description = "Current user state", body = UserStateResponse),
        (status = 404, description = "No state yet", body = ErrorResponse),
    )
)]
pub async fn get_user_state(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, CoreError> {
    let user_state = state.ledger.user_state(&user.user_id).await?;
    Ok(Json(UserStateResponse::from(user_state)))
}

/// Event routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(track_event))
        .route("/me/state", get(get_user_state))
}
