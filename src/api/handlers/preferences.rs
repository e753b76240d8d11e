//! Notification preference handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::put;
use axum::{Json, Router};

use crate::api::dto::{UpdatePreferenceRequest, UserStateResponse};
use crate::api::extract::AuthenticatedUser;
use crate::app_state::AppState;
use crate::error::{CoreError, ErrorResponse};
use crate::service::PreferenceUpdate;

/// `PUT /notifications/preferences`: change one notification preference.
///
/// # Errors
///
/// Returns [`CoreError`] on an invalid time or timezone and on store
/// failures.
#[utoipa::path(
    put,
    path = "/api/v1/notifications/preferences",
    tag = "Notifications",
    summary = "Update a notification preference",
    description = "Merges one preference into the caller's settings and recomputes the next notification instant over every enabled type.",
    request_body = UpdatePreferenceRequest,
    params(("x-user-id" = String, Header, description = "Verified user id")),
    responses(
        (status = 200, description = "Updated user state", body = UserStateResponse),
        (status = 400, description = "Invalid preference", body = ErrorResponse),
    )
)]
pub async fn update_preference(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<UpdatePreferenceRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let updated = state
        .schedule
        .update_preference(PreferenceUpdate {
            user_id: user.user_id,
            notification_type: req.notification_type,
            enabled: req.enabled,
            hour: req.hour,
            minute: req.minute,
            timezone: req.timezone,
        })
        .await?;
    Ok(Json(UserStateResponse::from(updated)))
}

/// Preference routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/notifications/preferences", put(update_preference))
}
