//! On-demand scheduler trigger.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::error::{CoreError, ErrorResponse};
use crate::service::TickReport;

/// `POST /internal/scheduler/tick`: run one driver tick now.
///
/// # Errors
///
/// Returns [`CoreError::Persistence`] if the due-user query fails.
#[utoipa::path(
    post,
    path = "/internal/scheduler/tick",
    tag = "Scheduler",
    summary = "Run one scheduler tick",
    description = "Runs a tick for the current window. Retrying within the same window sends nothing twice.",
    responses(
        (status = 200, description = "Tick finished", body = TickReport),
        (status = 500, description = "Due-user query failed", body = ErrorResponse),
    )
)]
pub async fn run_tick(State(state): State<AppState>) -> Result<impl IntoResponse, CoreError> {
    let report = state.driver.run_tick().await?;
    Ok(Json(report))
}

/// Internal scheduler routes, mounted at the root.
pub fn routes() -> Router<AppState> {
    Router::new().route("/internal/scheduler/tick", post(run_tick))
}
