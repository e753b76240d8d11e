//! REST API layer: route handlers, DTOs, extractors, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; health, the public
//! workflow link and the internal scheduler trigger live at the root.

pub mod dto;
pub mod extract;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for every route this crate serves.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "streak-core", description = "Behavioral event ledger, notification scheduler and deferred-link workflows."),
    paths(
        handlers::system::health_handler,
        handlers::events::track_event,
        handlers::events::get_user_state,
        handlers::preferences::update_preference,
        handlers::workflows::create_workflow,
        handlers::workflows::resolve_workflow,
        handlers::workflows::complete_workflow,
        handlers::workflows::follow_link,
        handlers::scheduler::run_tick,
    ),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Events", description = "Event ledger and user state"),
        (name = "Notifications", description = "Notification preferences"),
        (name = "Workflows", description = "Deferred-link workflows"),
        (name = "Scheduler", description = "Notification scheduler"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router.
///
/// The scheduler trigger is mounted only when `http_trigger` is set.
pub fn build_router(http_trigger: bool) -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::workflows::link_routes())
        .merge(handlers::system::routes());
    if http_trigger {
        router.merge(handlers::scheduler::routes())
    } else {
        router
    }
}
