//! REST endpoint handlers organized by resource.

pub mod events;
pub mod preferences;
pub mod scheduler;
pub mod system;
pub mod workflows;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(events::routes())
        .merge(preferences::routes())
        .merge(workflows::routes())
}
