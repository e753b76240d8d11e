//! Core error types with HTTP status code mapping.
//!
//! [`CoreError`] is the central error type for the service. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2003,
///     "message": "workflow wf_0190... has expired",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see the code ranges on [`CoreError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category            | HTTP Status                          |
/// |-----------|---------------------|--------------------------------------|
/// | 1000–1999 | Validation          | 400 Bad Request                      |
/// | 2000–2999 | State / Not Found   | 404 Not Found / 409 Conflict / 410   |
/// | 3000–3999 | Server / Dependency | 500 / 502 Bad Gateway / 504 Timeout  |
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Event metadata does not match the schema of its kind.
    #[error("invalid metadata for {kind}: {reason}")]
    InvalidEventMetadata {
        /// Event kind the metadata was submitted for.
        kind: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Timezone string is not a known IANA zone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Workflow id does not match the expected format.
    #[error("invalid workflow id: {0}")]
    InvalidWorkflowId(String),

    /// No behavioral state exists for the user yet.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Workflow with the given id was not found.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Completion was attempted on an expired workflow.
    #[error("workflow {0} has expired")]
    WorkflowExpired(String),

    /// The workflow's resolve cap has been exhausted.
    #[error("workflow {0} has reached its resolve limit")]
    ResolveLimitReached(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Push transport or other downstream call failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An external call exceeded its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidEventMetadata { .. } => 1002,
            Self::InvalidTimezone(_) => 1003,
            Self::InvalidWorkflowId(_) => 1004,
            Self::UserNotFound(_) => 2001,
            Self::WorkflowNotFound(_) => 2002,
            Self::WorkflowExpired(_) => 2003,
            Self::ResolveLimitReached(_) => 2004,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::Transport(_) => 3002,
            Self::Timeout(_) => 3003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidEventMetadata { .. }
            | Self::InvalidTimezone(_)
            | Self::InvalidWorkflowId(_) => StatusCode::BAD_REQUEST,
            Self::UserNotFound(_) | Self::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
            Self::WorkflowExpired(_) => StatusCode::CONFLICT,
            Self::ResolveLimitReached(_) => StatusCode::GONE,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Returns `true` for failures of an external dependency, which are
    /// retried at the next natural trigger rather than in place.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::Transport(_) | Self::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
