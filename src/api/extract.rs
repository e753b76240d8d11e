//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::CoreError;

/// Header carrying the identity verified by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity taken from the [`USER_ID_HEADER`] header.
///
/// Token verification happens upstream; this only requires the header to
/// be present and non-blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Verified user id.
    pub user_id: String,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                CoreError::InvalidRequest(format!("missing {USER_ID_HEADER} header"))
            })?;
        Ok(Self {
            user_id: user_id.to_string(),
        })
    }
}
