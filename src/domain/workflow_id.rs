//! Type-safe, time-sortable workflow identifier.
//!
//! [`WorkflowId`] is `wf_` followed by the 32 lowercase hex digits of a
//! UUID v7. The leading 48 bits of a v7 UUID are the Unix timestamp in
//! milliseconds, so the lexicographic order of ids follows creation time.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CoreError;

/// Constant prefix of every workflow id.
pub const WORKFLOW_ID_PREFIX: &str = "wf_";

static WORKFLOW_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^wf_[0-9a-f]{12}7[0-9a-f]{3}[89ab][0-9a-f]{15}$").ok());

/// Unique identifier of a deferred-link workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Generates a fresh id from the current time.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!(
            "{WORKFLOW_ID_PREFIX}{}",
            uuid::Uuid::now_v7().simple()
        ))
    }

    /// Validates an untrusted id string.
    ///
    /// The check is purely syntactic and runs before any store access.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidWorkflowId`] if `raw` is not a prefixed
    /// UUID v7 in simple lowercase form, and [`CoreError::Internal`] if the
    /// id pattern failed to compile.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let Some(pattern) = WORKFLOW_ID_PATTERN.as_ref() else {
            tracing::error!("workflow id pattern failed to compile");
            return Err(CoreError::Internal(
                "workflow id pattern failed to compile".to_string(),
            ));
        };
        if pattern.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(CoreError::InvalidWorkflowId(raw.chars().take(64).collect()))
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
