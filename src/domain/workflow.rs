//! Deferred-link workflows: short-lived tokens carrying a typed payload.
//!
//! Only `active` and `completed` are ever persisted. Expiry is computed at
//! read time from the fixed `expires_at`, so a workflow that is expired
//! once stays expired.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::workflow_id::WorkflowId;
use crate::error::CoreError;

/// Smallest accepted TTL.
pub const MIN_TTL_HOURS: u32 = 1;
/// Largest accepted TTL.
pub const MAX_TTL_HOURS: u32 = 72;
/// TTL used when the caller does not pick one.
pub const DEFAULT_TTL_HOURS: u32 = 48;
/// Longest campaign tag.
pub const MAX_CAMPAIGN_LEN: usize = 64;

/// Closed allow-list of workflow types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Invite from an existing user; carries a referrer code.
    Referral,
    /// A meal shared from another user's log.
    SharedMeal,
    /// Promotional offer; carries a promo code.
    Promo,
    /// Resume an onboarding flow started on the web.
    OnboardingResume,
}

impl WorkflowType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Referral => "referral",
            Self::SharedMeal => "shared_meal",
            Self::Promo => "promo",
            Self::OnboardingResume => "onboarding_resume",
        }
    }

    /// Largest serialized payload accepted for this type, in bytes.
    #[must_use]
    pub const fn max_payload_bytes(self) -> usize {
        match self {
            Self::Referral | Self::Promo => 1024,
            Self::SharedMeal => 8 * 1024,
            Self::OnboardingResume => 4 * 1024,
        }
    }

    /// Payload fields that must be present as non-empty strings (max 64 chars).
    #[must_use]
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Referral => &["referrer_code"],
            Self::Promo => &["code"],
            Self::SharedMeal | Self::OnboardingResume => &[],
        }
    }

    /// Validates a payload against this type's bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRequest`] if the payload is not an
    /// object, is too large, or lacks a required field.
    pub fn validate_payload(self, payload: &serde_json::Value) -> Result<(), CoreError> {
        let Some(object) = payload.as_object() else {
            return Err(CoreError::InvalidRequest(format!(
                "{self} payload must be a JSON object"
            )));
        };
        let size = serde_json::to_vec(payload)
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .len();
        if size > self.max_payload_bytes() {
            return Err(CoreError::InvalidRequest(format!(
                "{self} payload is {size} bytes, limit is {}",
                self.max_payload_bytes()
            )));
        }
        for field in self.required_fields() {
            let valid = object
                .get(*field)
                .and_then(serde_json::Value::as_str)
                .is_some_and(|v| !v.is_empty() && v.chars().count() <= 64);
            if !valid {
                return Err(CoreError::InvalidRequest(format!(
                    "{self} payload requires string field {field} (1..=64 chars)"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as stored. Expiry is never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistedStatus {
    /// Open for resolution and completion.
    Active,
    /// Completed exactly once.
    Completed,
}

impl PersistedStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for PersistedStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(CoreError::Internal(format!(
                "unknown persisted workflow status: {other}"
            ))),
        }
    }
}

/// Status as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveStatus {
    /// Not completed and not past expiry.
    Active,
    /// Completed.
    Completed,
    /// Past expiry without having been completed.
    Expired,
}

/// Computes the status a caller sees at `now`.
#[must_use]
pub fn effective_status(
    persisted: PersistedStatus,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> EffectiveStatus {
    match persisted {
        PersistedStatus::Completed => EffectiveStatus::Completed,
        PersistedStatus::Active if now > expires_at => EffectiveStatus::Expired,
        PersistedStatus::Active => EffectiveStatus::Active,
    }
}

/// A workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Time-sortable id.
    pub id: WorkflowId,
    /// Workflow type.
    pub workflow_type: WorkflowType,
    /// Stored status.
    pub status: PersistedStatus,
    /// Type-specific payload (a JSON object).
    pub payload: serde_json::Value,
    /// Creating user, `None` for public workflows.
    pub owner_id: Option<String>,
    /// Marketing campaign tag.
    pub campaign: Option<String>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Fixed at creation, never changed.
    pub expires_at: DateTime<Utc>,
    /// Set once, on completion.
    pub completed_at: Option<DateTime<Utc>>,
    /// Landing-page hits.
    pub click_count: u64,
    /// API resolutions.
    pub resolve_count: u64,
    /// Instant of the latest resolution.
    pub last_resolved_at: Option<DateTime<Utc>>,
    /// Optional cap on `resolve_count`.
    pub max_resolves: Option<u64>,
}

impl Workflow {
    /// Status a caller sees at `now`.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        effective_status(self.status, self.expires_at, now)
    }

    /// Whether a resolution that found `prior_resolves` earlier ones is
    /// over the cap.
    #[must_use]
    pub fn resolve_limit_exceeded(&self, prior_resolves: u64) -> bool {
        self.max_resolves.is_some_and(|cap| prior_resolves >= cap)
    }

    /// Decides what completion at `now` does.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WorkflowExpired`] when the workflow is expired.
    pub fn completion(&self, now: DateTime<Utc>) -> Result<Completion, CoreError> {
        match self.effective_status(now) {
            EffectiveStatus::Completed => Ok(Completion::AlreadyCompleted),
            EffectiveStatus::Expired => Err(CoreError::WorkflowExpired(self.id.to_string())),
            EffectiveStatus::Active => Ok(Completion::Complete),
        }
    }
}

/// Outcome of the completion guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Write `completed` and the completion instant.
    Complete,
    /// Already completed; succeed without writing.
    AlreadyCompleted,
}

/// Validated input for creating a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkflow {
    /// Workflow type.
    pub workflow_type: WorkflowType,
    /// Type-specific payload.
    pub payload: serde_json::Value,
    /// Creating user.
    pub owner_id: Option<String>,
    /// Time to live in hours.
    pub ttl_hours: u32,
    /// Campaign tag.
    pub campaign: Option<String>,
    /// Resolve cap.
    pub max_resolves: Option<u64>,
}

impl NewWorkflow {
    /// Validates caller input, applying the default TTL and an empty payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRequest`] on an out-of-range TTL, a
    /// malformed campaign tag, a zero resolve cap, or an invalid payload.
    pub fn validate(
        workflow_type: WorkflowType,
        payload: Option<serde_json::Value>,
        owner_id: Option<String>,
        ttl_hours: Option<u32>,
        campaign: Option<String>,
        max_resolves: Option<u64>,
    ) -> Result<Self, CoreError> {
        let ttl_hours = ttl_hours.unwrap_or(DEFAULT_TTL_HOURS);
        if !(MIN_TTL_HOURS..=MAX_TTL_HOURS).contains(&ttl_hours) {
            return Err(CoreError::InvalidRequest(format!(
                "ttl_hours must be {MIN_TTL_HOURS}..={MAX_TTL_HOURS}, got {ttl_hours}"
            )));
        }
        if let Some(tag) = campaign.as_deref() {
            let well_formed = !tag.is_empty()
                && tag.len() <= MAX_CAMPAIGN_LEN
                && tag
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
            if !well_formed {
                return Err(CoreError::InvalidRequest(format!(
                    "campaign must be 1..={MAX_CAMPAIGN_LEN} chars of [A-Za-z0-9_-]"
                )));
            }
        }
        if max_resolves == Some(0) {
            return Err(CoreError::InvalidRequest(
                "max_resolves must be at least 1".to_string(),
            ));
        }
        let payload = payload
            .filter(|p| !p.is_null())
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        workflow_type.validate_payload(&payload)?;
        Ok(Self {
            workflow_type,
            payload,
            owner_id,
            ttl_hours,
            campaign,
            max_resolves,
        })
    }

    /// Materializes the document with a fresh id.
    #[must_use]
    pub fn into_workflow(self, now: DateTime<Utc>) -> Workflow {
        Workflow {
            id: WorkflowId::generate(),
            workflow_type: self.workflow_type,
            status: PersistedStatus::Active,
            payload: self.payload,
            owner_id: self.owner_id,
            campaign: self.campaign,
            created_at: now,
            expires_at: now + Duration::hours(i64::from(self.ttl_hours)),
            completed_at: None,
            click_count: 0,
            resolve_count: 0,
            last_resolved_at: None,
            max_resolves: self.max_resolves,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn referral(ttl: Option<u32>) -> Workflow {
        let Ok(new) = NewWorkflow::validate(
            WorkflowType::Referral,
            Some(json!({ "referrer_code": "ANA42" })),
            Some("u1".to_string()),
            ttl,
            None,
            None,
        ) else {
            panic!("valid workflow");
        };
        new.into_workflow(Utc::now())
    }

    #[test]
    fn default_ttl_is_48_hours() {
        let wf = referral(None);
        assert_eq!(wf.expires_at - wf.created_at, Duration::hours(48));
        assert_eq!(wf.status, PersistedStatus::Active);
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        for ttl in [0, 73] {
            let result = NewWorkflow::validate(
                WorkflowType::OnboardingResume,
                None,
                None,
                Some(ttl),
                None,
                None,
            );
            assert!(result.is_err(), "ttl {ttl} should be rejected");
        }
    }

    #[test]
    fn referral_requires_code() {
        let result = NewWorkflow::validate(
            WorkflowType::Referral,
            Some(json!({ "campaign": "x" })),
            None,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(CoreError::InvalidRequest(_))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let big = "x".repeat(2048);
        let result = NewWorkflow::validate(
            WorkflowType::Promo,
            Some(json!({ "code": "SPRING", "blob": big })),
            None,
            None,
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let result = NewWorkflow::validate(
            WorkflowType::SharedMeal,
            Some(json!([1, 2, 3])),
            None,
            None,
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn campaign_tag_is_restricted() {
        let result = NewWorkflow::validate(
            WorkflowType::OnboardingResume,
            None,
            None,
            None,
            Some("spring sale!".to_string()),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn effective_status_is_lazy_and_monotonic() {
        let wf = referral(Some(1));
        let before = wf.expires_at - Duration::minutes(1);
        let after = wf.expires_at + Duration::seconds(1);
        assert_eq!(wf.effective_status(before), EffectiveStatus::Active);
        assert_eq!(wf.effective_status(wf.expires_at), EffectiveStatus::Active);
        assert_eq!(wf.effective_status(after), EffectiveStatus::Expired);
        assert_eq!(
            wf.effective_status(after + Duration::days(30)),
            EffectiveStatus::Expired
        );
        // Nothing about the document changed.
        assert_eq!(wf.status, PersistedStatus::Active);
    }

    #[test]
    fn completed_wins_over_expiry() {
        let mut wf = referral(Some(1));
        wf.status = PersistedStatus::Completed;
        let later = wf.expires_at + Duration::hours(5);
        assert_eq!(wf.effective_status(later), EffectiveStatus::Completed);
        assert_eq!(wf.completion(later).ok(), Some(Completion::AlreadyCompleted));
    }

    #[test]
    fn completion_of_expired_is_conflict() {
        let wf = referral(Some(1));
        let later = wf.expires_at + Duration::seconds(1);
        assert!(matches!(
            wf.completion(later),
            Err(CoreError::WorkflowExpired(_))
        ));
    }

    #[test]
    fn resolve_cap() {
        let mut wf = referral(None);
        assert!(!wf.resolve_limit_exceeded(100));
        wf.max_resolves = Some(2);
        assert!(!wf.resolve_limit_exceeded(1));
        assert!(wf.resolve_limit_exceeded(2));
    }
}
