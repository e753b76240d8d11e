//! Database row models and their mapping to domain types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use sqlx::types::Json;

use crate::domain::{
    DeliveryRecord, Device, Event, EventMetadata, NotificationId,
    NotificationPreference, NotificationType, UserState, Workflow, WorkflowId,
};
use crate::error::CoreError;

/// Parses a snake_case enum stored as `TEXT`.
fn parse_enum<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, CoreError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| CoreError::Persistence(format!("unexpected {column} value: {raw}")))
}

fn to_u64(column: &str, value: i64) -> Result<u64, CoreError> {
    u64::try_from(value).map_err(|_| CoreError::Persistence(format!("negative {column}: {value}")))
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A row of the `user_states` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserStateRow {
    /// User identity.
    pub user_id: String,
    /// Current streak.
    pub current_streak: i32,
    /// Local date of the latest logged measurement.
    pub last_log_date: Option<NaiveDate>,
    /// Logged measurement count.
    pub total_logs: i64,
    /// IANA timezone.
    pub timezone: Option<String>,
    /// Latest activity.
    pub last_active_at: Option<DateTime<Utc>>,
    /// Preferences as JSONB.
    pub preferences: Json<BTreeMap<NotificationType, NotificationPreference>>,
    /// Next due instant (indexed).
    pub next_notification_at: Option<DateTime<Utc>>,
    /// Types due at `next_notification_at` as JSONB.
    pub next_notification_types: Json<BTreeSet<NotificationType>>,
    /// Last processed window key.
    pub last_processed_window: Option<String>,
}

impl UserStateRow {
    /// Converts the row into domain state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] on out-of-range counters.
    pub fn into_domain(self) -> Result<UserState, CoreError> {
        Ok(UserState {
            user_id: self.user_id,
            current_streak: u32::try_from(self.current_streak).map_err(|_| {
                CoreError::Persistence(format!("invalid current_streak: {}", self.current_streak))
            })?,
            last_log_date: self.last_log_date,
            total_logs: to_u64("total_logs", self.total_logs)?,
            timezone: self.timezone,
            last_active_at: self.last_active_at,
            preferences: self.preferences.0,
            next_notification_at: self.next_notification_at,
            next_notification_types: self.next_notification_types.0,
            last_processed_window: self.last_processed_window,
        })
    }
}

/// A row of the `events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Idempotency key.
    pub event_id: String,
    /// Owning user.
    pub user_id: String,
    /// Event kind.
    pub kind: String,
    /// When the action happened.
    pub occurred_at: DateTime<Utc>,
    /// Local calendar date.
    pub local_date: NaiveDate,
    /// Ingestion instant.
    pub ingested_at: DateTime<Utc>,
    /// IANA timezone.
    pub timezone: String,
    /// Client session.
    pub session_id: String,
    /// Client platform.
    pub platform: String,
    /// Tagged metadata as JSONB.
    pub metadata: Json<EventMetadata>,
    /// Schema version.
    pub schema_version: i16,
}

impl EventRow {
    /// Converts the row into a domain event.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] on unknown enum values.
    pub fn into_domain(self) -> Result<Event, CoreError> {
        Ok(Event {
            event_id: self.event_id,
            user_id: self.user_id,
            kind: parse_enum("kind", &self.kind)?,
            occurred_at: self.occurred_at,
            local_date: self.local_date,
            ingested_at: self.ingested_at,
            timezone: self.timezone,
            session_id: self.session_id,
            platform: parse_enum("platform", &self.platform)?,
            metadata: self.metadata.0,
            schema_version: u16::try_from(self.schema_version).unwrap_or_default(),
        })
    }
}

/// A row of the `workflows` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowRow {
    /// Workflow id.
    pub id: String,
    /// Workflow type.
    pub workflow_type: String,
    /// `active` or `completed`.
    pub status: String,
    /// Payload as JSONB.
    pub payload: serde_json::Value,
    /// Creating user.
    pub owner_id: Option<String>,
    /// Campaign tag.
    pub campaign: Option<String>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Completion instant.
    pub completed_at: Option<DateTime<Utc>>,
    /// Landing-page hits.
    pub click_count: i64,
    /// API resolutions.
    pub resolve_count: i64,
    /// Latest resolution.
    pub last_resolved_at: Option<DateTime<Utc>>,
    /// Resolve cap.
    pub max_resolves: Option<i64>,
}

impl WorkflowRow {
    /// Converts the row into a domain workflow.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] on malformed stored values.
    pub fn into_domain(self) -> Result<Workflow, CoreError> {
        Ok(Workflow {
            id: WorkflowId::parse(&self.id)
                .map_err(|_| CoreError::Persistence(format!("malformed stored id {}", self.id)))?,
            workflow_type: parse_enum("workflow_type", &self.workflow_type)?,
            status: parse_enum("status", &self.status)?,
            payload: self.payload,
            owner_id: self.owner_id,
            campaign: self.campaign,
            created_at: self.created_at,
            expires_at: self.expires_at,
            completed_at: self.completed_at,
            click_count: to_u64("click_count", self.click_count)?,
            resolve_count: to_u64("resolve_count", self.resolve_count)?,
            last_resolved_at: self.last_resolved_at,
            max_resolves: self
                .max_resolves
                .map(|v| to_u64("max_resolves", v))
                .transpose()?,
        })
    }
}

/// A row of the `devices` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceRow {
    /// Device id.
    pub device_id: String,
    /// Owning user.
    pub user_id: String,
    /// Push token.
    pub push_token: String,
    /// Platform.
    pub platform: String,
}

impl DeviceRow {
    /// Converts the row into a domain device.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] on an unknown platform.
    pub fn into_domain(self) -> Result<Device, CoreError> {
        Ok(Device {
            device_id: self.device_id,
            user_id: self.user_id,
            push_token: self.push_token,
            platform: parse_enum("platform", &self.platform)?,
        })
    }
}

/// Flattened columns of a delivery record, ready to bind.
#[derive(Debug, Clone)]
pub struct DeliveryColumns<'a> {
    /// Notification id.
    pub notification_id: &'a NotificationId,
    /// Notification type wire name.
    pub notification_type: &'static str,
    /// Whether delivery succeeded.
    pub success: bool,
    /// Transport error.
    pub error: Option<&'a str>,
}

impl<'a> From<&'a DeliveryRecord> for DeliveryColumns<'a> {
    fn from(record: &'a DeliveryRecord) -> Self {
        Self {
            notification_id: &record.notification_id,
            notification_type: record.notification_type.as_str(),
            success: record.outcome.is_success(),
            error: record.outcome.error(),
        }
    }
}
