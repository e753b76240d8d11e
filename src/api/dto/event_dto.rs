//! DTOs for event tracking, user state, and notification preferences.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{EventKind, EventMetadata, NotificationType, Platform, TrackEvent, UserState};
use crate::error::CoreError;
use crate::service::TrackStatus;

/// Request body for `POST /api/v1/events`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TrackEventRequest {
    /// Client-generated idempotency key.
    pub event_id: String,
    /// Event kind.
    pub kind: EventKind,
    /// When the action happened (RFC 3339).
    pub occurred_at: DateTime<Utc>,
    /// IANA timezone of the device.
    pub timezone: String,
    /// Client session id.
    pub session_id: String,
    /// Client platform.
    pub platform: Platform,
    /// Kind-specific metadata object.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

impl TrackEventRequest {
    /// Validates the metadata against the kind and builds the command.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidEventMetadata`] when the metadata does
    /// not match the kind's schema.
    pub fn into_command(self, user_id: String) -> Result<TrackEvent, CoreError> {
        let metadata = EventMetadata::parse(self.kind, self.metadata)?;
        Ok(TrackEvent {
            event_id: self.event_id,
            user_id,
            occurred_at: self.occurred_at,
            timezone: self.timezone,
            session_id: self.session_id,
            platform: self.platform,
            metadata,
        })
    }
}

/// Response body for `POST /api/v1/events`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackEventResponse {
    /// `created` or `duplicate`.
    pub status: TrackStatus,
    /// Echo of the submitted event id.
    pub event_id: String,
}

/// Request body for `PUT /api/v1/notifications/preferences`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdatePreferenceRequest {
    /// Notification type to change.
    pub notification_type: NotificationType,
    /// Whether reminders of this type are wanted.
    pub enabled: bool,
    /// Local hour, 0-23. Requires `minute`.
    #[serde(default)]
    pub hour: Option<u8>,
    /// Local minute, one of 0, 10, 20, 30, 40, 50. Requires `hour`.
    #[serde(default)]
    pub minute: Option<u8>,
    /// IANA timezone override.
    #[serde(default)]
    pub timezone: Option<String>,
}

/// One notification preference.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PreferenceDto {
    /// Notification type.
    pub notification_type: NotificationType,
    /// Whether enabled.
    pub enabled: bool,
    /// Local hour.
    pub hour: u8,
    /// Local minute.
    pub minute: u8,
}

/// Streak summary and notification schedule of the caller.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserStateResponse {
    /// User id.
    pub user_id: String,
    /// Consecutive local days with a logged measurement.
    pub current_streak: u32,
    /// Local date of the latest logged measurement.
    pub last_log_date: Option<NaiveDate>,
    /// Logged measurements overall.
    pub total_logs: u64,
    /// IANA timezone.
    pub timezone: Option<String>,
    /// Latest activity.
    pub last_active_at: Option<DateTime<Utc>>,
    /// Notification preferences.
    pub preferences: Vec<PreferenceDto>,
    /// Next reminder instant, if any.
    pub next_notification_at: Option<DateTime<Utc>>,
    /// Types due at `next_notification_at`.
    pub next_notification_types: Vec<NotificationType>,
}

impl From<UserState> for UserStateResponse {
    fn from(state: UserState) -> Self {
        Self {
            preferences: state
                .preferences
                .iter()
                .map(|(notification_type, pref)| PreferenceDto {
                    notification_type: *notification_type,
                    enabled: pref.enabled,
                    hour: pref.time.hour,
                    minute: pref.time.minute,
                })
                .collect(),
            next_notification_types: state.next_notification_types.into_iter().collect(),
            user_id: state.user_id,
            current_streak: state.current_streak,
            last_log_date: state.last_log_date,
            total_logs: state.total_logs,
            timezone: state.timezone,
            last_active_at: state.last_active_at,
            next_notification_at: state.next_notification_at,
        }
    }
}
