//! Notification types, push payloads, and delivery records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::event::Platform;
use super::local_time::LocalTime;
use crate::error::CoreError;

/// Namespace for deterministic notification ids.
const NOTIFICATION_ID_NAMESPACE: uuid::Uuid =
    uuid::Uuid::from_u128(0x5d1c_8a7e_33b4_4f0e_9a62_7c1e_0b9d_4e21);

/// Closed set of scheduled notification types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Daily nudge to log a measurement.
    WeighInReminder,
    /// Nudge to scan a meal.
    MealReminder,
    /// Evening warning that today's streak is not secured yet.
    StreakSaver,
}

impl NotificationType {
    /// Every type, in declaration order.
    pub const ALL: [Self; 3] = [Self::WeighInReminder, Self::MealReminder, Self::StreakSaver];

    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WeighInReminder => "weigh_in_reminder",
            Self::MealReminder => "meal_reminder",
            Self::StreakSaver => "streak_saver",
        }
    }

    /// Local time used when the type is enabled without an explicit time.
    #[must_use]
    pub const fn default_time(self) -> LocalTime {
        match self {
            Self::WeighInReminder => LocalTime { hour: 8, minute: 0 },
            Self::MealReminder => LocalTime {
                hour: 12,
                minute: 30,
            },
            Self::StreakSaver => LocalTime {
                hour: 20,
                minute: 0,
            },
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::InvalidRequest(format!("unknown notification type: {s}")))
    }
}

/// Deterministic id of one (type, user, window, device) delivery.
///
/// Two dispatch attempts for the same window and device derive the same
/// id, so their delivery records collide instead of duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    /// Derives the id from its four components.
    #[must_use]
    pub fn derive(
        notification_type: NotificationType,
        user_id: &str,
        window_key: &str,
        device_id: &str,
    ) -> Self {
        let name = format!(
            "{}|{user_id}|{window_key}|{device_id}",
            notification_type.as_str()
        );
        Self(
            uuid::Uuid::new_v5(&NOTIFICATION_ID_NAMESPACE, name.as_bytes())
                .simple()
                .to_string(),
        )
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered push target owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device id.
    pub device_id: String,
    /// Owning user.
    pub user_id: String,
    /// Transport-specific push token.
    pub push_token: String,
    /// Device platform.
    pub platform: Platform,
}

/// One message handed to the push transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    /// Deterministic notification id.
    pub notification_id: NotificationId,
    /// Notification type.
    pub notification_type: NotificationType,
    /// Recipient user.
    pub user_id: String,
    /// Recipient device.
    pub device_id: String,
    /// Transport push token.
    pub push_token: String,
    /// Rendered title.
    pub title: String,
    /// Rendered body.
    pub body: String,
    /// In-app deep link opened on tap.
    pub deep_link: Option<String>,
}

/// Result of one transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The transport accepted the payload.
    Delivered,
    /// The transport rejected the payload or the call failed.
    Failed {
        /// Error reported by the transport.
        error: String,
    },
}

impl DeliveryOutcome {
    /// Whether the attempt succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Error text of a failed attempt.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Delivered => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// Append-only log entry for a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Deterministic notification id (primary key).
    pub notification_id: NotificationId,
    /// Target device.
    pub device_id: String,
    /// Target user.
    pub user_id: String,
    /// Notification type.
    pub notification_type: NotificationType,
    /// Rendered title.
    pub title: String,
    /// Rendered body.
    pub body: String,
    /// In-app deep link.
    pub deep_link: Option<String>,
    /// Transport outcome.
    pub outcome: DeliveryOutcome,
    /// When the attempt finished.
    pub sent_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Builds the record for a finished attempt.
    #[must_use]
    pub fn new(payload: &PushPayload, outcome: DeliveryOutcome, sent_at: DateTime<Utc>) -> Self {
        Self {
            notification_id: payload.notification_id.clone(),
            device_id: payload.device_id.clone(),
            user_id: payload.user_id.clone(),
            notification_type: payload.notification_type,
            title: payload.title.clone(),
            body: payload.body.clone(),
            deep_link: payload.deep_link.clone(),
            outcome,
            sent_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_id_is_reproducible() {
        let a = NotificationId::derive(
            NotificationType::WeighInReminder,
            "u1",
            "2026-03-02T07:30",
            "d1",
        );
        let b = NotificationId::derive(
            NotificationType::WeighInReminder,
            "u1",
            "2026-03-02T07:30",
            "d1",
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn notification_id_varies_with_each_component() {
        let base = NotificationId::derive(NotificationType::MealReminder, "u1", "w1", "d1");
        for other in [
            NotificationId::derive(NotificationType::StreakSaver, "u1", "w1", "d1"),
            NotificationId::derive(NotificationType::MealReminder, "u2", "w1", "d1"),
            NotificationId::derive(NotificationType::MealReminder, "u1", "w2", "d1"),
            NotificationId::derive(NotificationType::MealReminder, "u1", "w1", "d2"),
        ] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn type_parses_from_wire_name() {
        assert_eq!(
            "streak_saver".parse::<NotificationType>().ok(),
            Some(NotificationType::StreakSaver)
        );
        assert!("daily_digest".parse::<NotificationType>().is_err());
    }

    #[test]
    fn default_times_are_on_the_grid() {
        for t in NotificationType::ALL {
            let time = t.default_time();
            assert!(LocalTime::new(time.hour, time.minute).is_ok());
        }
    }
}
