//! Mutable per-user state derived from the ledger and from preferences.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::local_time::{LocalTime, parse_timezone};
use super::notification::NotificationType;
use super::schedule::NextNotification;

/// Timezone assumed for users that never reported one.
pub const DEFAULT_TIMEZONE: Tz = Tz::UTC;

/// One notification type's preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationPreference {
    /// Whether the type is scheduled at all.
    pub enabled: bool,
    /// Local time of day the reminder fires at.
    #[serde(flatten)]
    pub time: LocalTime,
}

/// Behavioral state of one user, keyed by user id.
///
/// `next_notification_at`, when present, is the earliest next occurrence
/// over every enabled preference, and `next_notification_types` holds
/// exactly the types that occur at that instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    /// User identity.
    pub user_id: String,
    /// Consecutive local calendar days with a logged measurement.
    pub current_streak: u32,
    /// Local date of the latest logged measurement.
    pub last_log_date: Option<NaiveDate>,
    /// Number of logged measurements.
    pub total_logs: u64,
    /// Last reported IANA timezone.
    pub timezone: Option<String>,
    /// Instant of the latest event of any kind.
    pub last_active_at: Option<DateTime<Utc>>,
    /// Preferences by notification type.
    pub preferences: BTreeMap<NotificationType, NotificationPreference>,
    /// Next instant any reminder is due.
    pub next_notification_at: Option<DateTime<Utc>>,
    /// Types due at `next_notification_at`.
    pub next_notification_types: BTreeSet<NotificationType>,
    /// Window key of the last driver tick that advanced this user.
    pub last_processed_window: Option<String>,
}

impl UserState {
    /// Fresh state for a user seen for the first time.
    #[must_use]
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            current_streak: 0,
            last_log_date: None,
            total_logs: 0,
            timezone: None,
            last_active_at: None,
            preferences: BTreeMap::new(),
            next_notification_at: None,
            next_notification_types: BTreeSet::new(),
            last_processed_window: None,
        }
    }

    /// The user's timezone, falling back to [`DEFAULT_TIMEZONE`] when unset
    /// or unknown.
    #[must_use]
    pub fn tz(&self) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|name| parse_timezone(name).ok())
            .unwrap_or(DEFAULT_TIMEZONE)
    }

    /// Replaces the stored schedule.
    pub fn set_schedule(&mut self, next: NextNotification) {
        self.next_notification_at = next.at;
        self.next_notification_types = next.types;
    }

    /// Whether any preference is enabled.
    #[must_use]
    pub fn has_enabled_preferences(&self) -> bool {
        self.preferences.values().any(|p| p.enabled)
    }
}

/// How a logged measurement moved the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// First measurement ever.
    Started,
    /// Another measurement on the same local day.
    Unchanged,
    /// First measurement on the day after the previous one.
    Extended,
    /// First measurement after at least one skipped day.
    Reset,
    /// Measurement dated before the latest one; streak untouched.
    OutOfOrder,
}

/// Applies the streak rule for a measurement logged on `date`.
///
/// The gap is a plain calendar-date difference in the user's timezone, so
/// a DST transition never breaks or extends a streak by itself.
#[must_use]
pub fn advance_streak(
    current: u32,
    last_log_date: Option<NaiveDate>,
    date: NaiveDate,
) -> (u32, Option<NaiveDate>, StreakChange) {
    let Some(last) = last_log_date else {
        return (1, Some(date), StreakChange::Started);
    };
    match (date - last).num_days() {
        0 => (current, Some(last), StreakChange::Unchanged),
        1 => (current.saturating_add(1), Some(date), StreakChange::Extended),
        gap if gap > 1 => (1, Some(date), StreakChange::Reset),
        _ => (current, Some(last), StreakChange::OutOfOrder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap_or_default()
    }

    #[test]
    fn first_measurement_starts_streak() {
        assert_eq!(
            advance_streak(0, None, day(2)),
            (1, Some(day(2)), StreakChange::Started)
        );
    }

    #[test]
    fn same_day_keeps_streak() {
        assert_eq!(
            advance_streak(4, Some(day(2)), day(2)),
            (4, Some(day(2)), StreakChange::Unchanged)
        );
    }

    #[test]
    fn next_day_extends_streak() {
        assert_eq!(
            advance_streak(4, Some(day(2)), day(3)),
            (5, Some(day(3)), StreakChange::Extended)
        );
    }

    #[test]
    fn gap_resets_streak() {
        assert_eq!(
            advance_streak(9, Some(day(2)), day(5)),
            (1, Some(day(5)), StreakChange::Reset)
        );
    }

    #[test]
    fn earlier_date_leaves_streak_alone() {
        assert_eq!(
            advance_streak(3, Some(day(5)), day(4)),
            (3, Some(day(5)), StreakChange::OutOfOrder)
        );
    }

    #[test]
    fn extension_crosses_month_boundary() {
        let feb_28 = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap_or_default();
        assert_eq!(advance_streak(2, Some(feb_28), day(1)).0, 3);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let mut state = UserState::new("u1");
        state.timezone = Some("Nowhere/Special".to_string());
        assert_eq!(state.tz(), Tz::UTC);
        state.timezone = Some("Asia/Tokyo".to_string());
        assert_eq!(state.tz(), Tz::Asia__Tokyo);
    }

    #[test]
    fn preferences_serialize_with_flat_time() {
        let pref = NotificationPreference {
            enabled: true,
            time: LocalTime { hour: 7, minute: 30 },
        };
        let json = serde_json::to_value(pref).unwrap_or_default();
        assert_eq!(json, serde_json::json!({ "enabled": true, "hour": 7, "minute": 30 }));
    }
}
