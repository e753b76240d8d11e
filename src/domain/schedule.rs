//! Next-notification computation.
//!
//! A user's schedule is a single UTC instant plus the set of types due at
//! it. Reminders at the same local clock time collapse into one scheduling
//! event carrying several types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use super::local_time::next_occurrence;
use super::notification::NotificationType;
use super::user_state::NotificationPreference;

/// The earliest upcoming reminder instant and the types due at it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NextNotification {
    /// Earliest instant, `None` when nothing is enabled.
    pub at: Option<DateTime<Utc>>,
    /// Types whose next occurrence equals `at`.
    pub types: BTreeSet<NotificationType>,
}

impl NextNotification {
    /// Schedule with nothing due.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// Computes the next reminder across every enabled preference.
///
/// Each enabled preference is converted to its next UTC occurrence after
/// `now`; the result is the minimum of those instants together with every
/// type that ties for it.
#[must_use]
pub fn compute_next_notification(
    preferences: &BTreeMap<NotificationType, NotificationPreference>,
    tz: Tz,
    now: DateTime<Utc>,
) -> NextNotification {
    let mut next = NextNotification::none();
    for (notification_type, pref) in preferences.iter().filter(|(_, p)| p.enabled) {
        let Some(at) = next_occurrence(pref.time, tz, now) else {
            tracing::warn!(%notification_type, %tz, "no next occurrence for preference");
            continue;
        };
        match next.at {
            Some(current) if at > current => {}
            Some(current) if at == current => {
                next.types.insert(*notification_type);
            }
            _ => {
                next.at = Some(at);
                next.types = BTreeSet::from([*notification_type]);
            }
        }
    }
    next
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::local_time::{LocalTime, parse_timezone};

    fn utc(s: &str) -> DateTime<Utc> {
        let Ok(dt) = DateTime::parse_from_rfc3339(s) else {
            panic!("bad timestamp {s}");
        };
        dt.with_timezone(&Utc)
    }

    fn pref(enabled: bool, hour: u8, minute: u8) -> NotificationPreference {
        NotificationPreference {
            enabled,
            time: LocalTime { hour, minute },
        }
    }

    fn madrid() -> Tz {
        let Ok(tz) = parse_timezone("Europe/Madrid") else {
            panic!("tz");
        };
        tz
    }

    #[test]
    fn nothing_enabled_means_no_instant() {
        let prefs = BTreeMap::from([
            (NotificationType::WeighInReminder, pref(false, 8, 0)),
            (NotificationType::MealReminder, pref(false, 12, 30)),
        ]);
        let next = compute_next_notification(&prefs, madrid(), utc("2026-03-02T06:00:00Z"));
        assert_eq!(next, NextNotification::none());
    }

    #[test]
    fn picks_minimum_over_distinct_times() {
        let prefs = BTreeMap::from([
            (NotificationType::WeighInReminder, pref(true, 8, 0)),
            (NotificationType::MealReminder, pref(true, 12, 30)),
            (NotificationType::StreakSaver, pref(true, 20, 0)),
        ]);
        let next = compute_next_notification(&prefs, madrid(), utc("2026-03-02T09:00:00Z"));
        // 08:00 local has passed (09:00Z is 10:00 in Madrid), 12:30 local is next.
        assert_eq!(next.at, Some(utc("2026-03-02T11:30:00Z")));
        assert_eq!(next.types, BTreeSet::from([NotificationType::MealReminder]));
    }

    #[test]
    fn ties_are_combined() {
        let prefs = BTreeMap::from([
            (NotificationType::WeighInReminder, pref(true, 8, 0)),
            (NotificationType::MealReminder, pref(true, 8, 0)),
            (NotificationType::StreakSaver, pref(true, 20, 0)),
        ]);
        let next = compute_next_notification(&prefs, madrid(), utc("2026-03-02T05:00:00Z"));
        assert_eq!(next.at, Some(utc("2026-03-02T07:00:00Z")));
        assert_eq!(
            next.types,
            BTreeSet::from([
                NotificationType::WeighInReminder,
                NotificationType::MealReminder
            ])
        );
    }

    #[test]
    fn disabled_preferences_are_ignored() {
        let prefs = BTreeMap::from([
            (NotificationType::WeighInReminder, pref(false, 7, 0)),
            (NotificationType::StreakSaver, pref(true, 20, 0)),
        ]);
        let next = compute_next_notification(&prefs, madrid(), utc("2026-03-02T05:00:00Z"));
        assert_eq!(next.at, Some(utc("2026-03-02T19:00:00Z")));
        assert_eq!(next.types, BTreeSet::from([NotificationType::StreakSaver]));
    }

    #[test]
    fn recompute_at_due_instant_moves_same_time_types_to_tomorrow() {
        let prefs = BTreeMap::from([(NotificationType::WeighInReminder, pref(true, 8, 0))]);
        let next = compute_next_notification(&prefs, madrid(), utc("2026-03-02T07:00:00Z"));
        assert_eq!(next.at, Some(utc("2026-03-03T07:00:00Z")));
    }
}
