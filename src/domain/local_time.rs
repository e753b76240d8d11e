//! Wall-clock arithmetic in the user's IANA timezone.
//!
//! Calendar dates for streaks and next-occurrence instants for reminders
//! are both computed here, so every component agrees on what "today" means
//! for a user.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CoreError;

/// Minutes a reminder may be scheduled at.
pub const MINUTE_GRID: [u8; 6] = [0, 10, 20, 30, 40, 50];

/// Parses an IANA timezone name (`"Europe/Madrid"`).
///
/// # Errors
///
/// Returns [`CoreError::InvalidTimezone`] for unknown zone names.
pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::InvalidTimezone(name.chars().take(64).collect()))
}

/// Calendar date of `instant` as seen in `tz`.
#[must_use]
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// A local hour/minute pair on the ten-minute grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct LocalTime {
    /// Hour of day, 0-23.
    pub hour: u8,
    /// Minute, one of [`MINUTE_GRID`].
    pub minute: u8,
}

impl LocalTime {
    /// Builds a validated local time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRequest`] if `hour > 23` or `minute` is
    /// not on the grid.
    pub fn new(hour: u8, minute: u8) -> Result<Self, CoreError> {
        if hour > 23 {
            return Err(CoreError::InvalidRequest(format!(
                "hour must be 0-23, got {hour}"
            )));
        }
        if !MINUTE_GRID.contains(&minute) {
            return Err(CoreError::InvalidRequest(format!(
                "minute must be one of {MINUTE_GRID:?}, got {minute}"
            )));
        }
        Ok(Self { hour, minute })
    }

    fn as_naive(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
    }
}

/// Maps a local wall-clock reading to a UTC instant.
///
/// An ambiguous reading (clocks fall back) resolves to the earlier instant.
/// A reading inside a spring-forward gap is shifted forward by an hour,
/// which lands just past the gap for every hour-long transition.
#[must_use]
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Next UTC instant strictly after `now` at which `time` is read on a
/// clock in `tz`: today if it has not passed yet, otherwise tomorrow.
#[must_use]
pub fn next_occurrence(time: LocalTime, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let clock = time.as_naive()?;
    let mut date = local_date(now, tz);
    // Three days covers a local date that lands in a gap twice in a row.
    for _ in 0..3 {
        if let Some(candidate) = resolve_local(tz, date.and_time(clock))
            && candidate > now
        {
            return Some(candidate);
        }
        date = date.succ_opt()?;
    }
    None
}

/// Floors `now` to the start of its scheduling window.
#[must_use]
pub fn window_start(now: DateTime<Utc>, cadence_minutes: u32) -> DateTime<Utc> {
    let cadence = cadence_minutes.clamp(1, 60);
    let minute = now.minute() - now.minute() % cadence;
    now.with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Key of the scheduling window containing `now`, e.g. `"2026-03-02T07:30"`.
#[must_use]
pub fn window_key(now: DateTime<Utc>, cadence_minutes: u32) -> String {
    window_start(now, cadence_minutes)
        .format("%Y-%m-%dT%H:%M")
        .to_string()
}

/// Coarse part of day used in notification copy.
#[must_use]
pub const fn time_of_day(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=21 => "evening",
        _ => "night",
    }
}
