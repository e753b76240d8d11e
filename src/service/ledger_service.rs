//! Ledger service: idempotent event tracking and derived user state.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::domain::event::validate_client_token;
use crate::domain::local_time::{local_date, parse_timezone};
use crate::domain::user_state::advance_streak;
use crate::domain::{Event, TrackEvent, UserState, compute_next_notification};
use crate::error::CoreError;
use crate::persistence::{AppendOutcome, LedgerStore, UserStore};

/// Result of a tracking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// The event was recorded; carries the committed user state.
    Created(UserState),
    /// The event id was seen before; nothing changed.
    Duplicate,
}

/// Wire status of a tracking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// First submission.
    Created,
    /// Replay of an earlier submission.
    Duplicate,
}

impl TrackOutcome {
    /// Wire status.
    #[must_use]
    pub const fn status(&self) -> TrackStatus {
        match self {
            Self::Created(_) => TrackStatus::Created,
            Self::Duplicate => TrackStatus::Duplicate,
        }
    }
}

/// Appends behavioral events and maintains per-user derived state.
///
/// Each call to [`LedgerService::track`] is one store transaction that
/// inserts the event and folds it into the user's state, or does nothing
/// at all if the event id already exists.
#[derive(Debug, Clone)]
pub struct LedgerService {
    ledger: Arc<dyn LedgerStore>,
    users: Arc<dyn UserStore>,
    max_clock_skew: Duration,
}

/// Default tolerance for client clocks running ahead of the server.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::hours(24);

impl LedgerService {
    /// Creates a new `LedgerService`.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerStore>, users: Arc<dyn UserStore>) -> Self {
        Self {
            ledger,
            users,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
        }
    }

    /// Sets how far in the future an event may be dated relative to its
    /// ingestion time.
    #[must_use]
    pub const fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Returns the underlying ledger store.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Tracks an event, stamping it with the current time.
    ///
    /// # Errors
    ///
    /// See [`LedgerService::track_at`].
    pub async fn track(&self, cmd: TrackEvent) -> Result<TrackOutcome, CoreError> {
        self.track_at(cmd, Utc::now()).await
    }

    /// Tracks an event ingested at `now`.
    ///
    /// Input is validated before the transaction opens. Replaying an event
    /// id returns [`TrackOutcome::Duplicate`] without any write.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed event id, session id,
    /// user id, timezone or metadata. Returns [`CoreError::InvalidRequest`]
    /// when `occurred_at` lies further past `now` than the allowed clock
    /// skew, and [`CoreError::Persistence`] if the store fails.
    pub async fn track_at(
        &self,
        cmd: TrackEvent,
        now: DateTime<Utc>,
    ) -> Result<TrackOutcome, CoreError> {
        validate_client_token("event_id", &cmd.event_id)?;
        validate_client_token("session_id", &cmd.session_id)?;
        if cmd.user_id.trim().is_empty() {
            return Err(CoreError::InvalidRequest("user id is required".to_string()));
        }
        let tz = parse_timezone(&cmd.timezone)?;
        cmd.metadata.validate()?;
        let latest = now.checked_add_signed(self.max_clock_skew);
        if latest.is_some_and(|latest| cmd.occurred_at > latest) {
            return Err(CoreError::InvalidRequest(format!(
                "occurred_at {} is too far in the future",
                cmd.occurred_at.to_rfc3339()
            )));
        }

        let event = Event::from_command(&cmd, local_date(cmd.occurred_at, tz), now);
        let derive = |state: UserState| apply_event(state, &event, now);

        match self.ledger.append_event(&event, &derive).await? {
            AppendOutcome::Created(state) => {
                tracing::info!(
                    event_id = %event.event_id,
                    user_id = %event.user_id,
                    kind = %event.kind,
                    streak = state.current_streak,
                    "event recorded"
                );
                Ok(TrackOutcome::Created(state))
            }
            AppendOutcome::Duplicate => {
                tracing::debug!(
                    event_id = %event.event_id,
                    user_id = %event.user_id,
                    "duplicate event ignored"
                );
                Ok(TrackOutcome::Duplicate)
            }
        }
    }

    /// Tracks an event in the background. Failures are logged, never
    /// returned.
    pub fn track_detached(&self, cmd: TrackEvent) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let event_id = cmd.event_id.clone();
            let user_id = cmd.user_id.clone();
            if let Err(e) = service.track(cmd).await {
                tracing::warn!(%event_id, %user_id, error = %e, "detached tracking failed");
            }
        })
    }

    /// Current derived state of a user.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UserNotFound`] if the user has no state yet.
    pub async fn user_state(&self, user_id: &str) -> Result<UserState, CoreError> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or_else(|| CoreError::UserNotFound(user_id.to_string()))
    }
}

/// Folds one new event into the user's state.
///
/// Runs inside the store transaction and may be called more than once.
fn apply_event(mut state: UserState, event: &Event, now: DateTime<Utc>) -> UserState {
    if event.kind.counts_toward_streak() {
        state.total_logs = state.total_logs.saturating_add(1);
        let (streak, last_log_date, change) =
            advance_streak(state.current_streak, state.last_log_date, event.local_date);
        state.current_streak = streak;
        state.last_log_date = last_log_date;
        tracing::debug!(user_id = %state.user_id, ?change, streak, "streak evaluated");
    }

    let is_latest = state
        .last_active_at
        .is_none_or(|seen| event.occurred_at >= seen);
    if is_latest {
        state.last_active_at = Some(event.occurred_at);
        if state.timezone.as_deref() != Some(event.timezone.as_str()) {
            state.timezone = Some(event.timezone.clone());
            if state.has_enabled_preferences() {
                let next = compute_next_notification(&state.preferences, state.tz(), now);
                state.set_schedule(next);
            }
        }
    }
    state
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::event::{AppOpened, MeasurementLogged, MeasurementUnit};
    use crate::domain::{EventMetadata, LocalTime, NotificationPreference, NotificationType, Platform};
    use crate::persistence::MemoryStore;

    fn utc(s: &str) -> DateTime<Utc> {
        let Ok(dt) = DateTime::parse_from_rfc3339(s) else {
            panic!("bad timestamp {s}");
        };
        dt.with_timezone(&Utc)
    }

    fn service() -> (LedgerService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger: Arc<dyn LedgerStore> = Arc::clone(&store) as Arc<dyn LedgerStore>;
        let users: Arc<dyn UserStore> = Arc::clone(&store) as Arc<dyn UserStore>;
        (LedgerService::new(ledger, users), store)
    }

    fn measurement(event_id: &str, at: &str, tz: &str) -> TrackEvent {
        TrackEvent {
            event_id: event_id.to_string(),
            user_id: "u1".to_string(),
            occurred_at: utc(at),
            timezone: tz.to_string(),
            session_id: "s1".to_string(),
            platform: Platform::Ios,
            metadata: EventMetadata::MeasurementLogged(MeasurementLogged {
                value: 72.4,
                unit: MeasurementUnit::Kg,
                note: None,
            }),
        }
    }

    async fn streak_after(service: &LedgerService, cmd: TrackEvent) -> u32 {
        let now = cmd.occurred_at;
        match service.track_at(cmd, now).await {
            Ok(TrackOutcome::Created(state)) => state.current_streak,
            other => panic!("expected created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn consecutive_days_then_replay() {
        let (service, _) = service();
        let e1 = measurement("e1", "2026-03-02T08:00:00Z", "UTC");
        assert_eq!(streak_after(&service, e1.clone()).await, 1);
        let e2 = measurement("e2", "2026-03-03T08:00:00Z", "UTC");
        assert_eq!(streak_after(&service, e2).await, 2);

        let replay = service.track_at(e1, utc("2026-03-03T09:00:00Z")).await;
        assert!(matches!(replay, Ok(TrackOutcome::Duplicate)));

        let Ok(state) = service.user_state("u1").await else {
            panic!("state missing");
        };
        assert_eq!(state.current_streak, 2);
        assert_eq!(state.total_logs, 2);
    }

    #[tokio::test]
    async fn same_day_keeps_and_gap_resets() {
        let (service, _) = service();
        assert_eq!(
            streak_after(&service, measurement("a", "2026-03-02T08:00:00Z", "UTC")).await,
            1
        );
        assert_eq!(
            streak_after(&service, measurement("b", "2026-03-03T08:00:00Z", "UTC")).await,
            2
        );
        assert_eq!(
            streak_after(&service, measurement("c", "2026-03-03T21:00:00Z", "UTC")).await,
            2
        );
        assert_eq!(
            streak_after(&service, measurement("d", "2026-03-06T08:00:00Z", "UTC")).await,
            1
        );
    }

    #[tokio::test]
    async fn local_date_follows_event_timezone() {
        let (service, _) = service();
        // 23:30 UTC on the 2nd is already the 3rd in Madrid.
        assert_eq!(
            streak_after(&service, measurement("a", "2026-03-02T08:00:00Z", "Europe/Madrid")).await,
            1
        );
        assert_eq!(
            streak_after(&service, measurement("b", "2026-03-02T23:30:00Z", "Europe/Madrid")).await,
            2
        );
    }

    #[tokio::test]
    async fn out_of_order_counts_but_keeps_streak() {
        let (service, _) = service();
        let _ = streak_after(&service, measurement("a", "2026-03-05T08:00:00Z", "UTC")).await;
        let late = measurement("b", "2026-03-01T08:00:00Z", "UTC");
        let Ok(TrackOutcome::Created(state)) =
            service.track_at(late, utc("2026-03-05T09:00:00Z")).await
        else {
            panic!("expected created");
        };
        assert_eq!(state.current_streak, 1);
        assert_eq!(state.total_logs, 2);
        assert_eq!(state.last_log_date, chrono::NaiveDate::from_ymd_opt(2026, 3, 5));
        assert_eq!(state.last_active_at, Some(utc("2026-03-05T08:00:00Z")));
    }

    #[tokio::test]
    async fn far_future_event_is_rejected_and_streak_keeps_growing() {
        let (service, store) = service();
        let now = utc("2026-03-02T08:00:00Z");
        let future = measurement("future", "2031-01-01T08:00:00Z", "Asia/Tokyo");
        assert!(matches!(
            service.track_at(future, now).await,
            Err(CoreError::InvalidRequest(_))
        ));
        assert_eq!(store.event_count().await, 0);

        // A few hours ahead of the server clock is still accepted.
        let skewed = measurement("skewed", "2026-03-02T14:00:00Z", "Europe/Madrid");
        assert!(matches!(
            service.track_at(skewed, now).await,
            Ok(TrackOutcome::Created(_))
        ));
        for (id, at) in [("d2", "2026-03-03T09:00:00Z"), ("d3", "2026-03-04T09:00:00Z")] {
            let _ = streak_after(&service, measurement(id, at, "Europe/Madrid")).await;
        }
        let Ok(state) = service.user_state("u1").await else {
            panic!("state missing");
        };
        assert_eq!(state.current_streak, 3);
        assert_eq!(state.timezone.as_deref(), Some("Europe/Madrid"));
    }

    #[tokio::test]
    async fn clock_skew_is_configurable() {
        let (service, _) = service();
        let strict = service.with_max_clock_skew(Duration::minutes(5));
        let now = utc("2026-03-02T08:00:00Z");
        let ahead = measurement("e1", "2026-03-02T08:10:00Z", "UTC");
        assert!(matches!(
            strict.track_at(ahead, now).await,
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_same_day_events_both_count() {
        let (service, store) = service();
        let now = utc("2026-03-02T12:00:00Z");
        let (a, b) = tokio::join!(
            service.track_at(measurement("a", "2026-03-02T08:00:00Z", "UTC"), now),
            service.track_at(measurement("b", "2026-03-02T09:00:00Z", "UTC"), now),
        );
        assert!(matches!(a, Ok(TrackOutcome::Created(_))));
        assert!(matches!(b, Ok(TrackOutcome::Created(_))));
        assert_eq!(store.event_count().await, 2);

        let Ok(state) = service.user_state("u1").await else {
            panic!("state missing");
        };
        assert_eq!(state.total_logs, 2);
        assert_eq!(state.current_streak, 1);
        assert_eq!(state.last_active_at, Some(utc("2026-03-02T09:00:00Z")));
    }

    #[tokio::test]
    async fn concurrent_replays_of_one_event_record_once() {
        let (service, store) = service();
        let now = utc("2026-03-02T12:00:00Z");
        let cmd = measurement("same", "2026-03-02T08:00:00Z", "UTC");
        let (a, b) = tokio::join!(
            service.track_at(cmd.clone(), now),
            service.track_at(cmd, now),
        );
        let created = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(TrackOutcome::Created(_))))
            .count();
        let duplicates = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(TrackOutcome::Duplicate)))
            .count();
        assert_eq!((created, duplicates), (1, 1));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn streak_spans_spring_forward_day() {
        let (service, _) = service();
        // Madrid moves from UTC+1 to UTC+2 on 2026-03-29, a 23-hour day.
        let days = [
            ("sat", "2026-03-28T22:30:00Z", 1),
            ("sun", "2026-03-29T21:30:00Z", 2),
            ("mon", "2026-03-30T10:00:00Z", 3),
        ];
        for (id, at, expected) in days {
            assert_eq!(
                streak_after(&service, measurement(id, at, "Europe/Madrid")).await,
                expected,
                "after {id}"
            );
        }
        let Ok(state) = service.user_state("u1").await else {
            panic!("state missing");
        };
        assert_eq!(state.last_log_date, chrono::NaiveDate::from_ymd_opt(2026, 3, 30));
    }

    #[tokio::test]
    async fn non_measurement_kinds_touch_activity_only() {
        let (service, _) = service();
        let mut cmd = measurement("open-1", "2026-03-02T08:00:00Z", "Europe/Madrid");
        cmd.metadata = EventMetadata::AppOpened(AppOpened::default());
        let Ok(TrackOutcome::Created(state)) = service.track_at(cmd, utc("2026-03-02T08:00:01Z")).await
        else {
            panic!("expected created");
        };
        assert_eq!(state.current_streak, 0);
        assert_eq!(state.total_logs, 0);
        assert_eq!(state.timezone.as_deref(), Some("Europe/Madrid"));
        assert_eq!(state.last_active_at, Some(utc("2026-03-02T08:00:00Z")));
    }

    #[tokio::test]
    async fn timezone_change_recomputes_schedule() {
        let (service, store) = service();
        let Ok(time) = LocalTime::new(8, 0) else {
            panic!("valid time");
        };
        let _ = store
            .update_user("u1", &move |mut s| {
                s.timezone = Some("UTC".to_string());
                s.preferences.insert(
                    NotificationType::WeighInReminder,
                    NotificationPreference {
                        enabled: true,
                        time,
                    },
                );
                s.next_notification_at = Some(utc("2026-03-03T08:00:00Z"));
                Ok(Some(s))
            })
            .await;

        let cmd = measurement("e1", "2026-03-02T12:00:00Z", "America/New_York");
        let Ok(TrackOutcome::Created(state)) = service.track_at(cmd, utc("2026-03-02T12:00:00Z")).await
        else {
            panic!("expected created");
        };
        // 08:00 EST is 13:00 UTC.
        assert_eq!(state.next_notification_at, Some(utc("2026-03-02T13:00:00Z")));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let (service, store) = service();
        let bad_tz = measurement("e1", "2026-03-02T08:00:00Z", "Mars/Olympus");
        assert!(matches!(
            service.track(bad_tz).await,
            Err(CoreError::InvalidTimezone(_))
        ));
        let bad_id = measurement("has space", "2026-03-02T08:00:00Z", "UTC");
        assert!(matches!(
            service.track(bad_id).await,
            Err(CoreError::InvalidRequest(_))
        ));
        let mut bad_value = measurement("e2", "2026-03-02T08:00:00Z", "UTC");
        bad_value.metadata = EventMetadata::MeasurementLogged(MeasurementLogged {
            value: -1.0,
            unit: MeasurementUnit::Kg,
            note: None,
        });
        assert!(matches!(
            service.track(bad_value).await,
            Err(CoreError::InvalidEventMetadata { .. })
        ));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn detached_tracking_records_event() {
        let (service, store) = service();
        let handle = service.track_detached(measurement("e1", "2026-03-02T08:00:00Z", "UTC"));
        assert!(handle.await.is_ok());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (service, _) = service();
        assert!(matches!(
            service.user_state("nobody").await,
            Err(CoreError::UserNotFound(_))
        ));
    }
}
