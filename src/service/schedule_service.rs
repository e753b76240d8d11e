//! Schedule service: preference updates and the per-tick schedule advance.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::local_time::parse_timezone;
use crate::domain::{
    LocalTime, NotificationPreference, NotificationType, UserState, compute_next_notification,
};
use crate::error::CoreError;
use crate::persistence::UserStore;

/// A single-type preference change requested by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceUpdate {
    /// Verified user identity.
    pub user_id: String,
    /// The preference to change.
    pub notification_type: NotificationType,
    /// Whether reminders of this type are wanted.
    pub enabled: bool,
    /// Local hour, 0-23. Must come with `minute`.
    pub hour: Option<u8>,
    /// Local minute on the ten-minute grid. Must come with `hour`.
    pub minute: Option<u8>,
    /// Timezone override.
    pub timezone: Option<String>,
}

/// Maintains each user's next-notification instant.
///
/// The stored `(next_notification_at, next_notification_types)` pair is
/// only ever written with the output of [`compute_next_notification`], so
/// it always reflects the user's current preferences and timezone.
#[derive(Debug, Clone)]
pub struct ScheduleService {
    users: Arc<dyn UserStore>,
}

impl ScheduleService {
    /// Creates a new `ScheduleService`.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Applies a preference change at the current time.
    ///
    /// # Errors
    ///
    /// See [`ScheduleService::update_preference_at`].
    pub async fn update_preference(&self, update: PreferenceUpdate) -> Result<UserState, CoreError> {
        self.update_preference_at(update, Utc::now()).await
    }

    /// Merges one preference and recomputes the user's whole schedule.
    ///
    /// An enabled preference without an explicit time keeps its stored
    /// time, or the type's default when it has none.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRequest`] when only one of hour and
    /// minute is given or either is out of range,
    /// [`CoreError::InvalidTimezone`] for an unknown timezone override, and
    /// [`CoreError::Persistence`] if the store fails.
    pub async fn update_preference_at(
        &self,
        update: PreferenceUpdate,
        now: DateTime<Utc>,
    ) -> Result<UserState, CoreError> {
        let explicit_time = match (update.hour, update.minute) {
            (Some(hour), Some(minute)) => Some(LocalTime::new(hour, minute)?),
            (None, None) => None,
            _ => {
                return Err(CoreError::InvalidRequest(
                    "hour and minute must be given together".to_string(),
                ));
            }
        };
        if let Some(tz) = update.timezone.as_deref() {
            parse_timezone(tz)?;
        }

        let mutate = |mut state: UserState| -> Result<Option<UserState>, CoreError> {
            let time = explicit_time
                .or_else(|| {
                    state
                        .preferences
                        .get(&update.notification_type)
                        .map(|p| p.time)
                })
                .unwrap_or_else(|| update.notification_type.default_time());
            state.preferences.insert(
                update.notification_type,
                NotificationPreference {
                    enabled: update.enabled,
                    time,
                },
            );
            if let Some(tz) = &update.timezone {
                state.timezone = Some(tz.clone());
            }
            let next = compute_next_notification(&state.preferences, state.tz(), now);
            state.set_schedule(next);
            Ok(Some(state))
        };

        let state = self
            .users
            .update_user(&update.user_id, &mutate)
            .await?
            .ok_or_else(|| CoreError::Internal("preference update was not applied".to_string()))?;
        tracing::info!(
            user_id = %update.user_id,
            notification_type = %update.notification_type,
            enabled = update.enabled,
            next_at = ?state.next_notification_at,
            "notification preference updated"
        );
        Ok(state)
    }

    /// Advances a due user's schedule past `window_key`.
    ///
    /// `snapshot` is the state the driver saw when it queried due users.
    /// Inside the transaction the advance only happens if the user is still
    /// due, has not been processed in this window, and still has the same
    /// pending instant and types as the snapshot. Returns the committed
    /// state, or `None` when any of those checks failed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the store fails.
    pub async fn advance(
        &self,
        snapshot: &UserState,
        window_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserState>, CoreError> {
        let mutate = |mut state: UserState| -> Result<Option<UserState>, CoreError> {
            let still_due = state.next_notification_at.is_some_and(|at| at <= now)
                && state.next_notification_at == snapshot.next_notification_at
                && state.next_notification_types == snapshot.next_notification_types;
            if !still_due || state.last_processed_window.as_deref() == Some(window_key) {
                return Ok(None);
            }
            let next = compute_next_notification(&state.preferences, state.tz(), now);
            state.set_schedule(next);
            state.last_processed_window = Some(window_key.to_string());
            Ok(Some(state))
        };

        let advanced = self.users.update_user(&snapshot.user_id, &mutate).await?;
        match &advanced {
            Some(state) => tracing::debug!(
                user_id = %state.user_id,
                window = window_key,
                next_at = ?state.next_notification_at,
                "schedule advanced"
            ),
            None => tracing::debug!(
                user_id = %snapshot.user_id,
                window = window_key,
                "schedule advance skipped"
            ),
        }
        Ok(advanced)
    }
}
