//! Periodic scheduler driver.
//!
//! One tick floors the clock to its window, loads the users that are due,
//! advances every one of their schedules, and only then dispatches. A user
//! whose advance did not commit is never dispatched, so a crash or a
//! retried tick can only lose a notification, never send it twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::domain::UserState;
use crate::domain::local_time::window_key;
use crate::error::CoreError;
use crate::persistence::UserStore;
use crate::service::{Dispatcher, ScheduleService};

/// Counters for one driver tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct TickReport {
    /// Window key of the tick, e.g. `"2026-03-02T07:30"`.
    pub window_key: String,
    /// Users returned by the due query.
    pub due: usize,
    /// Users already processed in this window, changed concurrently, or
    /// whose advance failed.
    pub skipped: usize,
    /// Users whose schedule was advanced.
    pub advanced: usize,
    /// Push attempts.
    pub attempted: usize,
    /// Successful pushes.
    pub delivered: usize,
    /// Failed pushes.
    pub failed: usize,
}

/// Runs scheduler ticks, on a timer or on demand.
#[derive(Debug, Clone)]
pub struct SchedulerDriver {
    users: Arc<dyn UserStore>,
    schedule: ScheduleService,
    dispatcher: Dispatcher,
    cadence_minutes: u32,
    period: Duration,
    due_batch_limit: usize,
    call_timeout: Duration,
}

impl SchedulerDriver {
    /// Creates a new `SchedulerDriver`.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        schedule: ScheduleService,
        dispatcher: Dispatcher,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            users,
            schedule,
            dispatcher,
            cadence_minutes: config.cadence_minutes,
            period: config.cadence().max(Duration::from_secs(60)),
            due_batch_limit: config.due_batch_limit,
            call_timeout: config.external_call_timeout(),
        }
    }

    /// Runs one tick at the current time.
    ///
    /// # Errors
    ///
    /// See [`SchedulerDriver::run_tick_at`].
    pub async fn run_tick(&self) -> Result<TickReport, CoreError> {
        self.run_tick_at(Utc::now()).await
    }

    /// Runs one tick as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the due-user query fails and
    /// [`CoreError::Timeout`] if it does not answer within the external
    /// call timeout. Per-user advance failures (timeouts included) and
    /// delivery failures are counted, not returned.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, CoreError> {
        let key = window_key(now, self.cadence_minutes);
        let due = self
            .bounded(self.users.due_users(now, self.due_batch_limit))
            .await?;
        let mut report = TickReport {
            window_key: key.clone(),
            due: due.len(),
            ..TickReport::default()
        };

        let mut ready: Vec<UserState> = Vec::with_capacity(due.len());
        for user in due {
            if user.last_processed_window.as_deref() == Some(key.as_str()) {
                report.skipped += 1;
                continue;
            }
            match self.bounded(self.schedule.advance(&user, &key, now)).await {
                Ok(Some(_)) => ready.push(user),
                Ok(None) => report.skipped += 1,
                Err(e) if e.is_transient() => {
                    tracing::warn!(user_id = %user.user_id, window = %key, error = %e, "schedule advance failed");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(user_id = %user.user_id, window = %key, error = %e, "schedule advance rejected");
                    report.skipped += 1;
                }
            }
        }
        report.advanced = ready.len();

        let dispatched = self.dispatcher.dispatch(&ready, &key, now).await;
        report.attempted = dispatched.attempted;
        report.delivered = dispatched.delivered;
        report.failed = dispatched.failed;

        tracing::info!(
            window = %report.window_key,
            due = report.due,
            skipped = report.skipped,
            advanced = report.advanced,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "scheduler tick finished"
        );
        Ok(report)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "store call exceeded {}s",
                    self.call_timeout.as_secs()
                ))
            })?
    }

    /// Ticks every cadence until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(cadence_minutes = self.cadence_minutes, "scheduler driver started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_tick().await {
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduler driver stopped");
    }
}
