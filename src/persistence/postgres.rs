//! PostgreSQL implementation of the persistence layer.
//!
//! Every trait method runs as one SQL transaction. Idempotent inserts use
//! `ON CONFLICT DO NOTHING`; read-modify-write paths lock the row with
//! `SELECT ... FOR UPDATE`. Serialization failures and deadlocks are
//! retried transparently, so callers never see contention.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::models::{DeliveryColumns, DeviceRow, EventRow, UserStateRow, WorkflowRow, to_i64};
use super::{
    AppendOutcome, DeriveUser, DeviceDirectory, LedgerStore, MutateUser, MutateWorkflow,
    ProfileDirectory, UserStore, WorkflowStore,
};
use crate::domain::{DeliveryRecord, Device, Event, UserState, Workflow, WorkflowId};
use crate::error::CoreError;

/// Attempts per transaction before contention is reported as an error.
const MAX_TX_ATTEMPTS: u32 = 5;

const USER_COLUMNS: &str = "user_id, current_streak, last_log_date, total_logs, timezone, \
     last_active_at, preferences, next_notification_at, next_notification_types, \
     last_processed_window";

const WORKFLOW_COLUMNS: &str = "id, workflow_type, status, payload, owner_id, campaign, \
     created_at, expires_at, completed_at, click_count, resolve_count, last_resolved_at, \
     max_resolves";

/// Failure inside a transaction body.
#[derive(Debug)]
enum TxError {
    Db(sqlx::Error),
    Abort(CoreError),
}

impl From<sqlx::Error> for TxError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

impl From<CoreError> for TxError {
    fn from(err: CoreError) -> Self {
        Self::Abort(err)
    }
}

/// SQLSTATE codes for serialization failure and deadlock.
fn is_retryable_code(code: Option<&str>) -> bool {
    matches!(code, Some("40001" | "40P01"))
}

fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => is_retryable_code(db.code().as_deref()),
        _ => false,
    }
}

/// Runs `body` until it succeeds, fails permanently, or runs out of attempts.
async fn with_retry<T, F, Fut>(op: &'static str, mut body: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TxError>>,
{
    let mut attempt = 1;
    loop {
        match body().await {
            Ok(value) => return Ok(value),
            Err(TxError::Db(e)) if attempt < MAX_TX_ATTEMPTS && is_retryable(&e) => {
                tracing::debug!(op, attempt, error = %e, "transaction conflict, retrying");
                attempt += 1;
            }
            Err(TxError::Db(e)) => return Err(e.into()),
            Err(TxError::Abort(e)) => return Err(e),
        }
    }
}

/// PostgreSQL-backed document store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool with the given limits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the database is unreachable.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))
    }

    async fn try_append_event(
        &self,
        event: &Event,
        derive: DeriveUser<'_>,
    ) -> Result<AppendOutcome, TxError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO events (event_id, user_id, kind, occurred_at, local_date, ingested_at, \
             timezone, session_id, platform, metadata, schema_version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(&event.event_id)
        .bind(&event.user_id)
        .bind(event.kind.as_str())
        .bind(event.occurred_at)
        .bind(event.local_date)
        .bind(event.ingested_at)
        .bind(&event.timezone)
        .bind(&event.session_id)
        .bind(event.platform.as_str())
        .bind(Json(&event.metadata))
        .bind(i16::try_from(event.schema_version).unwrap_or(i16::MAX))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(AppendOutcome::Duplicate);
        }

        let current = lock_user(&mut tx, &event.user_id).await?;
        let next = derive(current);
        write_user(&mut tx, &next).await?;
        tx.commit().await?;
        Ok(AppendOutcome::Created(next))
    }

    async fn try_update_user(
        &self,
        user_id: &str,
        mutate: MutateUser<'_>,
    ) -> Result<Option<UserState>, TxError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_user(&mut tx, user_id).await?;
        let Some(next) = mutate(current)? else {
            // Also discards the placeholder row of a user seen for the first time.
            tx.rollback().await?;
            return Ok(None);
        };
        write_user(&mut tx, &next).await?;
        tx.commit().await?;
        Ok(Some(next))
    }

    async fn try_update_workflow(
        &self,
        id: &WorkflowId,
        mutate: MutateWorkflow<'_>,
    ) -> Result<Option<Workflow>, TxError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let current = row.into_domain()?;
        let Some(next) = mutate(&current)? else {
            tx.rollback().await?;
            return Ok(Some(current));
        };

        sqlx::query(
            "UPDATE workflows SET status = $2, completed_at = $3, click_count = $4, \
             resolve_count = $5, last_resolved_at = $6 WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(next.status.as_str())
        .bind(next.completed_at)
        .bind(to_i64(next.click_count))
        .bind(to_i64(next.resolve_count))
        .bind(next.last_resolved_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(Workflow {
            expires_at: current.expires_at,
            ..next
        }))
    }
}

/// Locks the user's row, creating a blank one first if needed.
async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> Result<UserState, TxError> {
    sqlx::query("INSERT INTO user_states (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    let row = sqlx::query_as::<_, UserStateRow>(&format!(
        "SELECT {USER_COLUMNS} FROM user_states WHERE user_id = $1 FOR UPDATE"
    ))
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.into_domain()?)
}

async fn write_user(tx: &mut Transaction<'_, Postgres>, state: &UserState) -> Result<(), TxError> {
    sqlx::query(
        "UPDATE user_states SET current_streak = $2, last_log_date = $3, total_logs = $4, \
         timezone = $5, last_active_at = $6, preferences = $7, next_notification_at = $8, \
         next_notification_types = $9, last_processed_window = $10, updated_at = now() \
         WHERE user_id = $1",
    )
    .bind(&state.user_id)
    .bind(i32::try_from(state.current_streak).unwrap_or(i32::MAX))
    .bind(state.last_log_date)
    .bind(to_i64(state.total_logs))
    .bind(&state.timezone)
    .bind(state.last_active_at)
    .bind(Json(&state.preferences))
    .bind(state.next_notification_at)
    .bind(Json(&state.next_notification_types))
    .bind(&state.last_processed_window)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn append_event(
        &self,
        event: &Event,
        derive: DeriveUser<'_>,
    ) -> Result<AppendOutcome, CoreError> {
        with_retry("append_event", move || self.try_append_event(event, derive)).await
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, CoreError> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT event_id, user_id, kind, occurred_at, local_date, ingested_at, timezone, \
             session_id, platform, metadata, schema_version FROM events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(EventRow::into_domain).transpose()
    }

    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<bool, CoreError> {
        let columns = DeliveryColumns::from(record);
        let inserted = sqlx::query(
            "INSERT INTO notification_deliveries (notification_id, device_id, user_id, \
             notification_type, title, body, deep_link, success, error, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (notification_id) DO NOTHING",
        )
        .bind(columns.notification_id.as_str())
        .bind(&record.device_id)
        .bind(&record.user_id)
        .bind(columns.notification_type)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.deep_link)
        .bind(columns.success)
        .bind(columns.error)
        .bind(record.sent_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserState>, CoreError> {
        let row = sqlx::query_as::<_, UserStateRow>(&format!(
            "SELECT {USER_COLUMNS} FROM user_states WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserStateRow::into_domain).transpose()
    }

    async fn update_user(
        &self,
        user_id: &str,
        mutate: MutateUser<'_>,
    ) -> Result<Option<UserState>, CoreError> {
        with_retry("update_user", move || self.try_update_user(user_id, mutate)).await
    }

    async fn due_users(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserState>, CoreError> {
        let rows = sqlx::query_as::<_, UserStateRow>(&format!(
            "SELECT {USER_COLUMNS} FROM user_states \
             WHERE next_notification_at <= $1 \
             ORDER BY next_notification_at ASC LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserStateRow::into_domain).collect()
    }
}

#[async_trait]
impl WorkflowStore for PostgresStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO workflows (id, workflow_type, status, payload, owner_id, campaign, \
             created_at, expires_at, completed_at, click_count, resolve_count, \
             last_resolved_at, max_resolves) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(workflow.id.as_str())
        .bind(workflow.workflow_type.as_str())
        .bind(workflow.status.as_str())
        .bind(&workflow.payload)
        .bind(&workflow.owner_id)
        .bind(&workflow.campaign)
        .bind(workflow.created_at)
        .bind(workflow.expires_at)
        .bind(workflow.completed_at)
        .bind(to_i64(workflow.click_count))
        .bind(to_i64(workflow.resolve_count))
        .bind(workflow.last_resolved_at)
        .bind(workflow.max_resolves.map(to_i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_resolve(
        &self,
        id: &WorkflowId,
        now: DateTime<Utc>,
    ) -> Result<Option<Workflow>, CoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "UPDATE workflows SET resolve_count = resolve_count + 1, last_resolved_at = $2 \
             WHERE id = $1 RETURNING {WORKFLOW_COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkflowRow::into_domain).transpose()
    }

    async fn record_click(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "UPDATE workflows SET click_count = click_count + 1 \
             WHERE id = $1 RETURNING {WORKFLOW_COLUMNS}"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkflowRow::into_domain).transpose()
    }

    async fn update_workflow(
        &self,
        id: &WorkflowId,
        mutate: MutateWorkflow<'_>,
    ) -> Result<Option<Workflow>, CoreError> {
        with_retry("update_workflow", move || self.try_update_workflow(id, mutate)).await
    }
}

#[async_trait]
impl DeviceDirectory for PostgresStore {
    async fn active_devices(&self, user_ids: &[String]) -> Result<Vec<Device>, CoreError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT device_id, user_id, push_token, platform FROM devices \
             WHERE active AND user_id = ANY($1) ORDER BY device_id",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DeviceRow::into_domain).collect()
    }
}

#[async_trait]
impl ProfileDirectory for PostgresStore {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, CoreError> {
        let name = sqlx::query_scalar::<_, Option<String>>(
            "SELECT display_name FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(name.flatten())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::sync::atomic::{AtomicU32, Ordering};

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("sqlstate {code}")]
    struct SqlState {
        code: &'static str,
    }

    impl DatabaseError for SqlState {
        fn message(&self) -> &str {
            self.code
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn db_error(code: &'static str) -> TxError {
        TxError::Db(sqlx::Error::Database(Box::new(SqlState { code })))
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(is_retryable_code(Some("40001")));
        assert!(is_retryable_code(Some("40P01")));
        assert!(!is_retryable_code(Some("23505")));
        assert!(!is_retryable_code(None));
        assert!(!is_retryable(&sqlx::Error::RowNotFound));
        assert!(is_retryable(&sqlx::Error::Database(Box::new(SqlState { code: "40001" }))));
    }

    #[tokio::test]
    async fn conflicts_are_retried_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 { Err(db_error("40001")) } else { Ok(n) }
            }
        })
        .await;
        assert!(matches!(result, Ok(3)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_deadlock_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), CoreError> = with_retry("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(db_error("40P01")) }
        })
        .await;
        assert!(matches!(result, Err(CoreError::Persistence(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_TX_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), CoreError> = with_retry("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(db_error("23505")) }
        })
        .await;
        assert!(matches!(result, Err(CoreError::Persistence(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        attempts.store(0, Ordering::SeqCst);
        let aborted: Result<(), CoreError> = with_retry("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TxError::Abort(CoreError::ResolveLimitReached("wf".to_string()))) }
        })
        .await;
        assert!(matches!(aborted, Err(CoreError::ResolveLimitReached(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
