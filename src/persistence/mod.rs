//! Persistence layer: the document store behind every component.
//!
//! Each trait method is one atomic unit. Read-modify-write operations take
//! a pure mutation closure and run it inside the store's transaction; a
//! store that retries on contention may call the closure more than once,
//! so closures must not have side effects.
//!
//! Two implementations exist: [`memory::MemoryStore`] for tests and
//! single-node development, and [`postgres::PostgresStore`] backed by
//! `sqlx::PgPool`.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DeliveryRecord, Device, Event, UserState, Workflow, WorkflowId};
use crate::error::CoreError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Derives new user state from the current one (or a fresh one).
pub type DeriveUser<'a> = &'a (dyn Fn(UserState) -> UserState + Send + Sync);

/// Mutates user state; `Ok(None)` commits nothing.
pub type MutateUser<'a> =
    &'a (dyn Fn(UserState) -> Result<Option<UserState>, CoreError> + Send + Sync);

/// Mutates a workflow; `Ok(None)` commits nothing.
pub type MutateWorkflow<'a> =
    &'a (dyn Fn(&Workflow) -> Result<Option<Workflow>, CoreError> + Send + Sync);

/// Result of an idempotent event append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The event was new; carries the committed user state.
    Created(UserState),
    /// The event id already existed; nothing was written.
    Duplicate,
}

/// Append-only event ledger and delivery log.
#[async_trait]
pub trait LedgerStore: Send + Sync + fmt::Debug {
    /// Atomically inserts `event` and applies `derive` to its user.
    ///
    /// If the event id already exists the transaction short-circuits with
    /// [`AppendOutcome::Duplicate`] and writes nothing. An absent user is
    /// presented to `derive` as [`UserState::new`].
    async fn append_event(
        &self,
        event: &Event,
        derive: DeriveUser<'_>,
    ) -> Result<AppendOutcome, CoreError>;

    /// Loads an event by id.
    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, CoreError>;

    /// Appends a delivery record. Returns `false` if a record with the
    /// same notification id already existed.
    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<bool, CoreError>;
}

/// Per-user behavioral state.
#[async_trait]
pub trait UserStore: Send + Sync + fmt::Debug {
    /// Loads a user's state.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserState>, CoreError>;

    /// Atomically reads, mutates, and writes one user.
    ///
    /// An absent user is presented as [`UserState::new`] and only created
    /// if `mutate` returns a new state. Returns the committed state, or
    /// `None` when `mutate` chose not to write.
    async fn update_user(
        &self,
        user_id: &str,
        mutate: MutateUser<'_>,
    ) -> Result<Option<UserState>, CoreError>;

    /// Users whose next notification instant is at or before `now`,
    /// earliest first, at most `limit` of them.
    async fn due_users(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserState>, CoreError>;
}

/// Deferred-link workflow documents.
#[async_trait]
pub trait WorkflowStore: Send + Sync + fmt::Debug {
    /// Inserts a new workflow.
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), CoreError>;

    /// Atomically increments the resolve counter and stamps the resolve
    /// instant. Returns the updated document, `None` if absent.
    async fn record_resolve(
        &self,
        id: &WorkflowId,
        now: DateTime<Utc>,
    ) -> Result<Option<Workflow>, CoreError>;

    /// Atomically increments the click counter. Returns the updated
    /// document, `None` if absent.
    async fn record_click(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError>;

    /// Atomically reads, mutates, and writes one workflow. Returns the
    /// document as committed (or unchanged when `mutate` wrote nothing),
    /// `None` if absent. `expires_at` is never written.
    async fn update_workflow(
        &self,
        id: &WorkflowId,
        mutate: MutateWorkflow<'_>,
    ) -> Result<Option<Workflow>, CoreError>;
}

/// Registered push devices, maintained outside this core.
#[async_trait]
pub trait DeviceDirectory: Send + Sync + fmt::Debug {
    /// Active devices of all the given users.
    async fn active_devices(&self, user_ids: &[String]) -> Result<Vec<Device>, CoreError>;
}

/// User profile data used for personalization.
#[async_trait]
pub trait ProfileDirectory: Send + Sync + fmt::Debug {
    /// The user's display name, if any.
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, CoreError>;
}
