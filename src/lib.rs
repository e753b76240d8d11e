//! # streak-core
//!
//! Transactional core of a consumer health app: an idempotent behavioral
//! event ledger with per-user streaks, a timezone-aware notification
//! scheduler, and expiring deferred-link workflows.
//!
//! Every state-changing operation is one atomic store transaction: the
//! ledger insert and the derived user-state update commit together, and
//! the scheduler advances a user's schedule before it dispatches, so
//! retries can under-deliver but never double-deliver.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)                Driver (interval or HTTP trigger)
//!     │                               │
//!     ├── REST Handlers (api/)        │
//!     │                               │
//!     ├── LedgerService ──────────────┼── ScheduleService (service/)
//!     ├── WorkflowService             └── Dispatcher ── PushTransport (transport/)
//!     │
//!     ├── Domain rules (domain/): streaks, schedules, templates, workflow status
//!     │
//!     └── Stores (persistence/): MemoryStore | PostgreSQL
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod transport;
