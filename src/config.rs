//! Service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

/// Top-level service configuration.
///
/// Loaded once at startup via [`ServiceConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// PostgreSQL connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// Minimum idle connections in the pool.
    pub database_min_connections: u32,

    /// Timeout in seconds for acquiring a database connection.
    pub database_connect_timeout_secs: u64,

    /// Master switch for the PostgreSQL persistence layer.
    pub persistence_enabled: bool,

    /// Scheduling and dispatch tuning.
    pub scheduler: SchedulerConfig,

    /// Push transport endpoint. `None` selects the dry-run transport.
    pub push_endpoint: Option<String>,

    /// Optional bearer token for the push endpoint.
    pub push_access_token: Option<String>,

    /// Base URL deep links are built on (`{base}/wf/{id}`).
    pub workflow_link_base: String,

    /// Where the public landing route redirects to.
    pub workflow_landing_url: String,

    /// Per-request timeout applied by the HTTP layer.
    pub request_timeout_secs: u64,

    /// How far past ingestion time an event's `occurred_at` may lie.
    pub max_event_clock_skew_secs: u64,
}

/// Tuning for the periodic driver and the dispatcher.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the in-process driver loop runs.
    pub enabled: bool,

    /// Driver cadence; also the width of a window key.
    pub cadence_minutes: u32,

    /// Maximum number of due users pulled per tick.
    pub due_batch_limit: usize,

    /// Mounts `POST /internal/scheduler/tick` for external triggers.
    pub http_trigger: bool,

    /// Number of personalization lookups in flight at once.
    pub personalization_batch_size: usize,

    /// Number of push sends in flight at once.
    pub delivery_concurrency: usize,

    /// Upper bound for any single external call.
    pub external_call_timeout_secs: u64,
}

impl SchedulerConfig {
    /// Driver cadence as a [`Duration`].
    #[must_use]
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(u64::from(self.cadence_minutes) * 60)
    }

    /// External call timeout as a [`Duration`], never shorter than one
    /// second.
    #[must_use]
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence_minutes: 10,
            due_batch_limit: 500,
            http_trigger: false,
            personalization_batch_size: 25,
            delivery_concurrency: 16,
            external_call_timeout_secs: 10,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
            database_max_connections: 10,
            database_min_connections: 2,
            database_connect_timeout_secs: 5,
            persistence_enabled: true,
            scheduler: SchedulerConfig::default(),
            push_endpoint: None,
            push_access_token: None,
            workflow_link_base: "https://app.example.com".to_string(),
            workflow_landing_url: "https://app.example.com/install".to_string(),
            request_timeout_secs: 30,
            max_event_clock_skew_secs: 86_400,
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`], or if `SCHEDULER_CADENCE_MINUTES` does not divide
    /// an hour evenly.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()
            .context("LISTEN_ADDR is not a socket address")?;

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.is_empty());

        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            enabled: parse_env_bool("SCHEDULER_ENABLED", defaults.enabled),
            cadence_minutes: parse_env("SCHEDULER_CADENCE_MINUTES", defaults.cadence_minutes),
            due_batch_limit: parse_env("SCHEDULER_DUE_BATCH_LIMIT", defaults.due_batch_limit),
            http_trigger: parse_env_bool("SCHEDULER_HTTP_TRIGGER", defaults.http_trigger),
            personalization_batch_size: parse_env(
                "PERSONALIZATION_BATCH_SIZE",
                defaults.personalization_batch_size,
            )
            .max(1),
            delivery_concurrency: parse_env("DELIVERY_CONCURRENCY", defaults.delivery_concurrency)
                .max(1),
            external_call_timeout_secs: parse_env(
                "EXTERNAL_CALL_TIMEOUT_SECS",
                defaults.external_call_timeout_secs,
            )
            .max(1),
        };
        if scheduler.cadence_minutes == 0 || 60 % scheduler.cadence_minutes != 0 {
            anyhow::bail!(
                "SCHEDULER_CADENCE_MINUTES must divide 60, got {}",
                scheduler.cadence_minutes
            );
        }

        let workflow_link_base = std::env::var("WORKFLOW_LINK_BASE")
            .unwrap_or_else(|_| "https://app.example.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let workflow_landing_url = std::env::var("WORKFLOW_LANDING_URL")
            .unwrap_or_else(|_| format!("{workflow_link_base}/install"));

        Ok(Self {
            listen_addr,
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            database_min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2),
            database_connect_timeout_secs: parse_env("DATABASE_CONNECT_TIMEOUT_SECS", 5),
            persistence_enabled: parse_env_bool("PERSISTENCE_ENABLED", true),
            scheduler,
            push_endpoint: std::env::var("PUSH_ENDPOINT").ok().filter(|v| !v.is_empty()),
            push_access_token: std::env::var("PUSH_ACCESS_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            workflow_link_base,
            workflow_landing_url,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30),
            max_event_clock_skew_secs: parse_env("MAX_EVENT_CLOCK_SKEW_SECS", 86_400),
        })
    }

    /// Allowed clock skew for incoming events as a [`chrono::Duration`].
    #[must_use]
    pub fn max_event_clock_skew(&self) -> chrono::Duration {
        let secs = i64::try_from(self.max_event_clock_skew_secs).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
    }

    /// Returns the database URL when PostgreSQL persistence should be used.
    #[must_use]
    pub fn postgres_url(&self) -> Option<&str> {
        if self.persistence_enabled {
            self.database_url.as_deref()
        } else {
            None
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
