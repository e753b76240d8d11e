//! Service layer: business logic orchestration.
//!
//! [`LedgerService`] records events and derives user state,
//! [`ScheduleService`] maintains next-notification instants,
//! [`Dispatcher`] delivers due notifications, [`SchedulerDriver`] ties the
//! last two together on a fixed cadence, and [`WorkflowService`] manages
//! deferred-link tokens. Services hold only `Arc`s to stores and are cheap
//! to clone.

pub mod dispatch_service;
pub mod driver;
pub mod ledger_service;
pub mod schedule_service;
pub mod workflow_service;

pub use dispatch_service::{DispatchLimits, DispatchReport, Dispatcher};
pub use driver::{SchedulerDriver, TickReport};
pub use ledger_service::{LedgerService, TrackOutcome, TrackStatus};
pub use schedule_service::{PreferenceUpdate, ScheduleService};
pub use workflow_service::{CreatedWorkflow, ResolvedWorkflow, WorkflowService};
