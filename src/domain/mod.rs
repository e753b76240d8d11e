//! Domain layer: ledger events, user state, schedules, and workflows.
//!
//! Everything in here is pure: no I/O, no clock reads except where a
//! fresh identifier is minted. Services pass `now` in explicitly so the
//! time-dependent rules (streaks, next occurrences, lazy expiry) stay
//! deterministic under test.

pub mod event;
pub mod local_time;
pub mod notification;
pub mod schedule;
pub mod templates;
pub mod user_state;
pub mod workflow;
pub mod workflow_id;

pub use event::{Event, EventKind, EventMetadata, Platform, TrackEvent};
pub use local_time::LocalTime;
pub use notification::{
    DeliveryOutcome, DeliveryRecord, Device, NotificationId, NotificationType, PushPayload,
};
pub use schedule::{NextNotification, compute_next_notification};
pub use templates::{Personalization, TemplateCatalog};
pub use user_state::{NotificationPreference, UserState};
pub use workflow::{EffectiveStatus, NewWorkflow, PersistedStatus, Workflow, WorkflowType};
pub use workflow_id::WorkflowId;
