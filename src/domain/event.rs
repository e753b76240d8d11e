//! Behavioral events: the immutable rows of the ledger.
//!
//! Every event carries a client-supplied idempotency key ([`Event::event_id`])
//! and a kind-specific metadata payload. Metadata is a tagged union,
//! [`EventMetadata`], with one variant per [`EventKind`]; raw JSON is
//! decoded into the variant of the declared kind and validated before any
//! transaction is opened.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::notification::NotificationType;
use super::workflow_id::WorkflowId;
use crate::error::CoreError;

/// Current metadata schema version stamped on every stored event.
pub const EVENT_SCHEMA_VERSION: u16 = 1;

/// Maximum length of an event id or session id.
pub const MAX_EVENT_ID_LEN: usize = 128;

/// Closed set of event kinds accepted by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The app was brought to the foreground.
    AppOpened,
    /// The user logged a body measurement. Drives the streak.
    MeasurementLogged,
    /// A meal photo was recognized and its nutrition recorded.
    MealScanned,
    /// A push notification delivery attempt finished.
    NotificationDelivered,
    /// The user opened a push notification.
    NotificationOpened,
    /// A deferred-link workflow was completed on the device.
    WorkflowCompleted,
}

impl EventKind {
    /// Wire name of the kind (`"measurement_logged"`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppOpened => "app_opened",
            Self::MeasurementLogged => "measurement_logged",
            Self::MealScanned => "meal_scanned",
            Self::NotificationDelivered => "notification_delivered",
            Self::NotificationOpened => "notification_opened",
            Self::WorkflowCompleted => "workflow_completed",
        }
    }

    /// Whether events of this kind advance the streak and the log count.
    #[must_use]
    pub const fn counts_toward_streak(self) -> bool {
        matches!(self, Self::MeasurementLogged)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| CoreError::InvalidRequest(format!("unknown event kind: {s}")))
    }
}

/// Client platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Apple iOS.
    Ios,
    /// Google Android.
    Android,
}

impl Platform {
    /// Wire name of the platform.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            other => Err(CoreError::InvalidRequest(format!("unknown platform: {other}"))),
        }
    }
}

/// Unit of a logged measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementUnit {
    /// Kilograms.
    Kg,
    /// Pounds.
    Lb,
}

/// Metadata of [`EventKind::AppOpened`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppOpened {
    /// What brought the user in (`"push"`, `"widget"`, ...).
    #[serde(default)]
    pub source: Option<String>,
}

/// Metadata of [`EventKind::MeasurementLogged`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeasurementLogged {
    /// Measured value.
    pub value: f64,
    /// Unit of `value`.
    pub unit: MeasurementUnit,
    /// Free-text note.
    #[serde(default)]
    pub note: Option<String>,
}

/// Metadata of [`EventKind::MealScanned`].
///
/// This is the final structured result of the food-recognition pipeline,
/// recorded as-is together with the credits the scan consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MealScanned {
    /// Estimated energy in kcal.
    pub calories: u32,
    /// Protein in grams.
    pub protein_g: f64,
    /// Carbohydrates in grams.
    pub carbs_g: f64,
    /// Fat in grams.
    pub fat_g: f64,
    /// Credits deducted for the scan.
    #[serde(default)]
    pub credits_used: u32,
    /// Recognizer confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Metadata of [`EventKind::NotificationDelivered`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationDelivered {
    /// Deterministic notification id.
    pub notification_id: String,
    /// Notification type that was sent.
    pub notification_type: NotificationType,
    /// Device the payload was addressed to.
    pub device_id: String,
    /// Whether the transport accepted the payload.
    pub success: bool,
    /// Transport error, when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

/// Metadata of [`EventKind::NotificationOpened`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationOpened {
    /// Deterministic notification id.
    pub notification_id: String,
    /// Notification type that was opened.
    pub notification_type: NotificationType,
}

/// Metadata of [`EventKind::WorkflowCompleted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowCompleted {
    /// Completed workflow.
    pub workflow_id: String,
}

/// Kind-specific metadata, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventMetadata {
    /// See [`AppOpened`].
    AppOpened(AppOpened),
    /// See [`MeasurementLogged`].
    MeasurementLogged(MeasurementLogged),
    /// See [`MealScanned`].
    MealScanned(MealScanned),
    /// See [`NotificationDelivered`].
    NotificationDelivered(NotificationDelivered),
    /// See [`NotificationOpened`].
    NotificationOpened(NotificationOpened),
    /// See [`WorkflowCompleted`].
    WorkflowCompleted(WorkflowCompleted),
}

impl EventMetadata {
    /// Decodes raw JSON as the metadata of `kind` and validates it.
    ///
    /// A JSON `null` is treated as an empty object so kinds without
    /// required fields may omit metadata entirely.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidEventMetadata`] when the JSON does not
    /// match the kind's schema or violates its bounds.
    pub fn parse(kind: EventKind, raw: serde_json::Value) -> Result<Self, CoreError> {
        let metadata = match kind {
            EventKind::AppOpened => Self::AppOpened(decode(kind, raw)?),
            EventKind::MeasurementLogged => Self::MeasurementLogged(decode(kind, raw)?),
            EventKind::MealScanned => Self::MealScanned(decode(kind, raw)?),
            EventKind::NotificationDelivered => Self::NotificationDelivered(decode(kind, raw)?),
            EventKind::NotificationOpened => Self::NotificationOpened(decode(kind, raw)?),
            EventKind::WorkflowCompleted => Self::WorkflowCompleted(decode(kind, raw)?),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// The kind this metadata belongs to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::AppOpened(_) => EventKind::AppOpened,
            Self::MeasurementLogged(_) => EventKind::MeasurementLogged,
            Self::MealScanned(_) => EventKind::MealScanned,
            Self::NotificationDelivered(_) => EventKind::NotificationDelivered,
            Self::NotificationOpened(_) => EventKind::NotificationOpened,
            Self::WorkflowCompleted(_) => EventKind::WorkflowCompleted,
        }
    }

    /// Checks the value bounds of the payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidEventMetadata`] naming the offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        let kind = self.kind();
        match self {
            Self::AppOpened(m) => {
                check_optional_len(kind, "source", m.source.as_deref(), 64)?;
            }
            Self::MeasurementLogged(m) => {
                if !m.value.is_finite() || m.value <= 0.0 || m.value > 1000.0 {
                    return Err(invalid(kind, "value must be in (0, 1000]"));
                }
                check_optional_len(kind, "note", m.note.as_deref(), 280)?;
            }
            Self::MealScanned(m) => {
                if m.calories > 10_000 {
                    return Err(invalid(kind, "calories must be at most 10000"));
                }
                for (field, grams) in [
                    ("protein_g", m.protein_g),
                    ("carbs_g", m.carbs_g),
                    ("fat_g", m.fat_g),
                ] {
                    if !grams.is_finite() || grams < 0.0 || grams > 2_000.0 {
                        return Err(invalid(kind, &format!("{field} must be in [0, 2000]")));
                    }
                }
                if m.credits_used > 100 {
                    return Err(invalid(kind, "credits_used must be at most 100"));
                }
                if let Some(c) = m.confidence
                    && !(0.0..=1.0).contains(&c)
                {
                    return Err(invalid(kind, "confidence must be in [0, 1]"));
                }
            }
            Self::NotificationDelivered(m) => {
                check_required_len(kind, "notification_id", &m.notification_id, 128)?;
                check_required_len(kind, "device_id", &m.device_id, 256)?;
                check_optional_len(kind, "error", m.error.as_deref(), 1024)?;
            }
            Self::NotificationOpened(m) => {
                check_required_len(kind, "notification_id", &m.notification_id, 128)?;
            }
            Self::WorkflowCompleted(m) => {
                if WorkflowId::parse(&m.workflow_id).is_err() {
                    return Err(invalid(kind, "workflow_id is malformed"));
                }
            }
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(kind: EventKind, raw: serde_json::Value) -> Result<T, CoreError> {
    let raw = if raw.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        raw
    };
    serde_json::from_value(raw).map_err(|e| invalid(kind, &e.to_string()))
}

fn invalid(kind: EventKind, reason: &str) -> CoreError {
    CoreError::InvalidEventMetadata {
        kind: kind.to_string(),
        reason: reason.to_string(),
    }
}

fn check_required_len(
    kind: EventKind,
    field: &str,
    value: &str,
    max: usize,
) -> Result<(), CoreError> {
    if value.is_empty() || value.chars().count() > max {
        return Err(invalid(kind, &format!("{field} must be 1..={max} chars")));
    }
    Ok(())
}

fn check_optional_len(
    kind: EventKind,
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Result<(), CoreError> {
    match value {
        Some(v) => check_required_len(kind, field, v, max),
        None => Ok(()),
    }
}

/// Validates a client-generated idempotency key or session id.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRequest`] when the token is empty, too long,
/// or contains characters outside `[A-Za-z0-9_.:-]`.
pub fn validate_client_token(field: &str, token: &str) -> Result<(), CoreError> {
    let well_formed = !token.is_empty()
        && token.len() <= MAX_EVENT_ID_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if well_formed {
        Ok(())
    } else {
        Err(CoreError::InvalidRequest(format!(
            "{field} must be 1..={MAX_EVENT_ID_LEN} chars of [A-Za-z0-9_.:-]"
        )))
    }
}

/// A tracking command as handed over by the request layer.
#[derive(Debug, Clone)]
pub struct TrackEvent {
    /// Client-generated idempotency key.
    pub event_id: String,
    /// Verified user identity.
    pub user_id: String,
    /// When the action happened.
    pub occurred_at: DateTime<Utc>,
    /// IANA timezone the client was in.
    pub timezone: String,
    /// Client session.
    pub session_id: String,
    /// Client platform.
    pub platform: Platform,
    /// Validated kind-specific payload; determines the event kind.
    pub metadata: EventMetadata,
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Client-supplied idempotency key.
    pub event_id: String,
    /// Owning user.
    pub user_id: String,
    /// Event kind.
    pub kind: EventKind,
    /// When the action happened.
    pub occurred_at: DateTime<Utc>,
    /// Calendar date of `occurred_at` in `timezone`.
    pub local_date: NaiveDate,
    /// When the server accepted the event.
    pub ingested_at: DateTime<Utc>,
    /// IANA timezone string.
    pub timezone: String,
    /// Client session.
    pub session_id: String,
    /// Client platform.
    pub platform: Platform,
    /// Kind-specific payload.
    pub metadata: EventMetadata,
    /// Metadata schema version.
    pub schema_version: u16,
}

impl Event {
    /// Builds the ledger row for a command.
    #[must_use]
    pub fn from_command(cmd: &TrackEvent, local_date: NaiveDate, ingested_at: DateTime<Utc>) -> Self {
        Self {
            event_id: cmd.event_id.clone(),
            user_id: cmd.user_id.clone(),
            kind: cmd.metadata.kind(),
            occurred_at: cmd.occurred_at,
            local_date,
            ingested_at,
            timezone: cmd.timezone.clone(),
            session_id: cmd.session_id.clone(),
            platform: cmd.platform,
            metadata: cmd.metadata.clone(),
            schema_version: EVENT_SCHEMA_VERSION,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn measurement_metadata_parses() {
        let parsed = EventMetadata::parse(
            EventKind::MeasurementLogged,
            json!({ "value": 81.4, "unit": "kg" }),
        );
        let Ok(EventMetadata::MeasurementLogged(m)) = parsed else {
            panic!("expected measurement metadata, got {parsed:?}");
        };
        assert_eq!(m.unit, MeasurementUnit::Kg);
        assert!(m.note.is_none());
    }

    #[test]
    fn metadata_of_another_kind_is_rejected() {
        let parsed = EventMetadata::parse(
            EventKind::MeasurementLogged,
            json!({ "calories": 500, "protein_g": 1.0, "carbs_g": 1.0, "fat_g": 1.0 }),
        );
        assert!(matches!(
            parsed,
            Err(CoreError::InvalidEventMetadata { .. })
        ));
    }

    #[test]
    fn out_of_range_measurement_is_rejected() {
        for value in [0.0, -3.0, 1000.5] {
            let parsed = EventMetadata::parse(
                EventKind::MeasurementLogged,
                json!({ "value": value, "unit": "lb" }),
            );
            assert!(parsed.is_err(), "value {value} should be rejected");
        }
    }

    #[test]
    fn meal_confidence_is_bounded() {
        let parsed = EventMetadata::parse(
            EventKind::MealScanned,
            json!({
                "calories": 640, "protein_g": 32.0, "carbs_g": 70.5, "fat_g": 21.0,
                "credits_used": 1, "confidence": 1.4
            }),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn null_metadata_is_an_empty_object() {
        let parsed = EventMetadata::parse(EventKind::AppOpened, serde_json::Value::Null);
        assert_eq!(
            parsed.ok(),
            Some(EventMetadata::AppOpened(AppOpened::default()))
        );
    }

    #[test]
    fn workflow_completed_requires_well_formed_id() {
        let parsed = EventMetadata::parse(
            EventKind::WorkflowCompleted,
            json!({ "workflow_id": "not-a-workflow" }),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn client_tokens_are_restricted() {
        assert!(validate_client_token("event_id", "evt_01:a.b-c").is_ok());
        assert!(validate_client_token("event_id", "").is_err());
        assert!(validate_client_token("event_id", "has space").is_err());
        assert!(validate_client_token("event_id", &"x".repeat(129)).is_err());
    }

    #[test]
    fn kind_round_trips_through_str() {
        let kind: Result<EventKind, _> = "meal_scanned".parse();
        assert_eq!(kind.ok(), Some(EventKind::MealScanned));
        assert_eq!(EventKind::MealScanned.to_string(), "meal_scanned");
        assert!("weight_logged".parse::<EventKind>().is_err());
    }
}
