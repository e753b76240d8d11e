//! Notification dispatcher: device fan-out, personalization, and delivery.
//!
//! A dispatch never fails as a whole. Device and profile lookups that fail
//! degrade to "no devices" and the fallback name; each payload is sent
//! independently and every attempt, good or bad, is written to the
//! delivery log and tracked as a `notification_delivered` event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream;

use crate::config::SchedulerConfig;
use crate::domain::event::NotificationDelivered;
use crate::domain::templates::RenderContext;
use crate::domain::{
    DeliveryOutcome, DeliveryRecord, Device, EventMetadata, NotificationId, Personalization,
    Platform, PushPayload, TemplateCatalog, TrackEvent, UserState,
};
use crate::error::CoreError;
use crate::persistence::{DeviceDirectory, ProfileDirectory};
use crate::service::LedgerService;
use crate::transport::PushTransport;

/// Session id stamped on events the dispatcher emits.
const DISPATCH_SESSION: &str = "scheduler";

/// Limits applied to one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    /// Profiles looked up concurrently.
    pub personalization_batch_size: usize,
    /// Pushes in flight at once.
    pub delivery_concurrency: usize,
    /// Bound on every external call.
    pub call_timeout: Duration,
}

impl From<&SchedulerConfig> for DispatchLimits {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            personalization_batch_size: config.personalization_batch_size,
            delivery_concurrency: config.delivery_concurrency,
            call_timeout: config.external_call_timeout(),
        }
    }
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// Aggregate result of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Payloads handed to the transport.
    pub attempted: usize,
    /// Payloads the transport accepted.
    pub delivered: usize,
    /// Payloads that failed or timed out.
    pub failed: usize,
    /// One record per attempt.
    pub records: Vec<DeliveryRecord>,
}

#[derive(Debug)]
struct Attempt {
    payload: PushPayload,
    platform: Platform,
    timezone: String,
}

/// Fans due users out to their devices and sends rendered notifications.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    devices: Arc<dyn DeviceDirectory>,
    profiles: Arc<dyn ProfileDirectory>,
    transport: Arc<dyn PushTransport>,
    templates: Arc<TemplateCatalog>,
    ledger: LedgerService,
    limits: DispatchLimits,
}

impl Dispatcher {
    /// Creates a new `Dispatcher`.
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceDirectory>,
        profiles: Arc<dyn ProfileDirectory>,
        transport: Arc<dyn PushTransport>,
        templates: Arc<TemplateCatalog>,
        ledger: LedgerService,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            devices,
            profiles,
            transport,
            templates,
            ledger,
            limits,
        }
    }

    /// Sends every type due for every user in `users` to all their
    /// devices. `users` carry the types due before their schedule was
    /// advanced.
    pub async fn dispatch(
        &self,
        users: &[UserState],
        window_key: &str,
        now: DateTime<Utc>,
    ) -> DispatchReport {
        if users.is_empty() {
            return DispatchReport::default();
        }
        let user_ids: Vec<String> = users.iter().map(|u| u.user_id.clone()).collect();

        let devices = match self.bounded(self.devices.active_devices(&user_ids)).await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(window = window_key, error = %e, "device lookup failed, skipping dispatch");
                return DispatchReport::default();
            }
        };
        let mut by_user: HashMap<&str, Vec<&Device>> = HashMap::new();
        for device in &devices {
            by_user.entry(device.user_id.as_str()).or_default().push(device);
        }

        let reachable: Vec<&UserState> = users
            .iter()
            .filter(|u| by_user.contains_key(u.user_id.as_str()))
            .collect();
        let names = self.personalize(&reachable).await;

        let mut attempts = Vec::new();
        for user in reachable {
            let personalization = names
                .get(user.user_id.as_str())
                .cloned()
                .unwrap_or_else(Personalization::fallback);
            let tz = user.tz();
            let ctx = RenderContext::new(&personalization, tz, now);
            let user_devices = by_user.get(user.user_id.as_str()).map_or(&[][..], Vec::as_slice);

            for notification_type in &user.next_notification_types {
                let Some(rendered) = self.templates.render(*notification_type, &ctx) else {
                    tracing::warn!(%notification_type, "no template, skipping");
                    continue;
                };
                for device in user_devices {
                    attempts.push(Attempt {
                        payload: PushPayload {
                            notification_id: NotificationId::derive(
                                *notification_type,
                                &user.user_id,
                                window_key,
                                &device.device_id,
                            ),
                            notification_type: *notification_type,
                            user_id: user.user_id.clone(),
                            device_id: device.device_id.clone(),
                            push_token: device.push_token.clone(),
                            title: rendered.title.clone(),
                            body: rendered.body.clone(),
                            deep_link: rendered.deep_link.clone(),
                        },
                        platform: device.platform,
                        timezone: tz.name().to_string(),
                    });
                }
            }
        }

        let records: Vec<DeliveryRecord> = stream::iter(attempts)
            .map(|attempt| self.deliver(attempt))
            .buffer_unordered(self.limits.delivery_concurrency.max(1))
            .collect()
            .await;

        let delivered = records.iter().filter(|r| r.outcome.is_success()).count();
        DispatchReport {
            attempted: records.len(),
            delivered,
            failed: records.len() - delivered,
            records,
        }
    }

    /// Resolves display names in bounded batches.
    async fn personalize<'a>(&self, users: &[&'a UserState]) -> HashMap<&'a str, Personalization> {
        let mut names = HashMap::with_capacity(users.len());
        for batch in users.chunks(self.limits.personalization_batch_size.max(1)) {
            let lookups = batch.iter().copied().map(|user: &'a UserState| async move {
                let lookup = self.bounded(self.profiles.display_name(&user.user_id)).await;
                (user.user_id.as_str(), Personalization::from_lookup(lookup))
            });
            names.extend(join_all(lookups).await);
        }
        names
    }

    async fn deliver(&self, attempt: Attempt) -> DeliveryRecord {
        let Attempt {
            payload,
            platform,
            timezone,
        } = attempt;

        let outcome = match self.bounded(self.transport.send(&payload)).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(
                        notification_id = %payload.notification_id,
                        user_id = %payload.user_id,
                        device_id = %payload.device_id,
                        error = %e,
                        "push delivery failed"
                    );
                } else {
                    tracing::error!(
                        notification_id = %payload.notification_id,
                        user_id = %payload.user_id,
                        device_id = %payload.device_id,
                        error = %e,
                        "push delivery rejected"
                    );
                }
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        let record = DeliveryRecord::new(&payload, outcome, Utc::now());

        match self.bounded(self.ledger.ledger().record_delivery(&record)).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                notification_id = %record.notification_id,
                "delivery already recorded for this window"
            ),
            Err(e) if e.is_transient() => tracing::warn!(
                notification_id = %record.notification_id,
                error = %e,
                "failed to record delivery"
            ),
            Err(e) => tracing::error!(
                notification_id = %record.notification_id,
                error = %e,
                "delivery record rejected"
            ),
        }
        self.ledger.track_detached(delivery_event(&record, platform, timezone));
        record
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        tokio::time::timeout(self.limits.call_timeout, call)
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "external call exceeded {}s",
                    self.limits.call_timeout.as_secs()
                ))
            })?
    }
}

/// The ledger event describing one delivery attempt.
fn delivery_event(record: &DeliveryRecord, platform: Platform, timezone: String) -> TrackEvent {
    TrackEvent {
        event_id: format!("delivery_{}", record.notification_id),
        user_id: record.user_id.clone(),
        occurred_at: record.sent_at,
        timezone,
        session_id: DISPATCH_SESSION.to_string(),
        platform,
        metadata: EventMetadata::NotificationDelivered(NotificationDelivered {
            notification_id: record.notification_id.to_string(),
            notification_type: record.notification_type,
            device_id: record.device_id.clone(),
            success: record.outcome.is_success(),
            error: record.outcome.error().map(|e| e.chars().take(1024).collect()),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{Event, EventKind, NotificationType};
    use crate::persistence::{AppendOutcome, DeriveUser, LedgerStore, MemoryStore, UserStore};

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<PushPayload>>,
        failing_device: Option<String>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<PushPayload> {
            self.sent.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send(&self, payload: &PushPayload) -> Result<(), CoreError> {
            if self.failing_device.as_deref() == Some(payload.device_id.as_str()) {
                return Err(CoreError::Transport("DeviceNotRegistered".to_string()));
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(payload.clone());
            }
            Ok(())
        }
    }

    /// Ledger whose delivery log never answers.
    #[derive(Debug)]
    struct StalledDeliveryLog(Arc<MemoryStore>);

    #[async_trait]
    impl LedgerStore for StalledDeliveryLog {
        async fn append_event(
            &self,
            event: &Event,
            derive: DeriveUser<'_>,
        ) -> Result<AppendOutcome, CoreError> {
            self.0.append_event(event, derive).await
        }

        async fn get_event(&self, event_id: &str) -> Result<Option<Event>, CoreError> {
            self.0.get_event(event_id).await
        }

        async fn record_delivery(&self, _record: &DeliveryRecord) -> Result<bool, CoreError> {
            std::future::pending().await
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        let Ok(dt) = DateTime::parse_from_rfc3339(s) else {
            panic!("bad timestamp {s}");
        };
        dt.with_timezone(&Utc)
    }

    fn due_user(user_id: &str, types: &[NotificationType]) -> UserState {
        let mut state = UserState::new(user_id);
        state.timezone = Some("Europe/Madrid".to_string());
        state.preferences = BTreeMap::new();
        state.next_notification_types = types.iter().copied().collect::<BTreeSet<_>>();
        state
    }

    async fn device(store: &MemoryStore, device_id: &str, user_id: &str) {
        store
            .upsert_device(Device {
                device_id: device_id.to_string(),
                user_id: user_id.to_string(),
                push_token: format!("ExponentPushToken[{device_id}]"),
                platform: Platform::Android,
            })
            .await;
    }

    fn dispatcher(store: &Arc<MemoryStore>, transport: &Arc<RecordingTransport>) -> Dispatcher {
        let ledger = LedgerService::new(
            Arc::clone(store) as Arc<dyn LedgerStore>,
            Arc::clone(store) as Arc<dyn UserStore>,
        );
        Dispatcher::new(
            Arc::clone(store) as Arc<dyn DeviceDirectory>,
            Arc::clone(store) as Arc<dyn ProfileDirectory>,
            Arc::clone(transport) as Arc<dyn PushTransport>,
            Arc::new(TemplateCatalog::standard()),
            ledger,
            DispatchLimits {
                personalization_batch_size: 1,
                ..DispatchLimits::default()
            },
        )
    }

    #[tokio::test]
    async fn fans_out_per_type_and_device() {
        let store = Arc::new(MemoryStore::new());
        device(&store, "d1", "u1").await;
        device(&store, "d2", "u1").await;
        device(&store, "d3", "u2").await;
        store.set_display_name("u1", "Ana").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(&store, &transport);

        let users = [
            due_user(
                "u1",
                &[NotificationType::WeighInReminder, NotificationType::StreakSaver],
            ),
            due_user("u2", &[NotificationType::MealReminder]),
            due_user("u3", &[NotificationType::MealReminder]),
        ];
        let report = dispatcher
            .dispatch(&users, "2026-03-02T07:00", utc("2026-03-02T07:00:00Z"))
            .await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 5);
        assert_eq!(report.failed, 0);
        assert_eq!(store.delivery_records().await.len(), 5);

        let sent = transport.sent();
        let greeting = sent
            .iter()
            .find(|p| p.device_id == "d1" && p.notification_type == NotificationType::WeighInReminder);
        let Some(greeting) = greeting else {
            panic!("missing weigh-in push for d1");
        };
        // 07:00 UTC is 08:00 in Madrid.
        assert_eq!(greeting.title, "Good morning, Ana");

        let Some(fallback) = sent.iter().find(|p| p.user_id == "u2") else {
            panic!("missing push for u2");
        };
        assert_eq!(fallback.title, "What's on your plate, there?");
    }

    #[tokio::test]
    async fn failed_device_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        device(&store, "d1", "u1").await;
        device(&store, "d2", "u1").await;
        let transport = Arc::new(RecordingTransport {
            failing_device: Some("d1".to_string()),
            ..RecordingTransport::default()
        });
        let dispatcher = dispatcher(&store, &transport);

        let report = dispatcher
            .dispatch(
                &[due_user("u1", &[NotificationType::MealReminder])],
                "2026-03-02T11:30",
                utc("2026-03-02T11:30:00Z"),
            )
            .await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);

        let records = store.delivery_records().await;
        let failed: Vec<_> = records.iter().filter(|r| !r.outcome.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed.first().and_then(|r| r.outcome.error()),
            Some("transport error: DeviceNotRegistered")
        );
    }

    #[tokio::test]
    async fn same_window_collides_on_notification_id() {
        let store = Arc::new(MemoryStore::new());
        device(&store, "d1", "u1").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(&store, &transport);
        let users = [due_user("u1", &[NotificationType::StreakSaver])];
        let now = utc("2026-03-02T19:00:00Z");

        let first = dispatcher.dispatch(&users, "2026-03-02T19:00", now).await;
        let second = dispatcher.dispatch(&users, "2026-03-02T19:00", now).await;
        let first_ids: Vec<_> = first.records.iter().map(|r| &r.notification_id).collect();
        let second_ids: Vec<_> = second.records.iter().map(|r| &r.notification_id).collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(store.delivery_records().await.len(), 1);
    }

    #[tokio::test]
    async fn delivery_is_tracked_in_the_ledger() {
        let store = Arc::new(MemoryStore::new());
        device(&store, "d1", "u1").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(&store, &transport);

        let report = dispatcher
            .dispatch(
                &[due_user("u1", &[NotificationType::StreakSaver])],
                "2026-03-02T19:00",
                utc("2026-03-02T19:00:00Z"),
            )
            .await;
        let Some(record) = report.records.first() else {
            panic!("expected one record");
        };
        let event_id = format!("delivery_{}", record.notification_id);

        // Tracking runs detached; give it a few scheduler turns.
        let mut event = None;
        for _ in 0..50 {
            if let Ok(Some(found)) = store.get_event(&event_id).await {
                event = Some(found);
                break;
            }
            tokio::task::yield_now().await;
        }
        let Some(event) = event else {
            panic!("delivery event was not tracked");
        };
        assert_eq!(event.kind, EventKind::NotificationDelivered);
        assert_eq!(event.session_id, DISPATCH_SESSION);
    }

    #[tokio::test]
    async fn stalled_delivery_log_does_not_hold_up_dispatch() {
        let store = Arc::new(MemoryStore::new());
        device(&store, "d1", "u1").await;
        let transport = Arc::new(RecordingTransport::default());
        let ledger = LedgerService::new(
            Arc::new(StalledDeliveryLog(Arc::clone(&store))) as Arc<dyn LedgerStore>,
            Arc::clone(&store) as Arc<dyn UserStore>,
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as Arc<dyn DeviceDirectory>,
            Arc::clone(&store) as Arc<dyn ProfileDirectory>,
            Arc::clone(&transport) as Arc<dyn PushTransport>,
            Arc::new(TemplateCatalog::standard()),
            ledger,
            DispatchLimits {
                call_timeout: Duration::from_secs(1),
                ..DispatchLimits::default()
            },
        );

        let due = [due_user("u1", &[NotificationType::MealReminder])];
        let dispatch = dispatcher.dispatch(
            &due,
            "2026-03-02T11:30",
            utc("2026-03-02T11:30:00Z"),
        );
        let Ok(report) = tokio::time::timeout(Duration::from_secs(10), dispatch).await else {
            panic!("dispatch did not finish");
        };
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(transport.sent().len(), 1);
        assert!(store.delivery_records().await.is_empty());
    }

    #[tokio::test]
    async fn no_devices_means_no_attempts() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher(&store, &transport);
        let report = dispatcher
            .dispatch(
                &[due_user("u1", &[NotificationType::MealReminder])],
                "2026-03-02T11:30",
                utc("2026-03-02T11:30:00Z"),
            )
            .await;
        assert_eq!(report, DispatchReport::default());
    }
}
