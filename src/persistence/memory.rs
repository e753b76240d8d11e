//! In-process document store.
//!
//! All collections sit behind one [`tokio::sync::RwLock`]; a transaction is
//! a single write-lock critical section, which serializes writers the way
//! a per-document transaction would while letting readers run concurrently.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AppendOutcome, DeriveUser, DeviceDirectory, LedgerStore, MutateUser, MutateWorkflow,
    ProfileDirectory, UserStore, WorkflowStore,
};
use crate::domain::{
    DeliveryRecord, Device, Event, NotificationId, UserState, Workflow, WorkflowId,
};
use crate::error::CoreError;

#[derive(Debug, Default)]
struct Collections {
    events: HashMap<String, Event>,
    users: HashMap<String, UserState>,
    deliveries: HashMap<NotificationId, DeliveryRecord>,
    workflows: HashMap<WorkflowId, Workflow>,
    devices: HashMap<String, Device>,
    profiles: HashMap<String, String>,
}

/// Document store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a device.
    pub async fn upsert_device(&self, device: Device) {
        let mut inner = self.inner.write().await;
        inner.devices.insert(device.device_id.clone(), device);
    }

    /// Unregisters a device. Returns whether it existed.
    pub async fn remove_device(&self, device_id: &str) -> bool {
        self.inner.write().await.devices.remove(device_id).is_some()
    }

    /// Sets a user's display name.
    pub async fn set_display_name(&self, user_id: &str, display_name: &str) {
        let mut inner = self.inner.write().await;
        inner
            .profiles
            .insert(user_id.to_string(), display_name.to_string());
    }

    /// All delivery records, ordered by send time.
    pub async fn delivery_records(&self) -> Vec<DeliveryRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<DeliveryRecord> = inner.deliveries.values().cloned().collect();
        records.sort_by_key(|r| r.sent_at);
        records
    }

    /// Number of events in the ledger.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_event(
        &self,
        event: &Event,
        derive: DeriveUser<'_>,
    ) -> Result<AppendOutcome, CoreError> {
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(&event.event_id) {
            return Ok(AppendOutcome::Duplicate);
        }
        let current = inner
            .users
            .get(&event.user_id)
            .cloned()
            .unwrap_or_else(|| UserState::new(&event.user_id));
        let next = derive(current);
        inner.events.insert(event.event_id.clone(), event.clone());
        inner.users.insert(event.user_id.clone(), next.clone());
        Ok(AppendOutcome::Created(next))
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, CoreError> {
        Ok(self.inner.read().await.events.get(event_id).cloned())
    }

    async fn record_delivery(&self, record: &DeliveryRecord) -> Result<bool, CoreError> {
        let mut inner = self.inner.write().await;
        if inner.deliveries.contains_key(&record.notification_id) {
            return Ok(false);
        }
        inner
            .deliveries
            .insert(record.notification_id.clone(), record.clone());
        Ok(true)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserState>, CoreError> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn update_user(
        &self,
        user_id: &str,
        mutate: MutateUser<'_>,
    ) -> Result<Option<UserState>, CoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserState::new(user_id));
        let Some(next) = mutate(current)? else {
            return Ok(None);
        };
        inner.users.insert(user_id.to_string(), next.clone());
        Ok(Some(next))
    }

    async fn due_users(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserState>, CoreError> {
        let inner = self.inner.read().await;
        let mut due: Vec<UserState> = inner
            .users
            .values()
            .filter(|u| u.next_notification_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|u| u.next_notification_at);
        due.truncate(limit);
        Ok(due)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        if inner.workflows.contains_key(&workflow.id) {
            return Err(CoreError::Internal(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        inner
            .workflows
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn record_resolve(
        &self,
        id: &WorkflowId,
        now: DateTime<Utc>,
    ) -> Result<Option<Workflow>, CoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.workflows.get_mut(id).map(|wf| {
            wf.resolve_count = wf.resolve_count.saturating_add(1);
            wf.last_resolved_at = Some(now);
            wf.clone()
        }))
    }

    async fn record_click(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.workflows.get_mut(id).map(|wf| {
            wf.click_count = wf.click_count.saturating_add(1);
            wf.clone()
        }))
    }

    async fn update_workflow(
        &self,
        id: &WorkflowId,
        mutate: MutateWorkflow<'_>,
    ) -> Result<Option<Workflow>, CoreError> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.workflows.get_mut(id) else {
            return Ok(None);
        };
        let Some(mut next) = mutate(current)? else {
            return Ok(Some(current.clone()));
        };
        next.expires_at = current.expires_at;
        *current = next.clone();
        Ok(Some(next))
    }
}

#[async_trait]
impl DeviceDirectory for MemoryStore {
    async fn active_devices(&self, user_ids: &[String]) -> Result<Vec<Device>, CoreError> {
        let inner = self.inner.read().await;
        let mut devices: Vec<Device> = inner
            .devices
            .values()
            .filter(|d| user_ids.contains(&d.user_id))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }
}

#[async_trait]
impl ProfileDirectory for MemoryStore {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, CoreError> {
        Ok(self.inner.read().await.profiles.get(user_id).cloned())
    }
}
