//! Workflow service: deferred-link tokens with lazy expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::workflow::Completion;
use crate::domain::{EffectiveStatus, NewWorkflow, PersistedStatus, Workflow, WorkflowId};
use crate::error::CoreError;
use crate::persistence::WorkflowStore;

/// A freshly issued workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedWorkflow {
    /// The stored document.
    pub workflow: Workflow,
    /// Public link, `{base}/wf/{id}`.
    pub link: String,
}

/// A workflow as seen by a resolver at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWorkflow {
    /// The document after the resolve counter was bumped.
    pub workflow: Workflow,
    /// Lazily computed status.
    pub status: EffectiveStatus,
}

/// Issues, resolves and completes workflows.
///
/// Expiry is never written: every read computes the effective status from
/// the stored status and the fixed expiry instant.
#[derive(Debug, Clone)]
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    link_base: String,
}

impl WorkflowService {
    /// Creates a new `WorkflowService` whose links start with `link_base`.
    #[must_use]
    pub fn new(store: Arc<dyn WorkflowStore>, link_base: impl Into<String>) -> Self {
        let link_base: String = link_base.into();
        Self {
            store,
            link_base: link_base.trim_end_matches('/').to_string(),
        }
    }

    /// Public link for a workflow id.
    #[must_use]
    pub fn link_for(&self, id: &WorkflowId) -> String {
        format!("{}/wf/{id}", self.link_base)
    }

    /// Creates a workflow at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the store fails.
    pub async fn create(&self, new: NewWorkflow) -> Result<CreatedWorkflow, CoreError> {
        self.create_at(new, Utc::now()).await
    }

    /// Persists a validated workflow as active with its expiry fixed at
    /// `now + ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the store fails.
    pub async fn create_at(
        &self,
        new: NewWorkflow,
        now: DateTime<Utc>,
    ) -> Result<CreatedWorkflow, CoreError> {
        let workflow = new.into_workflow(now);
        self.store.insert_workflow(&workflow).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            workflow_type = %workflow.workflow_type,
            owner_id = ?workflow.owner_id,
            expires_at = %workflow.expires_at,
            "workflow created"
        );
        let link = self.link_for(&workflow.id);
        Ok(CreatedWorkflow { workflow, link })
    }

    /// Resolves a workflow at the current time.
    ///
    /// # Errors
    ///
    /// See [`WorkflowService::resolve_at`].
    pub async fn resolve(&self, raw_id: &str) -> Result<ResolvedWorkflow, CoreError> {
        self.resolve_at(raw_id, Utc::now()).await
    }

    /// Looks a workflow up and counts the resolution, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidWorkflowId`] for a malformed id (the
    /// store is not touched), [`CoreError::WorkflowNotFound`] for an unknown
    /// one, and [`CoreError::ResolveLimitReached`] once the resolve cap is
    /// used up.
    pub async fn resolve_at(
        &self,
        raw_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedWorkflow, CoreError> {
        let id = WorkflowId::parse(raw_id)?;
        let workflow = self
            .store
            .record_resolve(&id, now)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(id.to_string()))?;

        let prior = workflow.resolve_count.saturating_sub(1);
        if workflow.resolve_limit_exceeded(prior) {
            tracing::info!(workflow_id = %id, resolves = workflow.resolve_count, "resolve limit reached");
            return Err(CoreError::ResolveLimitReached(id.to_string()));
        }

        let status = workflow.effective_status(now);
        tracing::debug!(workflow_id = %id, ?status, resolves = workflow.resolve_count, "workflow resolved");
        Ok(ResolvedWorkflow { workflow, status })
    }

    /// Completes a workflow at the current time.
    ///
    /// # Errors
    ///
    /// See [`WorkflowService::complete_at`].
    pub async fn complete(&self, raw_id: &str) -> Result<Workflow, CoreError> {
        self.complete_at(raw_id, Utc::now()).await
    }

    /// Moves an active workflow to completed.
    ///
    /// Completing an already completed workflow succeeds without writing,
    /// so the completion instant is set exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidWorkflowId`] for a malformed id,
    /// [`CoreError::WorkflowNotFound`] for an unknown one, and
    /// [`CoreError::WorkflowExpired`] when the workflow expired before
    /// completion.
    pub async fn complete_at(&self, raw_id: &str, now: DateTime<Utc>) -> Result<Workflow, CoreError> {
        let id = WorkflowId::parse(raw_id)?;
        let mutate = |current: &Workflow| -> Result<Option<Workflow>, CoreError> {
            match current.completion(now)? {
                Completion::AlreadyCompleted => Ok(None),
                Completion::Complete => Ok(Some(Workflow {
                    status: PersistedStatus::Completed,
                    completed_at: Some(now),
                    ..current.clone()
                })),
            }
        };

        let result = self.store.update_workflow(&id, &mutate).await;
        match result {
            Ok(Some(workflow)) => {
                tracing::info!(workflow_id = %id, completed_at = ?workflow.completed_at, "workflow completed");
                Ok(workflow)
            }
            Ok(None) => Err(CoreError::WorkflowNotFound(id.to_string())),
            Err(e) => {
                if matches!(e, CoreError::WorkflowExpired(_)) {
                    tracing::info!(workflow_id = %id, "completion rejected, workflow expired");
                }
                Err(e)
            }
        }
    }

    /// Counts a hit on the public landing link.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidWorkflowId`] for a malformed id and
    /// [`CoreError::WorkflowNotFound`] for an unknown one.
    pub async fn record_click(&self, raw_id: &str) -> Result<Workflow, CoreError> {
        let id = WorkflowId::parse(raw_id)?;
        let workflow = self
            .store
            .record_click(&id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(id.to_string()))?;
        tracing::debug!(workflow_id = %id, clicks = workflow.click_count, "workflow link clicked");
        Ok(workflow)
    }
}
