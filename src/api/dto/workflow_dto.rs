//! DTOs for deferred-link workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{EffectiveStatus, WorkflowId, WorkflowType};
use crate::service::{CreatedWorkflow, ResolvedWorkflow};

/// Request body for `POST /api/v1/workflows`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    /// Workflow type.
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    /// Type-specific payload object.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
    /// Time to live, 1-72 hours. Defaults to 48.
    #[serde(default)]
    pub ttl_hours: Option<u32>,
    /// Campaign tag.
    #[serde(default)]
    pub campaign: Option<String>,
    /// Maximum number of resolutions.
    #[serde(default)]
    pub max_resolves: Option<u64>,
}

/// Response body for `POST /api/v1/workflows`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateWorkflowResponse {
    /// Workflow id.
    pub id: WorkflowId,
    /// Public deep link.
    pub link: String,
    /// Fixed expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl From<CreatedWorkflow> for CreateWorkflowResponse {
    fn from(created: CreatedWorkflow) -> Self {
        Self {
            id: created.workflow.id,
            link: created.link,
            expires_at: created.workflow.expires_at,
        }
    }
}

/// Response body for `GET /api/v1/workflows/{id}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResolveWorkflowResponse {
    /// Workflow id.
    pub id: WorkflowId,
    /// Workflow type.
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    /// Effective status at resolution time.
    pub status: EffectiveStatus,
    /// Type-specific payload.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Campaign tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    /// Fixed expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl From<ResolvedWorkflow> for ResolveWorkflowResponse {
    fn from(resolved: ResolvedWorkflow) -> Self {
        let wf = resolved.workflow;
        Self {
            id: wf.id,
            workflow_type: wf.workflow_type,
            status: resolved.status,
            payload: wf.payload,
            campaign: wf.campaign,
            expires_at: wf.expires_at,
        }
    }
}

/// Response body for `POST /api/v1/workflows/{id}/complete`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompleteWorkflowResponse {
    /// Workflow id.
    pub id: WorkflowId,
    /// Always `COMPLETED`.
    pub status: EffectiveStatus,
    /// When the workflow was first completed.
    pub completed_at: Option<DateTime<Utc>>,
}
