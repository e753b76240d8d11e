//! Push delivery over HTTP to an Expo-compatible gateway.
//!
//! The gateway accepts a JSON array of messages and answers with one ticket
//! per message. A ticket with `status: "error"` is a delivery failure even
//! though the HTTP exchange itself succeeded.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::PushTransport;
use crate::domain::PushPayload;
use crate::error::CoreError;

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    sound: &'static str,
    data: MessageData<'a>,
}

#[derive(Debug, Serialize)]
struct MessageData<'a> {
    notification_id: &'a str,
    notification_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    deep_link: Option<&'a str>,
}

impl<'a> From<&'a PushPayload> for PushMessage<'a> {
    fn from(payload: &'a PushPayload) -> Self {
        Self {
            to: &payload.push_token,
            title: &payload.title,
            body: &payload.body,
            sound: "default",
            data: MessageData {
                notification_id: payload.notification_id.as_str(),
                notification_type: payload.notification_type.as_str(),
                deep_link: payload.deep_link.as_deref(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    data: Vec<PushTicket>,
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl PushTicket {
    fn into_result(self) -> Result<(), CoreError> {
        if self.status == "ok" {
            return Ok(());
        }
        Err(CoreError::Transport(
            self.message
                .unwrap_or_else(|| format!("push ticket status {}", self.status)),
        ))
    }
}

/// Posts notifications to a push gateway with `reqwest`.
#[derive(Debug, Clone)]
pub struct ExpoPushTransport {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl ExpoPushTransport {
    /// Builds a transport with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build push client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            access_token,
        })
    }

    /// The gateway URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PushTransport for ExpoPushTransport {
    async fn send(&self, payload: &PushPayload) -> Result<(), CoreError> {
        let messages = [PushMessage::from(payload)];
        let mut request = self.client.post(&self.endpoint).json(&messages);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::Timeout(format!("push gateway: {e}"))
            } else {
                CoreError::Transport(format!("push gateway: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Transport(format!(
                "push gateway returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: PushResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Transport(format!("unreadable push response: {e}")))?;
        body.data
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Transport("push gateway returned no ticket".to_string()))?
            .into_result()
    }
}
