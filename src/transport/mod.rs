//! Outbound push transport.
//!
//! The dispatcher talks to push providers only through [`PushTransport`].
//! [`ExpoPushTransport`] posts to an Expo-compatible push gateway;
//! [`DryRunTransport`] logs and reports success, for development and for
//! deployments where push is disabled.

pub mod expo;

use std::fmt;

use async_trait::async_trait;

use crate::domain::PushPayload;
use crate::error::CoreError;

pub use expo::ExpoPushTransport;

/// Sends one rendered notification to one device.
#[async_trait]
pub trait PushTransport: Send + Sync + fmt::Debug {
    /// Delivers `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transport`] when the provider rejects the
    /// message or cannot be reached.
    async fn send(&self, payload: &PushPayload) -> Result<(), CoreError>;
}

/// Transport that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunTransport;

#[async_trait]
impl PushTransport for DryRunTransport {
    async fn send(&self, payload: &PushPayload) -> Result<(), CoreError> {
        tracing::info!(
            notification_id = %payload.notification_id,
            notification_type = %payload.notification_type,
            user_id = %payload.user_id,
            device_id = %payload.device_id,
            "dry-run push"
        );
        Ok(())
    }
}
