//! Per-user channel lookup for the alert queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::notify::NotificationChannel;

/// Resolves the notification channels a user has configured.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Channels for `user_id`, empty when the user has none.
    async fn channels_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<Arc<dyn NotificationChannel>>, ChannelError>;
}

/// Directory fixed at startup.
#[derive(Default)]
pub struct StaticDirectory {
    by_user: HashMap<String, Vec<Arc<dyn NotificationChannel>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(
        mut self,
        user_id: impl Into<String>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        self.by_user.entry(user_id.into()).or_default().push(channel);
        self
    }

    /// Number of users with at least one channel.
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }
}

#[async_trait]
impl ChannelDirectory for StaticDirectory {
    async fn channels_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<Arc<dyn NotificationChannel>>, ChannelError> {
        Ok(self.by_user.get(user_id).cloned().unwrap_or_default())
    }
}
