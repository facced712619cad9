//! Notification channels used by the alert queue.

pub mod directory;
pub mod telegram;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::queue::AlertJob;

pub use directory::{ChannelDirectory, StaticDirectory};
pub use telegram::TelegramNotifier;

/// One outbound notification route (chat bot, email, push, ...).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    async fn notify(&self, alert: &AlertJob) -> Result<(), ChannelError>;
}

/// Human-readable alert text shared by text-based channels.
pub fn render_alert(alert: &AlertJob) -> String {
    format!(
        "[{}] {}\nagent: {}",
        alert.alert_type, alert.message, alert.agent_id
    )
}
