//! Outbound alert channels.

pub mod telegram;

pub use telegram::{TelegramConfig, TelegramNotifier};

use async_trait::async_trait;

use crate::error::ChannelError;

/// Delivers a short alert to a human.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &str;

    async fn notify(&self, text: &str) -> Result<(), ChannelError>;
}
