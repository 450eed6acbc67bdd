//! Chat notifications: queued delivery, Telegram transport, message formatting.

pub mod format;
mod queue;
mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

pub use queue::{MessageTransport, QueuedNotifier, SendOutcome};
pub use telegram::{TelegramConfig, TelegramTransport};

/// Accepts human-readable messages for delivery.
///
/// `Ok` means the message was accepted; delivery itself may happen later.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<()>;
}

/// Notifier that only writes to the log, used when no chat is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_message(&self, text: &str) -> Result<()> {
        info!(target: "notify", "{}", text);
        Ok(())
    }
}
