//! FIFO message queue drained by a single delivery task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::Notifier;

/// Longest message a chat accepts in one request.
pub const MAX_MESSAGE_LEN: usize = 4096;

const MAX_ATTEMPTS: u32 = 5;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The chat service asked us to wait before retrying
    RateLimited(Duration),
}

/// Delivers one already-split message chunk.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<SendOutcome>;
}

/// Handle to the notification queue.
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct QueuedNotifier {
    tx: mpsc::UnboundedSender<String>,
}

impl QueuedNotifier {
    /// Start the delivery worker.
    ///
    /// The worker sends queued messages in order, waiting `delay` between
    /// messages, and exits once every handle has been dropped and the queue is
    /// drained.
    pub fn spawn<T>(transport: Arc<T>, delay: Duration) -> (Self, JoinHandle<()>)
    where
        T: MessageTransport + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain_queue(transport, rx, delay));
        (Self { tx }, handle)
    }
}

#[async_trait]
impl Notifier for QueuedNotifier {
    async fn send_message(&self, text: &str) -> Result<()> {
        self.tx
            .send(text.to_string())
            .map_err(|_| anyhow!("Notification queue is closed"))
    }
}

async fn drain_queue<T: MessageTransport>(
    transport: Arc<T>,
    mut rx: mpsc::UnboundedReceiver<String>,
    delay: Duration,
) {
    while let Some(message) = rx.recv().await {
        for chunk in split_message(&message, MAX_MESSAGE_LEN) {
            deliver_with_retry(transport.as_ref(), &chunk).await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
    debug!("Notification queue closed");
}

async fn deliver_with_retry<T: MessageTransport + ?Sized>(transport: &T, chunk: &str) {
    for attempt in 1..=MAX_ATTEMPTS {
        match transport.deliver(chunk).await {
            Ok(SendOutcome::Delivered) => return,
            Ok(SendOutcome::RateLimited(wait)) => {
                warn!(
                    attempt = attempt,
                    retry_after_secs = wait.as_secs(),
                    "Rate limited by chat service"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                error!(error = %e, "Failed to deliver notification");
                return;
            }
        }
    }
    error!(attempts = MAX_ATTEMPTS, "Dropping notification after repeated rate limits");
}

/// Split a message into chunks of at most `max_len` characters.
///
/// Splits on line boundaries where possible; a single line longer than
/// `max_len` is hard-split.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > max_len {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_len) {
                let piece: String = piece.iter().collect();
                if piece.chars().count() == max_len {
                    chunks.push(piece);
                } else {
                    current_len = piece.chars().count();
                    current = piece;
                }
            }
        } else {
            current.push_str(line);
            current_len += line_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
