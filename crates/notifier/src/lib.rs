//! # Notifier
//!
//! Fire-and-forget notification sink for the passport tracker. The tracker
//! only ever hands a formatted text message to the sink; delivery failures
//! are logged and never surfaced to the caller.

mod slack;
pub use slack::*;

use std::sync::Mutex;

use async_trait::async_trait;

/// Trait for notification sinks (Slack webhook, console, test doubles).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a single formatted text message. Must never fail loudly:
    /// implementations log delivery errors and return.
    async fn send(&self, message: &str);
}

/// Mock notifier for development/testing that records every message.
pub struct MockNotifier {
    /// Messages received so far, in delivery order.
    pub sent: Mutex<Vec<String>>,
}

impl MockNotifier {
    /// Create an empty mock notifier.
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Number of messages delivered so far.
    pub fn count(&self) -> usize {
        self.sent.lock().map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, message: &str) {
        tracing::info!("[MOCK NOTIFY] {}", message);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_notifier_records_messages() {
        let notifier = MockNotifier::new();
        notifier.send("first").await;
        notifier.send("second").await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &["first", "second"]);
    }
}
