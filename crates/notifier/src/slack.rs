use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use tracing::{debug, warn};

use crate::Notifier;

/// Slack incoming-webhook notification sink.
///
/// Messages are prefixed with a local timestamp so the channel history shows
/// when a check actually ran, matching the operator-facing log format.
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackNotifier {
    /// Create a notifier posting to the given incoming-webhook URL.
    pub fn new(webhook_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &str) {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        let payload = serde_json::json!({ "text": format!("[{}]\n{}", ts, message) });

        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Slack notification delivered");
            }
            Ok(response) => {
                warn!("Slack webhook returned status {}", response.status());
            }
            Err(e) => {
                warn!("Failed to send Slack notification: {}", e);
            }
        }
    }
}
