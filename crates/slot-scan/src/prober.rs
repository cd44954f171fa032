use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{ProbeResult, RemoteSlot, ScanError};

/// Marker string the site serves instead of data under high load.
pub const WAITING_ROOM_MARKER: &str = "Online Waiting Room";

/// Anything that can execute one availability query and classify it.
///
/// The scan executor and the waiting-room worker both talk to this trait so
/// tests can substitute canned responses.
#[async_trait]
pub trait ProbeSource: Send + Sync {
    /// Issue one availability query against a pre-built URL.
    async fn probe(&self, url: &str) -> ProbeResult;
}

/// Configuration for the remote slot prober.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Connect/read timeout per request (default: 10 seconds).
    pub request_timeout: Duration,

    /// Extra attempts after a network failure (default: 2).
    pub network_retries: u32,

    /// Fixed delay between network-failure retries (default: 3 seconds).
    pub retry_backoff: Duration,

    /// Referer header sent with every probe.
    pub referer: String,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            network_retries: 2,
            retry_backoff: Duration::from_secs(3),
            referer: "https://emrtds.nepalpassport.gov.np/".to_string(),
        }
    }
}

/// Client for the remote slot-availability API.
pub struct SlotProber {
    client: Client,
    config: ProberConfig,
}

impl SlotProber {
    /// Create a new prober. The client carries browser-like headers since
    /// the API sits behind the public site's traffic filtering.
    pub fn new(config: ProberConfig) -> Result<Self, ScanError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
        if let Ok(referer) = HeaderValue::from_str(&config.referer) {
            headers.insert("Referer", referer);
        }

        let client = Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
            )
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScanError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// One HTTP round trip, without retry handling.
    async fn fetch(&self, url: &str) -> Result<(u16, String), ScanError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::Network(e.to_string()))?;

        Ok((status, body))
    }
}

#[async_trait]
impl ProbeSource for SlotProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        let mut attempt = 0;
        loop {
            match self.fetch(url).await {
                Ok((status, body)) => return classify(status, &body),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.network_retries {
                        warn!("Probe unreachable after {} attempts: {}", attempt, e);
                        return ProbeResult::Unreachable;
                    }
                    debug!("Probe attempt {} failed ({}), retrying", attempt, e);
                    sleep(self.config.retry_backoff).await;
                }
            }
        }
    }
}

/// Classify a raw response into a [`ProbeResult`].
///
/// Priority order matters: the waiting-room page can arrive with any HTTP
/// status, so the marker check comes before the status check.
pub fn classify(status: u16, body: &str) -> ProbeResult {
    if body.contains(WAITING_ROOM_MARKER) {
        return ProbeResult::WaitingRoom;
    }

    if status != 200 {
        return ProbeResult::HttpError(status);
    }

    let slots: Vec<RemoteSlot> = match serde_json::from_str(body) {
        Ok(slots) => slots,
        Err(e) => {
            debug!("Failed to parse slot response: {}", e);
            return ProbeResult::Malformed;
        }
    };

    if slots.is_empty() {
        return ProbeResult::NoData;
    }

    let (available, unavailable) = slots.into_iter().partition(|s: &RemoteSlot| s.status);

    ProbeResult::Available {
        available,
        unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_room_marker_wins_over_status() {
        let body = "<html>You are now in the Online Waiting Room</html>";
        assert!(matches!(classify(503, body), ProbeResult::WaitingRoom));
        assert!(matches!(classify(200, body), ProbeResult::WaitingRoom));
    }

    #[test]
    fn non_200_is_http_error() {
        assert!(matches!(
            classify(502, "Bad Gateway"),
            ProbeResult::HttpError(502)
        ));
    }

    #[test]
    fn unparseable_body_is_malformed() {
        assert!(matches!(classify(200, "<html></html>"), ProbeResult::Malformed));
        // A JSON object is not the expected array shape either.
        assert!(matches!(classify(200, "{\"a\":1}"), ProbeResult::Malformed));
    }

    #[test]
    fn empty_array_is_no_data() {
        assert!(matches!(classify(200, "[]"), ProbeResult::NoData));
    }

    #[test]
    fn entries_partition_by_status_flag() {
        let body = r#"[
            {"name": "Slot1", "status": true, "capacity": 2, "vipCapacity": 1},
            {"name": "Slot2", "status": false, "capacity": 0, "vipCapacity": 0}
        ]"#;

        match classify(200, body) {
            ProbeResult::Available {
                available,
                unavailable,
            } => {
                assert_eq!(available.len(), 1);
                assert_eq!(available[0].name, "Slot1");
                assert_eq!(available[0].capacity, 2);
                assert_eq!(available[0].vip_capacity, 1);
                assert_eq!(unavailable.len(), 1);
                assert_eq!(unavailable[0].name, "Slot2");
            }
            other => panic!("expected Available, got {:?}", other),
        }
    }

    #[test]
    fn missing_fields_get_defaults() {
        let body = r#"[{"status": true}]"#;
        match classify(200, body) {
            ProbeResult::Available { available, .. } => {
                assert_eq!(available[0].name, "UNKNOWN");
                assert_eq!(available[0].capacity, 0);
            }
            other => panic!("expected Available, got {:?}", other),
        }
    }
}
