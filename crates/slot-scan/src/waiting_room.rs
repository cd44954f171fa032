use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notifier::Notifier;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{ChangeDetector, ProbeResult, ProbeSource, WaitingRoomTask};

/// Configuration for the waiting-room retry worker.
#[derive(Debug, Clone)]
pub struct WaitingRoomConfig {
    /// Re-probe attempts per task (default: 3).
    pub max_attempts: u32,

    /// Fixed delay between re-probes (default: 10 seconds).
    pub retry_delay: Duration,
}

impl Default for WaitingRoomConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(10),
        }
    }
}

/// Producer handle for the waiting-room queue. Enqueueing never blocks the
/// main poll cycle.
pub struct WaitingRoomQueue {
    tx: mpsc::UnboundedSender<WaitingRoomTask>,
    notifier: Arc<dyn Notifier>,
}

impl WaitingRoomQueue {
    /// Create the queue and its single consumer. The returned worker must be
    /// spawned; it exits once every producer handle is dropped and the queue
    /// drains.
    pub fn new(
        prober: Arc<dyn ProbeSource>,
        detector: Arc<ChangeDetector>,
        notifier: Arc<dyn Notifier>,
        config: WaitingRoomConfig,
    ) -> (Self, WaitingRoomWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            notifier: notifier.clone(),
        };
        let worker = WaitingRoomWorker {
            rx,
            prober,
            detector,
            notifier,
            config,
        };
        (queue, worker)
    }

    /// Push a task and notify once that the waiting room was hit. Delivery
    /// happens on a spawned task so a slow sink cannot stall the poll cycle.
    pub async fn enqueue(&self, task: WaitingRoomTask) {
        info!("Waiting room queued: {} on {}", task.location, task.date);

        let notifier = Arc::clone(&self.notifier);
        let message = format!(
            "⏳ Waiting room detected: {} on {}. Will retry in the background.",
            task.location, task.date
        );
        tokio::spawn(async move {
            notifier.send(&message).await;
        });

        if self.tx.send(task).is_err() {
            warn!("Waiting-room worker is gone, task dropped");
        }
    }
}

/// Single dedicated consumer that drains waiting-room tasks in FIFO order.
pub struct WaitingRoomWorker {
    rx: mpsc::UnboundedReceiver<WaitingRoomTask>,
    prober: Arc<dyn ProbeSource>,
    detector: Arc<ChangeDetector>,
    notifier: Arc<dyn Notifier>,
    config: WaitingRoomConfig,
}

impl WaitingRoomWorker {
    /// Run until the queue closes. Tasks are processed strictly one at a
    /// time so a stuck location cannot multiply in-flight probes.
    pub async fn run(mut self) {
        info!("Waiting-room worker started");
        while let Some(task) = self.rx.recv().await {
            self.process(task).await;
        }
        info!("Waiting-room worker stopped");
    }

    /// Re-probe one task up to the configured maximum, with a fixed delay
    /// between attempts.
    async fn process(&self, task: WaitingRoomTask) {
        info!("Handling waiting room for {} on {}", task.location, task.date);

        for attempt in 1..=self.config.max_attempts {
            let elapsed = (Utc::now() - task.enqueued_at).num_seconds();
            debug!(
                "Waiting-room retry {}/{} for {} on {} ({}s elapsed)",
                attempt, self.config.max_attempts, task.location, task.date, elapsed
            );

            match self.prober.probe(&task.url).await {
                ProbeResult::WaitingRoom => {
                    if attempt < self.config.max_attempts {
                        sleep(self.config.retry_delay).await;
                        continue;
                    }
                }
                ProbeResult::Available {
                    available,
                    unavailable,
                } if !available.is_empty() => {
                    // Cleared with data: same change-detection path as the
                    // main cycle, notify only when something changed.
                    match self
                        .detector
                        .process(&task.location, task.date, &available, &unavailable)
                        .await
                    {
                        Ok(Some(block)) => {
                            self.notifier
                                .send(&format!("🎉 *SLOTS FOUND AFTER WAITING ROOM!*\n{}", block))
                                .await;
                        }
                        Ok(None) => {
                            debug!(
                                "Waiting room cleared, no slot changes for {} on {}",
                                task.location, task.date
                            );
                        }
                        Err(e) => {
                            warn!("Failed to process cleared waiting room: {}", e);
                        }
                    }
                    return;
                }
                ProbeResult::Available {
                    available,
                    unavailable,
                } => {
                    // Cleared but nothing bookable: zero out anything
                    // previously known, then persist what the response did
                    // report so history stays complete.
                    debug!(
                        "Past waiting room but no bookable slots for {} on {}",
                        task.location, task.date
                    );
                    self.clear_state(&task).await;
                    if let Err(e) = self
                        .detector
                        .process(&task.location, task.date, &available, &unavailable)
                        .await
                    {
                        warn!("Failed to process cleared waiting room: {}", e);
                    }
                    return;
                }
                ProbeResult::NoData => {
                    // Cleared with an empty body: never leave stale
                    // available state standing.
                    debug!(
                        "Past waiting room but no slot data for {} on {}",
                        task.location, task.date
                    );
                    self.clear_state(&task).await;
                    return;
                }
                other => {
                    debug!(
                        "Waiting-room retry got {:?} for {} on {}",
                        other, task.location, task.date
                    );
                    if attempt < self.config.max_attempts {
                        sleep(self.config.retry_delay).await;
                        continue;
                    }
                }
            }
        }

        // All retries exhausted while still blocked or failing.
        let elapsed = (Utc::now() - task.enqueued_at).num_seconds();
        self.notifier
            .send(&format!(
                "❌ Waiting room persisted for {} on {} after {}s. Marking unavailable.",
                task.location, task.date, elapsed
            ))
            .await;
        self.clear_state(&task).await;
    }

    async fn clear_state(&self, task: &WaitingRoomTask) {
        if let Err(e) = self.detector.mark_unavailable(&task.location, task.date).await {
            warn!(
                "Failed to mark {} on {} unavailable: {}",
                task.location, task.date, e
            );
        }
    }
}
