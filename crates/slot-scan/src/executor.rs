use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveTime, Utc, Weekday};
use notifier::Notifier;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{ChangeDetector, ProbeResult, ProbeSource, ScanError, SlotStore, WaitingRoomQueue,
            WaitingRoomTask};

/// Configuration for the scan executor.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Base URL of the availability API.
    pub base_url: String,

    /// Locations to probe: display name -> location code. Ordered so cycles
    /// walk locations deterministically.
    pub locations: BTreeMap<String, String>,

    /// How many days ahead to probe (default: 7).
    pub days_ahead: u32,

    /// Start of the known high-traffic window, local time.
    pub fast_window_start: NaiveTime,

    /// End of the high-traffic window, local time.
    pub fast_window_end: NaiveTime,

    /// Interval between cycles inside the window (default: 5 seconds).
    pub fast_interval: Duration,

    /// Interval between cycles otherwise (default: 180 seconds).
    pub normal_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_url: "https://emrtds.nepalpassport.gov.np/iups-api".to_string(),
            locations: BTreeMap::new(),
            days_ahead: 7,
            fast_window_start: NaiveTime::from_hms_opt(10, 0, 0)
                .unwrap_or_else(|| NaiveTime::MIN),
            fast_window_end: NaiveTime::from_hms_opt(10, 5, 0).unwrap_or_else(|| NaiveTime::MIN),
            fast_interval: Duration::from_secs(5),
            normal_interval: Duration::from_secs(180),
        }
    }
}

/// Main scan execution engine.
///
/// Each cycle: retention sweep, one probe per (location, date) pair, then a
/// single aggregated notification covering every pair that changed.
pub struct ScanExecutor {
    prober: Arc<dyn ProbeSource>,
    detector: Arc<ChangeDetector>,
    store: Arc<dyn SlotStore>,
    notifier: Arc<dyn Notifier>,
    waiting_room: WaitingRoomQueue,
    config: ScanConfig,
}

impl ScanExecutor {
    /// Create an executor over the shared pipeline components.
    pub fn new(
        prober: Arc<dyn ProbeSource>,
        detector: Arc<ChangeDetector>,
        store: Arc<dyn SlotStore>,
        notifier: Arc<dyn Notifier>,
        waiting_room: WaitingRoomQueue,
        config: ScanConfig,
    ) -> Self {
        Self {
            prober,
            detector,
            store,
            notifier,
            waiting_room,
            config,
        }
    }

    /// Run scan cycles until shutdown is signalled. The shutdown channel is
    /// only consulted at the sleep point, so an in-flight cycle always
    /// finishes its writes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ScanError> {
        info!(
            "Starting scan executor for {} locations",
            self.config.locations.len()
        );

        self.detector.hydrate().await?;

        loop {
            if let Err(e) = self.run_cycle().await {
                error!("Scan cycle failed: {}", e);
            }

            let interval = self.next_interval(Local::now().time());
            debug!("Next check in {:?}", interval);

            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping scan executor");
                    return Ok(());
                }
            }
        }
    }

    /// One full probe cycle over every (location, date) pair.
    pub async fn run_cycle(&self) -> Result<(), ScanError> {
        let today = Local::now().date_naive();

        // Past-dated slot data has no value; sweep before probing.
        let cutoff = today - ChronoDuration::days(1);
        match self.store.delete_before(cutoff).await {
            Ok(removed) if removed > 0 => debug!("Retention sweep removed {} records", removed),
            Ok(_) => {}
            Err(e) => warn!("Retention sweep failed: {}", e),
        }

        let dates = valid_dates(today, self.config.days_ahead);
        let mut blocks = Vec::new();

        for (location, code) in &self.config.locations {
            for date in &dates {
                let url = format!("{}/timeslots/{}/{}/false", self.config.base_url, code, date);

                match self.prober.probe(&url).await {
                    ProbeResult::Available {
                        available,
                        unavailable,
                    } => {
                        match self
                            .detector
                            .process(location, *date, &available, &unavailable)
                            .await
                        {
                            Ok(Some(block)) => blocks.push(block),
                            Ok(None) => {}
                            Err(e) => warn!("Failed to process {} on {}: {}", location, date, e),
                        }
                    }
                    ProbeResult::WaitingRoom => {
                        self.waiting_room
                            .enqueue(WaitingRoomTask {
                                location: location.clone(),
                                date: *date,
                                url,
                                enqueued_at: Utc::now(),
                            })
                            .await;
                    }
                    ProbeResult::NoData => {
                        debug!("No slot data for {} on {}", location, date);
                    }
                    ProbeResult::HttpError(status) => {
                        warn!("Status {} for {} on {}", status, location, date);
                    }
                    ProbeResult::Malformed => {
                        warn!("Malformed response for {} on {}", location, date);
                    }
                    ProbeResult::Unreachable => {
                        debug!(
                            "Probe unreachable for {} on {}, skipping until next cycle",
                            location, date
                        );
                    }
                }
            }
        }

        if !blocks.is_empty() {
            let message = format!(
                "🎉 *New/Changed Passport Slots*\n\n{}",
                blocks.join("\n\n")
            );
            self.notifier.send(&message).await;
        } else {
            debug!("No new or changed slots this cycle");
        }

        Ok(())
    }

    /// Cycle interval: fast inside the configured high-traffic window,
    /// normal otherwise.
    pub fn next_interval(&self, now: NaiveTime) -> Duration {
        if now >= self.config.fast_window_start && now <= self.config.fast_window_end {
            self.config.fast_interval
        } else {
            self.config.normal_interval
        }
    }
}

/// The next `days_ahead` calendar dates starting today, skipping Saturdays
/// (the office is closed, so the site never offers slots).
pub fn valid_dates(today: NaiveDate, days_ahead: u32) -> Vec<NaiveDate> {
    (0..days_ahead as i64)
        .map(|offset| today + ChronoDuration::days(offset))
        .filter(|date| date.weekday() != Weekday::Sat)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use notifier::MockNotifier;

    use crate::{MemorySlotStore, RemoteSlot, WaitingRoomConfig};

    use super::*;

    #[test]
    fn saturdays_are_skipped() {
        // 2025-01-10 is a Friday.
        let dates = valid_dates("2025-01-10".parse().unwrap(), 7);
        assert_eq!(dates.len(), 6);
        assert!(dates.iter().all(|d| d.weekday() != Weekday::Sat));
        assert_eq!(dates[0], "2025-01-10".parse::<NaiveDate>().unwrap());
        assert_eq!(dates[1], "2025-01-12".parse::<NaiveDate>().unwrap());
    }

    struct FixedProbe(ProbeResult);

    #[async_trait]
    impl ProbeSource for FixedProbe {
        async fn probe(&self, _url: &str) -> ProbeResult {
            self.0.clone()
        }
    }

    fn executor_with(probe: ProbeResult) -> (ScanExecutor, Arc<MemorySlotStore>, Arc<MockNotifier>) {
        let prober: Arc<dyn ProbeSource> = Arc::new(FixedProbe(probe));
        let store = Arc::new(MemorySlotStore::new());
        let detector = Arc::new(ChangeDetector::new(store.clone()));
        let notifier = Arc::new(MockNotifier::new());
        let (queue, _worker) = WaitingRoomQueue::new(
            prober.clone(),
            detector.clone(),
            notifier.clone(),
            WaitingRoomConfig::default(),
        );

        let mut locations = BTreeMap::new();
        locations.insert("Kathmandu".to_string(), "77".to_string());

        let config = ScanConfig {
            base_url: "http://example/iups-api".to_string(),
            locations,
            days_ahead: 1,
            ..ScanConfig::default()
        };

        (
            ScanExecutor::new(prober, detector, store.clone(), notifier.clone(), queue, config),
            store,
            notifier,
        )
    }

    #[tokio::test]
    async fn cycle_notifies_once_for_changed_pairs() {
        let (executor, store, notifier) = executor_with(ProbeResult::Available {
            available: vec![RemoteSlot {
                name: "Slot1".to_string(),
                status: true,
                capacity: 2,
                vip_capacity: 1,
            }],
            unavailable: vec![],
        });

        executor.run_cycle().await.unwrap();
        assert_eq!(notifier.count(), 1);
        assert!(!store.available.lock().unwrap().is_empty());

        let sent = notifier.sent.lock().unwrap();
        assert!(sent[0].contains("New/Changed Passport Slots"));
        assert!(sent[0].contains("Slot1"));
        drop(sent);

        // Identical second cycle: records written, zero notifications.
        executor.run_cycle().await.unwrap();
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn error_classifications_do_not_notify() {
        for probe in [
            ProbeResult::NoData,
            ProbeResult::HttpError(502),
            ProbeResult::Malformed,
            ProbeResult::Unreachable,
        ] {
            let (executor, store, notifier) = executor_with(probe);
            executor.run_cycle().await.unwrap();
            assert_eq!(notifier.count(), 0);
            assert!(store.available.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn interval_is_fast_only_inside_window() {
        let (executor, _, _) = executor_with(ProbeResult::NoData);
        let fast = NaiveTime::from_hms_opt(10, 2, 0).unwrap();
        let slow = NaiveTime::from_hms_opt(14, 0, 0).unwrap();

        assert_eq!(executor.next_interval(fast), executor.config.fast_interval);
        assert_eq!(executor.next_interval(slow), executor.config.normal_interval);
    }
}
