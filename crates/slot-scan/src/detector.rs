use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{RemoteSlot, ScanError, SlotRecord, SlotStore};

/// Diffs freshly probed slot state against the last-known state, persists
/// every observation, and formats notification blocks only when something
/// actually changed.
///
/// Shared by the main scan cycle and the waiting-room worker so both paths
/// run identical persist/notify logic.
pub struct ChangeDetector {
    store: Arc<dyn SlotStore>,
    last_known: RwLock<crate::LastKnownSlotMap>,
}

impl ChangeDetector {
    /// Create a detector with an empty diff baseline.
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self {
            store,
            last_known: RwLock::new(HashMap::new()),
        }
    }

    /// Hydrate the diff baseline from the store. Called once at start-up so
    /// a restart does not re-notify unchanged state.
    pub async fn hydrate(&self) -> Result<(), ScanError> {
        let map = self.store.load_last_known().await?;
        let locations = map.len();
        *self.last_known.write().await = map;
        info!("Hydrated slot baseline for {} locations", locations);
        Ok(())
    }

    /// Process one probed (location, date) pair.
    ///
    /// Always writes fresh records for both partitions, then compares the
    /// available set against the baseline. Returns a formatted block listing
    /// every currently-available slot iff the set changed (new slot,
    /// disappeared slot, or a capacity difference).
    pub async fn process(
        &self,
        location: &str,
        date: NaiveDate,
        available: &[RemoteSlot],
        unavailable: &[RemoteSlot],
    ) -> Result<Option<String>, ScanError> {
        let checked_at = Utc::now();

        let available_records: Vec<SlotRecord> = available
            .iter()
            .map(|s| SlotRecord::from_remote(location, date, s, checked_at))
            .collect();
        let unavailable_records: Vec<SlotRecord> = unavailable
            .iter()
            .map(|s| SlotRecord::from_remote(location, date, s, checked_at))
            .collect();

        // Freshness guarantee: write even when nothing changed.
        self.store.insert_available(&available_records).await?;
        if !unavailable_records.is_empty() {
            self.store.insert_unavailable(&unavailable_records).await?;
        }

        let mut last_known = self.last_known.write().await;
        let previous = last_known
            .get(location)
            .and_then(|dates| dates.get(&date))
            .map(|slots| slots.as_slice())
            .unwrap_or(&[]);

        let changed = slots_changed(previous, &available_records);

        if available_records.is_empty() {
            if let Some(dates) = last_known.get_mut(location) {
                dates.remove(&date);
            }
        } else {
            last_known
                .entry(location.to_string())
                .or_default()
                .insert(date, available_records.clone());
        }
        drop(last_known);

        if changed {
            info!(
                "Changed slots for {} on {}: {} available",
                location,
                date,
                available_records.len()
            );
            Ok(Some(format_block(location, date, &available_records)))
        } else {
            debug!("Unchanged slots for {} on {}", location, date);
            Ok(None)
        }
    }

    /// Mark everything previously known available for (location, date) as
    /// explicitly unavailable. Used when the waiting room never cleared or
    /// cleared with no data, so stale "available" state is never left
    /// standing. Returns true when any state was actually cleared.
    pub async fn mark_unavailable(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<bool, ScanError> {
        let previous = {
            let mut last_known = self.last_known.write().await;
            last_known
                .get_mut(location)
                .and_then(|dates| dates.remove(&date))
                .unwrap_or_default()
        };

        if previous.is_empty() {
            return Ok(false);
        }

        let checked_at = Utc::now();
        let zeroed: Vec<SlotRecord> = previous.iter().map(|s| s.zeroed(checked_at)).collect();
        self.store.insert_unavailable(&zeroed).await?;

        info!(
            "Marked {} previously-available slots unavailable for {} on {}",
            zeroed.len(),
            location,
            date
        );
        Ok(true)
    }
}

/// True when the available-slot set differs from the previous one: a slot is
/// new, disappeared, or either capacity value changed. Keyed by slot name.
pub fn slots_changed(previous: &[SlotRecord], current: &[SlotRecord]) -> bool {
    let prev_map: HashMap<&str, (i32, i32)> = previous
        .iter()
        .map(|s| (s.name.as_str(), (s.normal_capacity, s.vip_capacity)))
        .collect();
    let curr_map: HashMap<&str, (i32, i32)> = current
        .iter()
        .map(|s| (s.name.as_str(), (s.normal_capacity, s.vip_capacity)))
        .collect();

    if prev_map.len() != curr_map.len() {
        return true;
    }

    curr_map
        .iter()
        .any(|(name, caps)| prev_map.get(name) != Some(caps))
}

/// Format the notification block for one (location, date) pair, enumerating
/// every currently-available slot so the recipient sees full current state
/// rather than a partial delta.
pub fn format_block(location: &str, date: NaiveDate, available: &[SlotRecord]) -> String {
    let mut lines = vec![format!("📍 *{}* — *{}*:", location, date)];
    for slot in available {
        lines.push(format!(
            "• `{}` — Normal: {} | VIP: {}",
            slot.name, slot.normal_capacity, slot.vip_capacity
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use crate::MemorySlotStore;

    use super::*;

    fn remote(name: &str, capacity: i32, vip: i32) -> RemoteSlot {
        RemoteSlot {
            name: name.to_string(),
            status: true,
            capacity,
            vip_capacity: vip,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn first_observation_notifies_and_persists() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store.clone());

        let block = detector
            .process("Kathmandu", date("2025-01-10"), &[remote("Slot1", 2, 1)], &[])
            .await
            .unwrap();

        let block = block.expect("new availability should produce a block");
        assert!(block.contains("Kathmandu"));
        assert!(block.contains("Slot1"));
        assert!(block.contains("Normal: 2"));
        assert!(block.contains("VIP: 1"));

        assert_eq!(store.available.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_second_cycle_is_silent_but_still_persisted() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store.clone());
        let slots = [remote("Slot1", 5, 2)];

        let first = detector
            .process("Kathmandu", date("2025-01-10"), &slots, &[])
            .await
            .unwrap();
        assert!(first.is_some());

        let second = detector
            .process("Kathmandu", date("2025-01-10"), &slots, &[])
            .await
            .unwrap();
        assert!(second.is_none(), "unchanged data must not notify");

        // Freshness: a second record was written anyway.
        assert_eq!(store.available.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn newly_appearing_slot_is_detected() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store);
        let d = date("2025-01-10");

        detector
            .process("Kathmandu", d, &[remote("A", 5, 2)], &[])
            .await
            .unwrap();

        let block = detector
            .process("Kathmandu", d, &[remote("A", 5, 2), remote("B", 3, 0)], &[])
            .await
            .unwrap()
            .expect("new slot B should trigger a change");

        // Full current state is enumerated, not just the delta.
        assert!(block.contains("`A`"));
        assert!(block.contains("`B`"));
    }

    #[tokio::test]
    async fn capacity_change_and_disappearance_are_detected() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store);
        let d = date("2025-01-10");

        detector
            .process("Kathmandu", d, &[remote("A", 5, 2), remote("B", 3, 0)], &[])
            .await
            .unwrap();

        // Capacity difference on A.
        let changed = detector
            .process("Kathmandu", d, &[remote("A", 4, 2), remote("B", 3, 0)], &[])
            .await
            .unwrap();
        assert!(changed.is_some());

        // B disappears.
        let changed = detector
            .process("Kathmandu", d, &[remote("A", 4, 2)], &[])
            .await
            .unwrap();
        assert!(changed.is_some());
    }

    #[tokio::test]
    async fn monotonic_freshness_across_cycles() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store.clone());
        let d = date("2025-01-10");
        let slots = [remote("Slot1", 2, 1)];

        detector.process("Kathmandu", d, &slots, &[]).await.unwrap();
        let first = store.available.lock().unwrap().last().unwrap().checked_at;

        detector.process("Kathmandu", d, &slots, &[]).await.unwrap();
        let second = store.available.lock().unwrap().last().unwrap().checked_at;

        assert!(second >= first);
    }

    #[tokio::test]
    async fn mark_unavailable_zeroes_previous_state() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store.clone());
        let d = date("2025-01-10");

        detector
            .process("Kathmandu", d, &[remote("Slot1", 2, 1)], &[])
            .await
            .unwrap();

        let cleared = detector.mark_unavailable("Kathmandu", d).await.unwrap();
        assert!(cleared);

        let unavailable = store.unavailable.lock().unwrap();
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].name, "Slot1");
        assert_eq!(unavailable[0].normal_capacity, 0);
        assert_eq!(unavailable[0].vip_capacity, 0);

        // Second call finds nothing left to clear.
        drop(unavailable);
        assert!(!detector.mark_unavailable("Kathmandu", d).await.unwrap());
    }

    #[tokio::test]
    async fn reappearance_after_clear_notifies_across_restart() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store.clone());
        let d = date("2025-01-10");

        detector
            .process("Kathmandu", d, &[remote("Slot1", 2, 1)], &[])
            .await
            .unwrap();
        detector.mark_unavailable("Kathmandu", d).await.unwrap();

        // Restarted detector must not resurrect the cleared state, so the
        // same slot coming back counts as a change.
        let restarted = ChangeDetector::new(store);
        restarted.hydrate().await.unwrap();

        let block = restarted
            .process("Kathmandu", d, &[remote("Slot1", 2, 1)], &[])
            .await
            .unwrap();
        assert!(block.is_some(), "cleared state must not suppress reappearance");
    }

    #[tokio::test]
    async fn hydrated_baseline_suppresses_renotification() {
        let store = Arc::new(MemorySlotStore::new());
        let detector = ChangeDetector::new(store.clone());
        let d = date("2025-01-10");

        detector
            .process("Kathmandu", d, &[remote("Slot1", 2, 1)], &[])
            .await
            .unwrap();

        // Fresh detector, same store: simulates a restart.
        let restarted = ChangeDetector::new(store);
        restarted.hydrate().await.unwrap();

        let block = restarted
            .process("Kathmandu", d, &[remote("Slot1", 2, 1)], &[])
            .await
            .unwrap();
        assert!(block.is_none());
    }
}
