use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::{LastKnownSlotMap, ScanError, SlotRecord};

/// Persistent store for observed slot state.
///
/// Two logical tables: available-slot records and unavailable-slot records.
/// Writes are insert-always so `checked_at` reflects true polling freshness;
/// the daily retention sweep bounds row growth.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Insert fresh available-slot records. Called unconditionally on every
    /// successful probe, even when nothing changed.
    async fn insert_available(&self, records: &[SlotRecord]) -> Result<(), ScanError>;

    /// Insert fresh unavailable-slot records (same write-every-cycle policy).
    async fn insert_unavailable(&self, records: &[SlotRecord]) -> Result<(), ScanError>;

    /// Load the most recent available record per (location, date, name),
    /// used to hydrate the diff baseline at start-up.
    async fn load_last_known(&self) -> Result<LastKnownSlotMap, ScanError>;

    /// Delete records (available and unavailable) dated strictly before the
    /// cutoff. Returns the number of rows removed.
    async fn delete_before(&self, cutoff: NaiveDate) -> Result<u64, ScanError>;

    /// Remove every record from both tables. Used by the optional nightly
    /// purge.
    async fn purge_all(&self) -> Result<u64, ScanError>;
}

/// Postgres-backed slot store.
pub struct PgSlotStore {
    pool: PgPool,
}

impl PgSlotStore {
    /// Create a store on top of an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_into(&self, table: &str, records: &[SlotRecord]) -> Result<(), ScanError> {
        for record in records {
            let sql = format!(
                "INSERT INTO {} (location, date, name, normal_capacity, vip_capacity, checked_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                table
            );
            sqlx::query(&sql)
                .bind(&record.location)
                .bind(record.date)
                .bind(&record.name)
                .bind(record.normal_capacity)
                .bind(record.vip_capacity)
                .bind(record.checked_at)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SlotStore for PgSlotStore {
    async fn insert_available(&self, records: &[SlotRecord]) -> Result<(), ScanError> {
        self.insert_into("slots_available", records).await
    }

    async fn insert_unavailable(&self, records: &[SlotRecord]) -> Result<(), ScanError> {
        self.insert_into("slots_unavailable", records).await
    }

    async fn load_last_known(&self) -> Result<LastKnownSlotMap, ScanError> {
        let available: Vec<SlotRecord> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (location, date, name)
                location, date, name, normal_capacity, vip_capacity, checked_at
            FROM slots_available
            ORDER BY location, date, name, checked_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let cleared: Vec<SlotRecord> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (location, date, name)
                location, date, name, normal_capacity, vip_capacity, checked_at
            FROM slots_unavailable
            ORDER BY location, date, name, checked_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let map = build_last_known(available, cleared);
        debug!("Hydrated last-known state for {} locations", map.len());
        Ok(map)
    }

    async fn delete_before(&self, cutoff: NaiveDate) -> Result<u64, ScanError> {
        let mut removed = 0;
        for table in ["slots_available", "slots_unavailable"] {
            let sql = format!("DELETE FROM {} WHERE date < $1", table);
            let result = sqlx::query(&sql).bind(cutoff).execute(&self.pool).await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    async fn purge_all(&self) -> Result<u64, ScanError> {
        let mut removed = 0;
        for table in ["slots_available", "slots_unavailable"] {
            let sql = format!("DELETE FROM {}", table);
            let result = sqlx::query(&sql).execute(&self.pool).await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}

/// Assemble the diff baseline from the latest record per identity key.
///
/// A key whose latest unavailable record is newer than its latest available
/// record was explicitly cleared (waiting-room exhaustion or disappearance)
/// and must not be resurrected, otherwise a slot reappearing unchanged after
/// a restart would go unnotified.
fn build_last_known(available: Vec<SlotRecord>, cleared: Vec<SlotRecord>) -> LastKnownSlotMap {
    let cleared_at: HashMap<(String, NaiveDate, String), DateTime<Utc>> = cleared
        .into_iter()
        .map(|r| ((r.location, r.date, r.name), r.checked_at))
        .collect();

    let mut map: LastKnownSlotMap = HashMap::new();
    for record in available {
        let key = (record.location.clone(), record.date, record.name.clone());
        if cleared_at.get(&key).is_some_and(|at| *at > record.checked_at) {
            continue;
        }
        map.entry(record.location.clone())
            .or_default()
            .entry(record.date)
            .or_default()
            .push(record);
    }
    map
}

/// Latest record per identity key. Later writes with a newer `checked_at`
/// replace earlier ones.
fn latest_per_key(rows: &[SlotRecord]) -> Vec<SlotRecord> {
    let mut latest: HashMap<(String, NaiveDate, String), SlotRecord> = HashMap::new();
    for record in rows {
        let key = (record.location.clone(), record.date, record.name.clone());
        match latest.get(&key) {
            Some(existing) if existing.checked_at > record.checked_at => {}
            _ => {
                latest.insert(key, record.clone());
            }
        }
    }
    latest.into_values().collect()
}

/// In-memory slot store for development and tests.
///
/// Keeps every inserted record in order, mirroring the insert-always policy
/// of the Postgres store.
pub struct MemorySlotStore {
    /// All available-slot records written so far.
    pub available: Mutex<Vec<SlotRecord>>,
    /// All unavailable-slot records written so far.
    pub unavailable: Mutex<Vec<SlotRecord>>,
}

impl MemorySlotStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self {
            available: Mutex::new(Vec::new()),
            unavailable: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SlotStore for MemorySlotStore {
    async fn insert_available(&self, records: &[SlotRecord]) -> Result<(), ScanError> {
        if let Ok(mut rows) = self.available.lock() {
            rows.extend_from_slice(records);
        }
        Ok(())
    }

    async fn insert_unavailable(&self, records: &[SlotRecord]) -> Result<(), ScanError> {
        if let Ok(mut rows) = self.unavailable.lock() {
            rows.extend_from_slice(records);
        }
        Ok(())
    }

    async fn load_last_known(&self) -> Result<LastKnownSlotMap, ScanError> {
        let available = {
            let rows = self
                .available
                .lock()
                .map_err(|e| ScanError::DataFormat(e.to_string()))?;
            latest_per_key(&rows)
        };
        let cleared = {
            let rows = self
                .unavailable
                .lock()
                .map_err(|e| ScanError::DataFormat(e.to_string()))?;
            latest_per_key(&rows)
        };

        Ok(build_last_known(available, cleared))
    }

    async fn delete_before(&self, cutoff: NaiveDate) -> Result<u64, ScanError> {
        let mut removed = 0;
        for rows in [&self.available, &self.unavailable] {
            if let Ok(mut rows) = rows.lock() {
                let before = rows.len();
                rows.retain(|r| r.date >= cutoff);
                removed += (before - rows.len()) as u64;
            }
        }
        Ok(removed)
    }

    async fn purge_all(&self) -> Result<u64, ScanError> {
        let mut removed = 0;
        for rows in [&self.available, &self.unavailable] {
            if let Ok(mut rows) = rows.lock() {
                removed += rows.len() as u64;
                rows.clear();
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(location: &str, date: &str, name: &str, cap: i32) -> SlotRecord {
        SlotRecord {
            location: location.to_string(),
            date: date.parse().unwrap(),
            name: name.to_string(),
            normal_capacity: cap,
            vip_capacity: 0,
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn retention_sweep_removes_only_past_dates() {
        let store = MemorySlotStore::new();
        store
            .insert_available(&[
                record("Kathmandu", "2025-01-08", "Slot1", 2),
                record("Kathmandu", "2025-01-09", "Slot1", 2),
                record("Kathmandu", "2025-01-10", "Slot1", 2),
            ])
            .await
            .unwrap();
        store
            .insert_unavailable(&[record("Pokhara", "2025-01-07", "Slot2", 0)])
            .await
            .unwrap();

        let removed = store.delete_before("2025-01-09".parse().unwrap()).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = store.available.lock().unwrap();
        assert!(remaining.iter().all(|r| r.date >= "2025-01-09".parse().unwrap()));
        assert_eq!(remaining.len(), 2);
        assert!(store.unavailable.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_known_keeps_latest_record_per_key() {
        let store = MemorySlotStore::new();
        let mut first = record("Kathmandu", "2025-01-10", "Slot1", 2);
        first.checked_at = Utc::now() - chrono::Duration::minutes(5);
        let second = record("Kathmandu", "2025-01-10", "Slot1", 5);

        store.insert_available(&[first]).await.unwrap();
        store.insert_available(&[second]).await.unwrap();

        let map = store.load_last_known().await.unwrap();
        let slots = &map["Kathmandu"][&"2025-01-10".parse::<NaiveDate>().unwrap()];
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].normal_capacity, 5);
    }

    #[tokio::test]
    async fn last_known_drops_state_cleared_afterwards() {
        let store = MemorySlotStore::new();
        let mut available = record("Kathmandu", "2025-01-10", "Slot1", 2);
        available.checked_at = Utc::now() - chrono::Duration::minutes(5);

        let mut zeroed = available.zeroed(Utc::now());
        store.insert_available(&[available.clone()]).await.unwrap();
        store.insert_unavailable(&[zeroed.clone()]).await.unwrap();

        // Cleared after the last available observation: key is gone.
        let map = store.load_last_known().await.unwrap();
        assert!(map.is_empty());

        // A clear that predates the available observation does not hide it.
        let store = MemorySlotStore::new();
        zeroed.checked_at = available.checked_at - chrono::Duration::minutes(5);
        store.insert_available(&[available]).await.unwrap();
        store.insert_unavailable(&[zeroed]).await.unwrap();

        let map = store.load_last_known().await.unwrap();
        assert_eq!(map["Kathmandu"].len(), 1);
    }
}
