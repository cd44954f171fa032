use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One bookable time-slot instance as observed by a probe.
///
/// Identity is (location, date, name). Both capacities at zero means the
/// slot is explicitly unavailable, which is different from the slot being
/// absent from a response.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlotRecord {
    /// Location (district) the slot belongs to.
    pub location: String,
    /// Calendar date of the slot.
    pub date: NaiveDate,
    /// Slot name/label, e.g. a time window.
    pub name: String,
    /// Regular booking capacity, never negative.
    pub normal_capacity: i32,
    /// VIP booking capacity, never negative.
    pub vip_capacity: i32,
    /// When this state was observed. A fresh record is written on every
    /// successful probe, even when nothing changed.
    pub checked_at: DateTime<Utc>,
}

impl SlotRecord {
    /// Build a record from a wire-format slot entry.
    pub fn from_remote(
        location: &str,
        date: NaiveDate,
        slot: &RemoteSlot,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            location: location.to_string(),
            date,
            name: slot.name.clone(),
            normal_capacity: slot.capacity.max(0),
            vip_capacity: slot.vip_capacity.max(0),
            checked_at,
        }
    }

    /// A zero-capacity copy of this record, used when previously-available
    /// state can no longer be confirmed.
    pub fn zeroed(&self, checked_at: DateTime<Utc>) -> Self {
        Self {
            normal_capacity: 0,
            vip_capacity: 0,
            checked_at,
            ..self.clone()
        }
    }
}

/// Wire shape of one slot entry from the availability API.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSlot {
    /// Slot label. The site occasionally omits it.
    #[serde(default = "unknown_name")]
    pub name: String,
    /// Truthy when the slot is bookable.
    #[serde(default)]
    pub status: bool,
    /// Regular capacity.
    #[serde(default)]
    pub capacity: i32,
    /// VIP capacity.
    #[serde(default, rename = "vipCapacity")]
    pub vip_capacity: i32,
}

fn unknown_name() -> String {
    "UNKNOWN".to_string()
}

/// Classified outcome of one remote query for a (location, date) pair.
#[derive(Debug, Clone)]
pub enum ProbeResult {
    /// Parsed slot data, partitioned by the availability flag. Unavailable
    /// entries are still persisted for history.
    Available {
        /// Entries with a truthy status flag.
        available: Vec<RemoteSlot>,
        /// Entries explicitly reported as unavailable.
        unavailable: Vec<RemoteSlot>,
    },
    /// The response parsed but contained no entries.
    NoData,
    /// The site returned its online waiting room instead of data.
    WaitingRoom,
    /// Non-200 HTTP status.
    HttpError(u16),
    /// Body failed to parse as the expected JSON array.
    Malformed,
    /// Network retries exhausted; abandoned until the next cycle.
    Unreachable,
}

/// Most recently observed *available* state per location and date.
///
/// This is purely the diff baseline; the store is the source of truth for
/// freshness.
pub type LastKnownSlotMap = HashMap<String, HashMap<NaiveDate, Vec<SlotRecord>>>;

/// A waiting-room-blocked probe queued for deferred rechecking.
#[derive(Debug, Clone)]
pub struct WaitingRoomTask {
    /// Location the blocked probe targeted.
    pub location: String,
    /// Date the blocked probe targeted.
    pub date: NaiveDate,
    /// Pre-built probe URL to retry.
    pub url: String,
    /// When the task was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

/// Custom error type for scan operations.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API error
    #[error("API error: {0}")]
    ApiError(String),

    /// Data format error
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),
}
