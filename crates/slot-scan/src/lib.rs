//! # Slot Scan
//!
//! Polls the remote passport-appointment API across every configured
//! (location, date) pair, classifies the responses, diffs them against the
//! last-known available state and notifies only on change, while always
//! persisting fresh records so downstream consumers can tell the tracker is
//! alive. Probes that hit the site's online waiting room are handed to a
//! bounded background retry queue instead of blocking the main cycle.

/// Core record and result types for slot scanning.
mod types;
pub use types::*;

/// Remote availability API client and response classification.
mod prober;
pub use prober::*;

/// Persistent slot stores (Postgres and in-memory).
mod store;
pub use store::*;

/// Change detection, persistence and notification formatting.
mod detector;
pub use detector::*;

/// The periodic scan cycle and its dynamic scheduler.
mod executor;
pub use executor::*;

/// Bounded background retries for waiting-room-blocked probes.
mod waiting_room;
pub use waiting_room::*;
