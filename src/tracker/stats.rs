//! Decision counters for the tracking loop.
//!
//! Counts only. Nothing about individual streams is retained here; the
//! report table is the record of what was decided.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for one tracker instance.
#[derive(Debug)]
pub struct TrackerStats {
    /// Batches taken off the channel
    batches_processed: AtomicU64,
    /// Streams persisted and sent to rooms
    streams_reported: AtomicU64,
    /// Streams persisted but held back by the restart window
    streams_suppressed: AtomicU64,
    /// Messenger calls that failed
    delivery_failures: AtomicU64,
    /// Store calls that failed
    store_failures: AtomicU64,
    started_at: DateTime<Utc>,
}

impl TrackerStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            batches_processed: AtomicU64::new(0),
            streams_reported: AtomicU64::new(0),
            streams_suppressed: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            started_at,
        }
    }

    pub fn record_batch(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reported(&self) {
        self.streams_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.streams_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TrackerSnapshot {
        TrackerSnapshot {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            streams_reported: self.streams_reported.load(Ordering::Relaxed),
            streams_suppressed: self.streams_suppressed.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Multi-line summary for the shutdown log.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let s = self.snapshot(now);
        format!(
            "Tracker statistics:\n\
             - Batches processed: {}\n\
             - Streams reported: {}\n\
             - Streams suppressed (restart window): {}\n\
             - Delivery failures: {}\n\
             - Store failures: {}\n\
             - Uptime: {} seconds",
            s.batches_processed,
            s.streams_reported,
            s.streams_suppressed,
            s.delivery_failures,
            s.store_failures,
            s.uptime_secs
        )
    }
}

/// Serializable view of [`TrackerStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub batches_processed: u64,
    pub streams_reported: u64,
    pub streams_suppressed: u64,
    pub delivery_failures: u64,
    pub store_failures: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats shared between the tracker and its readers.
pub type SharedTrackerStats = Arc<TrackerStats>;
