//! The tracking engine.
//!
//! A [`Tracker`] consumes batches from a watcher, one at a time and in
//! arrival order, and decides which streams are news:
//!
//! ```text
//! batch ──► refresh observed_at ──► drop already live ──► collapse repeats
//!                                                             │
//!        ┌────────────────────────────────────────────────────┘
//!        ▼
//!   already reported? ── yes ──► skip
//!        │ no
//!        ▼
//!   owner seen within RESTART_WINDOW? ── yes ──► persist, stay quiet
//!        │ no
//!        ▼
//!   persist, announce to every room ──► replace live set
//! ```
//!
//! Two layers keep a stream from being announced twice: the in-memory live
//! set from the previous batch and the persisted report log. Nothing in this
//! loop is fatal; store and messenger failures are logged and counted.

pub mod stats;

use crate::clock::SharedClock;
use crate::messenger::Messenger;
use crate::store::{Report, ReportStore, Room};
use crate::stream::{Batch, Stream};
use crate::watcher::{BatchReceiver, PeriodicWatcher};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use stats::{SharedTrackerStats, TrackerSnapshot, TrackerStats};

/// How long after an owner was last seen a new stream counts as the same
/// session resuming.
pub const RESTART_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Read handle on the streams seen in the most recent batch.
///
/// Cloning yields another handle to the same set. Readers always see one
/// whole batch; the tracker swaps the set in a single write.
#[derive(Debug, Clone, Default)]
pub struct LiveStreams {
    inner: Arc<RwLock<Arc<Vec<Stream>>>>,
}

impl LiveStreams {
    /// The current live set.
    pub fn snapshot(&self) -> Arc<Vec<Stream>> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Whether a stream with this id was in the last batch.
    pub fn contains(&self, stream_id: &str) -> bool {
        self.inner.read().iter().any(|s| s.id == stream_id)
    }

    fn replace(&self, batch: Batch) {
        *self.inner.write() = Arc::new(batch);
    }
}

/// Stateful filter between the watcher and the messenger.
pub struct Tracker {
    store: Arc<dyn ReportStore>,
    messenger: Arc<dyn Messenger>,
    clock: SharedClock,
    live: LiveStreams,
    stats: SharedTrackerStats,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn ReportStore>,
        messenger: Arc<dyn Messenger>,
        clock: SharedClock,
    ) -> Self {
        let stats = Arc::new(TrackerStats::new(clock.now_utc()));
        Self {
            store,
            messenger,
            clock,
            live: LiveStreams::default(),
            stats,
        }
    }

    /// Handle on the live set for concurrent readers.
    pub fn live(&self) -> LiveStreams {
        self.live.clone()
    }

    /// Shared decision counters.
    pub fn stats(&self) -> SharedTrackerStats {
        Arc::clone(&self.stats)
    }

    /// Start `watcher` and track its output until `cancel` fires.
    pub async fn run(&self, watcher: PeriodicWatcher, cancel: CancellationToken) {
        let (rx, handle) = watcher.start(cancel);
        self.track(rx).await;
        if let Err(e) = handle.await {
            error!(error = %e, "watcher task failed");
        }
    }

    /// Process batches until the channel closes.
    pub async fn track(&self, mut rx: BatchReceiver) {
        info!("tracker started");

        while let Some(batch) = rx.recv().await {
            self.process_batch(batch).await;
        }

        info!("tracker stopped");
        info!("{}", self.stats.summary(self.clock.now_utc()));
    }

    /// Run the decision pipeline over one batch.
    pub async fn process_batch(&self, batch: Batch) {
        self.stats.record_batch();
        let now = self.clock.now_utc();

        debug!(streams = batch.len(), "processing batch");

        self.refresh_observed(&batch, now).await;

        let candidates = exclude_duplicates(self.exclude_known(&batch));
        let reportable = self.exclude_reported(candidates, now).await;

        let rooms = match self.store.list_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                self.stats.record_store_failure();
                error!(error = %e, "failed to list rooms, skipping batch");
                return;
            }
        };

        for stream in &reportable {
            if !self.persist(stream, now).await {
                continue;
            }
            self.stats.record_reported();
            info!(
                stream_id = %stream.id,
                owner_id = %stream.owner_id(),
                rooms = rooms.len(),
                "reporting stream"
            );
            self.deliver(&rooms, stream).await;
        }

        self.live.replace(batch);
    }

    async fn refresh_observed(&self, batch: &[Stream], now: DateTime<Utc>) {
        if batch.is_empty() {
            return;
        }

        let ids: Vec<String> = batch.iter().map(|s| s.id.clone()).collect();
        match self.store.refresh_observed_at(&ids, now).await {
            Ok(touched) => debug!(touched, "refreshed observed_at"),
            Err(e) => {
                self.stats.record_store_failure();
                warn!(error = %e, "failed to refresh observed_at");
            }
        }
    }

    /// Streams that were not in the previous batch.
    fn exclude_known(&self, batch: &[Stream]) -> Vec<Stream> {
        let live = self.live.snapshot();
        batch
            .iter()
            .filter(|s| !live.iter().any(|known| known.is_same_instance(s)))
            .cloned()
            .collect()
    }

    /// Apply the persisted-report check and the restart window.
    ///
    /// Only the first candidate with a given id is considered; later copies
    /// in the same batch are dropped whatever their other fields.
    ///
    /// Streams held back by the window are persisted here so they are never
    /// reconsidered.
    async fn exclude_reported(&self, candidates: Vec<Stream>, now: DateTime<Utc>) -> Vec<Stream> {
        let mut reportable = Vec::with_capacity(candidates.len());
        let mut decided: HashSet<String> = HashSet::with_capacity(candidates.len());

        for stream in candidates {
            if !decided.insert(stream.id.clone()) {
                debug!(stream_id = %stream.id, "already decided in this batch");
                continue;
            }

            match self.store.report_exists(&stream.id).await {
                Ok(true) => {
                    debug!(stream_id = %stream.id, "already reported");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    self.stats.record_store_failure();
                    warn!(stream_id = %stream.id, error = %e, "failed to look up report");
                    continue;
                }
            }

            let last_seen = match self.store.latest_report_by_owner(stream.owner_id()).await {
                Ok(report) => report.map(|r| r.observed_at),
                Err(e) => {
                    self.stats.record_store_failure();
                    warn!(owner_id = %stream.owner_id(), error = %e, "failed to look up last report");
                    None
                }
            };

            if is_new_appearance(last_seen, now) {
                reportable.push(stream);
            } else {
                debug!(
                    stream_id = %stream.id,
                    owner_id = %stream.owner_id(),
                    "restart within window, not announcing"
                );
                if self.persist(&stream, now).await {
                    self.stats.record_suppressed();
                }
            }
        }

        reportable
    }

    /// Insert the report for `stream`. Returns `true` only for a new row.
    async fn persist(&self, stream: &Stream, now: DateTime<Utc>) -> bool {
        let report = Report {
            owner_id: stream.owner_id().to_string(),
            stream_id: stream.id.clone(),
            started_at: stream.started_at,
            observed_at: now,
        };

        match self.store.insert_report(&report).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(stream_id = %stream.id, "report already stored");
                false
            }
            Err(e) => {
                self.stats.record_store_failure();
                error!(stream_id = %stream.id, error = %e, "failed to store report");
                false
            }
        }
    }

    /// Announce to each room in order; stop at the first failure.
    async fn deliver(&self, rooms: &[Room], stream: &Stream) {
        for room in rooms {
            if let Err(e) = self.messenger.message_stream(room, stream).await {
                self.stats.record_delivery_failure();
                warn!(
                    stream_id = %stream.id,
                    room = %room,
                    error = %e,
                    "failed to report stream"
                );
                break;
            }
        }
    }
}

/// Collapse repeats of an identical stream, keeping first-seen order.
fn exclude_duplicates(streams: Vec<Stream>) -> Vec<Stream> {
    let mut unique: Vec<Stream> = Vec::with_capacity(streams.len());
    for stream in streams {
        if !unique.contains(&stream) {
            unique.push(stream);
        }
    }
    unique
}

/// Whether an owner last seen at `last_seen` is starting a new session.
fn is_new_appearance(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_seen {
        None => true,
        Some(t) => (now - t).num_seconds() > RESTART_WINDOW.as_secs() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::messenger::MemoryMessenger;
    use crate::store::SqliteStore;
    use crate::stream::User;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn stream(id: &str, owner: &str, title: &str) -> Stream {
        Stream {
            id: id.to_string(),
            user: User::with_id(owner),
            title: title.to_string(),
            thumbnail_url: String::new(),
            started_at: t0(),
        }
    }

    #[test]
    fn test_exclude_duplicates_keeps_first_seen_order() {
        let out = exclude_duplicates(vec![
            stream("b", "u", ""),
            stream("a", "u", ""),
            stream("b", "u", ""),
        ]);
        let ids: Vec<_> = out.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_exclude_duplicates_compares_whole_value() {
        let out = exclude_duplicates(vec![stream("a", "u", "one"), stream("a", "u", "two")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_restart_window_is_strict() {
        let now = t0();
        assert!(is_new_appearance(None, now));
        assert!(!is_new_appearance(Some(now - ChronoDuration::hours(1)), now));
        assert!(is_new_appearance(
            Some(now - ChronoDuration::hours(1) - ChronoDuration::seconds(1)),
            now
        ));
        assert!(!is_new_appearance(Some(now - ChronoDuration::minutes(5)), now));
    }

    #[tokio::test]
    async fn test_live_set_is_replaced_wholesale() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let messenger = Arc::new(MemoryMessenger::new());
        let tracker = Tracker::new(store, messenger, Arc::new(ManualClock::new(t0())));
        let live = tracker.live();

        tracker
            .process_batch(vec![stream("a", "u1", ""), stream("b", "u2", "")])
            .await;
        assert_eq!(live.len(), 2);
        assert!(live.contains("a"));

        tracker.process_batch(vec![stream("c", "u3", "")]).await;
        assert_eq!(live.len(), 1);
        assert!(!live.contains("a"));

        tracker.process_batch(Vec::new()).await;
        assert!(live.is_empty());
        assert_eq!(tracker.stats().snapshot(t0()).batches_processed, 3);
    }

    #[tokio::test]
    async fn test_same_id_different_title_in_one_batch_announced_once() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.add_room(&Room::new("room1")).await.unwrap();
        let messenger = Arc::new(MemoryMessenger::new());
        let tracker = Tracker::new(
            store,
            messenger.clone(),
            Arc::new(ManualClock::new(t0())),
        );

        tracker
            .process_batch(vec![stream("a", "u1", "one"), stream("a", "u1", "two")])
            .await;
        assert_eq!(messenger.announced(), vec!["a"]);
    }
}
