//! End-to-end tests for the tracking engine.
//!
//! Each test drives a real `Tracker` against an in-memory `SqliteStore`, a
//! `ManualClock` and a recording messenger.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use livewatch::clock::ManualClock;
use livewatch::messenger::MemoryMessenger;
use livewatch::store::{self, Report, ReportStore, Room, SqliteStore, StoreError};
use livewatch::stream::{Batch, FetchError, Fetcher, Stream, User};
use livewatch::tracker::Tracker;
use livewatch::watcher::{batch_channel, PeriodicWatcher};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn stream(id: &str, owner: &str, started_at: DateTime<Utc>) -> Stream {
    Stream {
        id: id.to_string(),
        user: User::with_id(owner),
        title: format!("{owner} is live"),
        thumbnail_url: format!("https://cdn.example/{id}.jpg"),
        started_at,
    }
}

struct Harness {
    store: Arc<SqliteStore>,
    messenger: Arc<MemoryMessenger>,
    clock: ManualClock,
    tracker: Tracker,
}

async fn harness_with_rooms(rooms: &[&str]) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    for room in rooms {
        store.add_room(&Room::new(*room)).await.unwrap();
    }
    let messenger = Arc::new(MemoryMessenger::new());
    let clock = ManualClock::new(t0());
    let tracker = Tracker::new(store.clone(), messenger.clone(), Arc::new(clock.clone()));
    Harness {
        store,
        messenger,
        clock,
        tracker,
    }
}

async fn harness() -> Harness {
    harness_with_rooms(&["room1"]).await
}

impl Harness {
    async fn poke(&self, batch: Batch) {
        self.tracker.process_batch(batch).await;
    }

    async fn reports(&self) -> Vec<Report> {
        self.store.list_reports().await.unwrap()
    }
}

#[tokio::test]
async fn test_stream_is_reported() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0())]).await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
    assert_eq!(
        h.reports().await,
        vec![Report {
            owner_id: "user1".to_string(),
            stream_id: "stream1".to_string(),
            started_at: t0(),
            observed_at: t0(),
        }]
    );
}

#[tokio::test]
async fn test_same_stream_twice_in_one_batch_reported_once() {
    let h = harness().await;

    h.poke(vec![
        stream("stream1", "user1", t0()),
        stream("stream1", "user1", t0()),
    ])
    .await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
    assert_eq!(h.reports().await.len(), 1);
}

#[tokio::test]
async fn test_same_id_with_different_start_in_one_batch_reported_once() {
    let h = harness().await;

    h.poke(vec![
        stream("stream1", "user1", t0()),
        stream("stream1", "user1", t0() + Duration::seconds(1)),
    ])
    .await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
    let reports = h.reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].started_at, t0());
}

#[tokio::test]
async fn test_same_id_repeated_within_restart_window_written_once() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0())]).await;
    h.poke(Vec::new()).await;
    h.clock.advance(Duration::minutes(10));
    h.poke(vec![
        stream("stream2", "user1", t0() + Duration::minutes(10)),
        stream("stream2", "user1", t0() + Duration::minutes(11)),
    ])
    .await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
    assert_eq!(h.reports().await.len(), 2);
    assert_eq!(h.tracker.stats().snapshot(t0()).streams_suppressed, 1);
}

#[tokio::test]
async fn test_consecutive_batches_do_not_renotify() {
    let h = harness().await;

    for minutes in 0..5 {
        h.clock.set(t0() + Duration::minutes(minutes));
        h.poke(vec![stream("stream1", "user1", t0())]).await;
    }

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
    assert_eq!(h.reports().await.len(), 1);
}

#[tokio::test]
async fn test_interleaved_stream_is_reported_once() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0())]).await;
    h.poke(Vec::new()).await;
    h.poke(vec![stream("stream1", "user1", t0())]).await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
}

#[tokio::test]
async fn test_restart_within_one_hour_single_report() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0() - Duration::minutes(10))])
        .await;
    h.clock.advance(Duration::minutes(10));
    h.poke(vec![stream("stream2", "user1", t0())]).await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);

    // Both decisions are on record.
    let reports = h.reports().await;
    let ids: Vec<_> = reports.iter().map(|r| r.stream_id.as_str()).collect();
    assert_eq!(ids, vec!["stream1", "stream2"]);
    assert_eq!(reports[1].observed_at, t0() + Duration::minutes(10));
    assert_eq!(h.tracker.stats().snapshot(t0()).streams_suppressed, 1);
}

#[tokio::test]
async fn test_restart_after_more_than_an_hour_both_reported() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0())]).await;
    h.clock.advance(Duration::hours(1) + Duration::minutes(10));
    h.poke(vec![stream(
        "stream2",
        "user1",
        t0() + Duration::hours(1) + Duration::minutes(10),
    )])
    .await;

    assert_eq!(h.messenger.announced(), vec!["stream1", "stream2"]);
}

#[tokio::test]
async fn test_restart_window_boundary_is_exclusive() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0())]).await;
    h.poke(Vec::new()).await;

    h.clock.advance(Duration::hours(1));
    h.poke(vec![stream("stream2", "user1", t0() + Duration::hours(1))])
        .await;
    assert_eq!(h.messenger.announced(), vec!["stream1"]);

    h.poke(Vec::new()).await;
    h.clock.advance(Duration::hours(1) + Duration::seconds(1));
    h.poke(vec![stream("stream3", "user1", t0() + Duration::hours(2))])
        .await;
    assert_eq!(h.messenger.announced(), vec!["stream1", "stream3"]);
}

#[tokio::test]
async fn test_same_stream_hour_later_is_not_rereported() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0())]).await;
    h.poke(Vec::new()).await;
    h.clock.advance(Duration::hours(2));
    h.poke(vec![stream("stream1", "user1", t0())]).await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
    assert_eq!(h.reports().await.len(), 1);
}

#[tokio::test]
async fn test_observed_at_freshens_on_resighting() {
    let h = harness().await;

    h.poke(vec![stream("stream1", "user1", t0())]).await;
    h.clock.advance(Duration::minutes(20));
    h.poke(vec![stream("stream1", "user1", t0())]).await;

    let reports = h.reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].started_at, t0());
    assert_eq!(reports[0].observed_at, t0() + Duration::minutes(20));
    assert_eq!(h.messenger.announced(), vec!["stream1"]);
}

#[tokio::test]
async fn test_long_running_stream_keeps_owner_window_open() {
    let h = harness().await;

    // Live for three hours, polled every half hour.
    for half_hours in 0..=6 {
        h.clock.set(t0() + Duration::minutes(30 * half_hours));
        h.poke(vec![stream("stream1", "user1", t0())]).await;
    }

    // Drops and comes straight back under a new id.
    h.clock.advance(Duration::minutes(5));
    h.poke(vec![stream("stream2", "user1", t0() + Duration::hours(3))])
        .await;

    assert_eq!(h.messenger.announced(), vec!["stream1"]);
}

#[tokio::test]
async fn test_restart_scenario_counts_from_last_sighting() {
    let h = harness().await;
    let t = t0();

    // Batch 1: a new stream is announced.
    h.poke(vec![stream("stream1", "user1", t)]).await;
    assert_eq!(h.messenger.announced(), vec!["stream1"]);

    // Batch 2, 30 minutes later: a restart, recorded but not announced.
    h.clock.set(t + Duration::minutes(30));
    h.poke(vec![stream("stream2", "user1", t + Duration::minutes(30))])
        .await;
    assert_eq!(h.messenger.announced(), vec!["stream1"]);
    let stream2 = h
        .store
        .report_for("stream2", t + Duration::minutes(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stream2.owner_id, "user1");

    // Batch 3: more than an hour since the owner was last seen.
    h.poke(Vec::new()).await;
    h.clock.set(t + Duration::minutes(30 + 70));
    h.poke(vec![stream("stream3", "user1", t + Duration::minutes(100))])
        .await;
    assert_eq!(h.messenger.announced(), vec!["stream1", "stream3"]);
    assert_eq!(h.reports().await.len(), 3);
}

#[tokio::test]
async fn test_rooms_notified_in_order_and_failure_aborts_only_that_stream() {
    let h = harness_with_rooms(&["r1", "r2", "r3"]).await;
    h.messenger.fail_room("r2");

    h.poke(vec![stream("a", "u1", t0()), stream("b", "u2", t0())])
        .await;

    let rooms: Vec<(String, String)> = h
        .messenger
        .deliveries()
        .iter()
        .map(|d| (d.room().to_string(), format!("{d:?}")))
        .collect();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].0, "r1");
    assert!(rooms[0].1.contains("\"a\""));
    assert_eq!(rooms[1].0, "r1");
    assert!(rooms[1].1.contains("\"b\""));

    // Delivery failures never roll back the decision.
    assert_eq!(h.reports().await.len(), 2);
    let stats = h.tracker.stats().snapshot(t0());
    assert_eq!(stats.streams_reported, 2);
    assert_eq!(stats.delivery_failures, 2);

    // And the stream is not retried on the next poll.
    h.messenger.heal_room("r2");
    h.poke(vec![stream("a", "u1", t0()), stream("b", "u2", t0())])
        .await;
    assert_eq!(h.messenger.announced(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_room_changes_apply_from_next_batch() {
    let h = harness_with_rooms(&[]).await;

    h.poke(vec![stream("a", "u1", t0())]).await;
    assert!(h.messenger.announced().is_empty());
    assert_eq!(h.reports().await.len(), 1);

    h.store.add_room(&Room::new("late")).await.unwrap();
    h.poke(vec![stream("a", "u1", t0()), stream("b", "u2", t0())])
        .await;

    assert_eq!(h.messenger.announced(), vec!["b"]);
}

#[tokio::test]
async fn test_new_streams_announced_in_first_seen_order() {
    let h = harness().await;

    h.poke(vec![
        stream("c", "u3", t0()),
        stream("a", "u1", t0()),
        stream("c", "u3", t0()),
        stream("b", "u2", t0()),
    ])
    .await;

    assert_eq!(h.messenger.announced(), vec!["c", "a", "b"]);
}

#[tokio::test]
async fn test_track_runs_until_channel_closes() {
    let h = harness().await;
    let (tx, rx) = batch_channel(4);

    tx.send(vec![stream("stream1", "user1", t0())]).await.unwrap();
    tx.send(vec![stream("stream1", "user1", t0())]).await.unwrap();
    tx.send(vec![stream("stream2", "user2", t0())]).await.unwrap();
    drop(tx);

    h.tracker.track(rx).await;

    assert_eq!(h.messenger.announced(), vec!["stream1", "stream2"]);
    assert_eq!(h.tracker.stats().snapshot(t0()).batches_processed, 3);
    assert!(h.tracker.live().contains("stream2"));
}

/// Store wrapper whose room listing can be made to fail.
struct FlakyStore {
    inner: SqliteStore,
    fail_rooms: AtomicBool,
}

#[async_trait]
impl ReportStore for FlakyStore {
    async fn report_exists(&self, stream_id: &str) -> store::Result<bool> {
        self.inner.report_exists(stream_id).await
    }

    async fn latest_report_by_owner(&self, owner_id: &str) -> store::Result<Option<Report>> {
        self.inner.latest_report_by_owner(owner_id).await
    }

    async fn insert_report(&self, report: &Report) -> store::Result<bool> {
        self.inner.insert_report(report).await
    }

    async fn refresh_observed_at(
        &self,
        stream_ids: &[String],
        at: DateTime<Utc>,
    ) -> store::Result<usize> {
        self.inner.refresh_observed_at(stream_ids, at).await
    }

    async fn list_rooms(&self) -> store::Result<Vec<Room>> {
        if self.fail_rooms.load(Ordering::SeqCst) {
            return Err(StoreError::Migration {
                message: "rooms unavailable".to_string(),
            });
        }
        self.inner.list_rooms().await
    }

    async fn add_room(&self, room: &Room) -> store::Result<()> {
        self.inner.add_room(room).await
    }

    async fn remove_room(&self, room: &Room) -> store::Result<bool> {
        self.inner.remove_room(room).await
    }

    async fn list_reports(&self) -> store::Result<Vec<Report>> {
        self.inner.list_reports().await
    }

    async fn report_for(
        &self,
        stream_id: &str,
        started_at: DateTime<Utc>,
    ) -> store::Result<Option<Report>> {
        self.inner.report_for(stream_id, started_at).await
    }
}

#[tokio::test]
async fn test_room_listing_failure_defers_batch() {
    let store = Arc::new(FlakyStore {
        inner: SqliteStore::open_in_memory().unwrap(),
        fail_rooms: AtomicBool::new(true),
    });
    store.add_room(&Room::new("room1")).await.unwrap();
    let messenger = Arc::new(MemoryMessenger::new());
    let tracker = Tracker::new(
        store.clone(),
        messenger.clone(),
        Arc::new(ManualClock::new(t0())),
    );

    tracker.process_batch(vec![stream("a", "u1", t0())]).await;
    assert!(messenger.announced().is_empty());
    assert!(store.list_reports().await.unwrap().is_empty());
    assert!(tracker.live().is_empty());
    assert_eq!(tracker.stats().snapshot(t0()).store_failures, 1);

    // The next batch reconsiders the stream.
    store.fail_rooms.store(false, Ordering::SeqCst);
    tracker.process_batch(vec![stream("a", "u1", t0())]).await;
    assert_eq!(messenger.announced(), vec!["a"]);
}

/// Replays batches, then cancels the run.
struct ScriptedFetcher {
    script: Mutex<VecDeque<Batch>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _cancel: &CancellationToken) -> Result<Batch, FetchError> {
        match self.script.lock().pop_front() {
            Some(batch) => Ok(batch),
            None => {
                self.cancel.cancel();
                Err(FetchError::Cancelled)
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_with_watcher_until_cancelled() {
    let h = harness().await;
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(ScriptedFetcher {
        script: Mutex::new(VecDeque::from(vec![
            vec![stream("stream1", "user1", t0())],
            vec![stream("stream1", "user1", t0()), stream("stream2", "user2", t0())],
            Vec::new(),
        ])),
        cancel: cancel.clone(),
    });

    let watcher = PeriodicWatcher::new(fetcher, std::time::Duration::from_secs(30));
    h.tracker.run(watcher, cancel).await;

    assert_eq!(h.messenger.announced(), vec!["stream1", "stream2"]);
    assert!(h.tracker.live().is_empty());
}
