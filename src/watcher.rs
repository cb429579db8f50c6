//! Periodic snapshot source.
//!
//! A [`PeriodicWatcher`] wraps a [`Fetcher`] behind a fixed-interval timer and
//! pushes every successful snapshot onto a channel consumed by the tracker.
//! Fetch failures are logged and the tick is skipped; the next tick retries.
//!
//! The channel closing is the consumer's only termination signal: once the
//! cancellation token fires, the loop finishes its current tick, drops its
//! sender, and `recv()` on the other side yields `None`.

use crate::stream::{Batch, Fetcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiving half of a watcher's output.
pub type BatchReceiver = mpsc::Receiver<Batch>;

/// Sending half of a watcher's output.
pub type BatchSender = mpsc::Sender<Batch>;

/// Create a batch channel with room for `buffer` pending batches.
pub fn batch_channel(buffer: usize) -> (BatchSender, BatchReceiver) {
    mpsc::channel(buffer.max(1))
}

/// Polls a fetcher on a fixed interval.
pub struct PeriodicWatcher {
    fetcher: Arc<dyn Fetcher>,
    period: Duration,
    buffer: usize,
}

impl PeriodicWatcher {
    /// Create a watcher that fetches once every `period`.
    pub fn new(fetcher: Arc<dyn Fetcher>, period: Duration) -> Self {
        Self {
            fetcher,
            period,
            buffer: 1,
        }
    }

    /// Set how many batches may queue up while the consumer is busy.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Polling period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the polling loop and return its output channel.
    pub fn start(self, cancel: CancellationToken) -> (BatchReceiver, JoinHandle<()>) {
        let (tx, rx) = batch_channel(self.buffer);
        let handle = tokio::spawn(async move { self.run(tx, cancel).await });
        (rx, handle)
    }

    /// Run the polling loop until cancelled or the consumer goes away.
    ///
    /// The first fetch happens one full period after the call.
    pub async fn run(self, tx: BatchSender, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = self.period.as_secs_f64(), "watcher started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.check(&tx, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!("watcher stopped");
    }

    /// One tick. Returns `false` when the loop should stop.
    async fn check(&self, tx: &BatchSender, cancel: &CancellationToken) -> bool {
        let batch = match self.fetcher.fetch(cancel).await {
            Ok(batch) => batch,
            Err(e) if e.is_cancelled() => {
                debug!("fetch cancelled");
                return !cancel.is_cancelled();
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch stream list");
                return true;
            }
        };

        debug!(streams = batch.len(), "fetched stream list");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tx.send(batch) => {
                if sent.is_err() {
                    debug!("batch consumer dropped");
                }
                sent.is_ok()
            }
        }
    }
}
