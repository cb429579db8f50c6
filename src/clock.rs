//! Time source for the tracking engine.
//!
//! Every timestamp the tracker stores or compares comes from a [`Clock`].
//! Production code uses [`SystemClock`]; tests drive a [`ManualClock`] so
//! restart-window decisions can be checked without waiting an hour.
//!
//! All instants are UTC with whole-second precision, which is also the
//! precision reports are persisted with.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant, UTC, truncated to whole seconds.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Time elapsed between `t` and now.
    fn since(&self, t: DateTime<Utc>) -> Duration {
        self.now_utc() - t
    }
}

/// Clock shared between the tracker and anything else that needs "now".
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// Create a shared wall clock.
pub fn system() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock that only moves when told to.
///
/// Cloning a `ManualClock` yields a handle to the same instant, so a test can
/// keep one handle and give another to the tracker.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock fixed at `t`.
    pub fn new(t: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(t.trunc_subsecs(0))),
        }
    }

    /// Create a clock fixed at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Jump to a specific instant.
    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.write() = t.trunc_subsecs(0);
    }

    /// Move forward by `d`.
    pub fn advance(&self, d: Duration) {
        let mut now = self.now.write();
        *now = (*now + d).trunc_subsecs(0);
    }

    /// Move backward by `d`.
    pub fn rewind(&self, d: Duration) {
        self.advance(-d);
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
