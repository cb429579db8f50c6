//! livewatch - announces newly live streams to chat rooms.
//!
//! The streaming service is polled on a fixed interval. Each poll yields a
//! batch of every live stream; the tracker turns that noisy sequence into
//! at most one announcement per stream session and records every decision
//! in a report database.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          livewatch                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐  batches  ┌───────────┐        │
//! │  │  Fetcher  │──▶│  Watcher  │──────────▶│  Tracker  │        │
//! │  │ (Twitch)  │   │  (timer)  │  channel  │ (dedup)   │        │
//! │  └───────────┘   └───────────┘           └─────┬─────┘        │
//! │                                                │              │
//! │                        ┌───────────────────────┼──────┐       │
//! │                        ▼                       ▼      ▼       │
//! │                 ┌────────────┐        ┌───────────┐ ┌──────┐  │
//! │                 │ Report DB  │        │ Messenger │ │ Live │  │
//! │                 │ (SQLite)   │        │ (Discord) │ │ set  │  │
//! │                 └────────────┘        └───────────┘ └──────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use livewatch::{clock, MemoryMessenger, SqliteStore, Tracker};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! let messenger = Arc::new(MemoryMessenger::new());
//! let tracker = Tracker::new(store, messenger, clock::system());
//!
//! tracker.process_batch(Vec::new()).await;
//! assert!(tracker.live().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod clock;
pub mod commands;
pub mod config;
pub mod messenger;
pub mod store;
pub mod stream;
pub mod tracker;
pub mod watcher;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use commands::{Command, CommandError, CommandHandler, HELP_TEXT};
pub use config::{Config, ConfigError};
pub use messenger::{DiscordMessenger, MemoryMessenger, Messenger, MessengerError};
pub use store::{Report, ReportStore, Room, SqliteStore, StoreError};
pub use stream::{Batch, FetchError, Fetcher, Stream, TwitchFetcher, User};
pub use tracker::{LiveStreams, Tracker, TrackerSnapshot, RESTART_WINDOW};
pub use watcher::PeriodicWatcher;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
