//! Persistent report log and destination rooms.
//!
//! The tracker depends only on the [`ReportStore`] trait. Reports are the
//! durable record of every "report this stream" decision and double as the
//! memory used for deduplication and restart-window computation.

pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A blocking database task panicked or was cancelled.
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp '{value}' in column {column}")]
    Timestamp { column: &'static str, value: String },

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration { message: String },

    /// The row already exists.
    #[error("already exists: {0}")]
    Duplicate(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Record of a decision to report a stream.
///
/// `(stream_id, started_at)` is unique. Only `observed_at` ever changes after
/// insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Owner of the stream
    pub owner_id: String,
    /// Stream instance id
    pub stream_id: String,
    /// When the stream went live
    pub started_at: DateTime<Utc>,
    /// Last time the stream was seen live (or the decision time)
    pub observed_at: DateTime<Utc>,
}

/// A chat room that receives announcements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    /// Room id in the messenger's own format
    pub id: String,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Storage operations the tracker and the room commands rely on.
///
/// Writes must be visible to subsequent reads issued through the same store.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Whether any report exists for `stream_id`, whatever its start time.
    async fn report_exists(&self, stream_id: &str) -> Result<bool>;

    /// The report for `owner_id` with the most recent `observed_at`.
    async fn latest_report_by_owner(&self, owner_id: &str) -> Result<Option<Report>>;

    /// Insert a report. Returns `false` when `(stream_id, started_at)` already
    /// exists, in which case the stored row is left untouched.
    async fn insert_report(&self, report: &Report) -> Result<bool>;

    /// Set `observed_at = at` on every report whose stream id is listed.
    /// Returns the number of rows touched.
    async fn refresh_observed_at(&self, stream_ids: &[String], at: DateTime<Utc>)
        -> Result<usize>;

    /// Every room that should receive announcements.
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    /// Add a room. Fails with [`StoreError::Duplicate`] if it is already there.
    async fn add_room(&self, room: &Room) -> Result<()>;

    /// Remove a room. Returns whether it existed.
    async fn remove_room(&self, room: &Room) -> Result<bool>;

    /// Every report, oldest first.
    async fn list_reports(&self) -> Result<Vec<Report>>;

    /// The report for one exact `(stream_id, started_at)` key.
    async fn report_for(&self, stream_id: &str, started_at: DateTime<Utc>)
        -> Result<Option<Report>>;
}

/// Storage format for timestamps: RFC3339, UTC, whole seconds.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(value: &str, column: &'static str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp {
            column,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_drops_subseconds() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
            + chrono::Duration::milliseconds(420);
        assert_eq!(format_timestamp(t), "2024-03-01T10:15:00Z");
    }

    #[test]
    fn test_parse_timestamp_normalises_offset() {
        let t = parse_timestamp("2024-03-01T12:15:00+02:00", "started_at").unwrap();
        assert_eq!(format_timestamp(t), "2024-03-01T10:15:00Z");
    }

    #[test]
    fn test_parse_timestamp_error_names_column() {
        let err = parse_timestamp("yesterday", "observed_at").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid timestamp 'yesterday' in column observed_at"
        );
    }

    #[test]
    fn test_room_display() {
        assert_eq!(Room::new("1234").to_string(), "1234");
    }
}
