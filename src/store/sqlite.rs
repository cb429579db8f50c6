//! `SQLite` implementation of [`ReportStore`].
//!
//! Connections come from an `r2d2` pool; every operation runs on the blocking
//! thread pool so the tracker's async loop never stalls on disk I/O.

use super::migrations::run_migrations;
use super::{format_timestamp, parse_timestamp, Report, ReportStore, Result, Room, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Runs on each new pooled connection.
#[derive(Debug)]
struct PragmaCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = 5000;\
             PRAGMA synchronous = NORMAL;",
        )
    }
}

/// Report store backed by a `SQLite` file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Migration {
                    message: format!("cannot create {}: {e}", parent.display()),
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        Self::with_manager(manager, 4)
    }

    /// Open a private in-memory database.
    ///
    /// The pool holds a single connection that is never recycled: every
    /// in-memory connection is its own database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, size: u32) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(size)
            .connection_timeout(Duration::from_secs(5))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(PragmaCustomizer))
            .build(manager)?;

        {
            let mut conn = pool.get()?;
            run_migrations(&mut conn)?;
        }

        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await?
    }
}

const REPORT_COLUMNS: &str = "owner_id, stream_id, started_at, observed_at";

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        owner_id: row.get(0)?,
        stream_id: row.get(1)?,
        started_at: row.get(2)?,
        observed_at: row.get(3)?,
    })
}

/// Report as stored, with unparsed timestamps.
struct ReportRow {
    owner_id: String,
    stream_id: String,
    started_at: String,
    observed_at: String,
}

impl ReportRow {
    fn into_report(self) -> Result<Report> {
        Ok(Report {
            started_at: parse_timestamp(&self.started_at, "started_at")?,
            observed_at: parse_timestamp(&self.observed_at, "observed_at")?,
            owner_id: self.owner_id,
            stream_id: self.stream_id,
        })
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn report_exists(&self, stream_id: &str) -> Result<bool> {
        let stream_id = stream_id.to_string();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM reports WHERE stream_id = ?1 LIMIT 1",
                    params![stream_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn latest_report_by_owner(&self, owner_id: &str) -> Result<Option<Report>> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {REPORT_COLUMNS} FROM reports
                         WHERE owner_id = ?1
                         ORDER BY datetime(observed_at) DESC, rowid DESC
                         LIMIT 1"
                    ),
                    params![owner_id],
                    row_to_report,
                )
                .optional()?;
            row.map(ReportRow::into_report).transpose()
        })
        .await
    }

    async fn insert_report(&self, report: &Report) -> Result<bool> {
        let report = report.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO reports (owner_id, stream_id, started_at, observed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    report.owner_id,
                    report.stream_id,
                    format_timestamp(report.started_at),
                    format_timestamp(report.observed_at),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn refresh_observed_at(
        &self,
        stream_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<usize> {
        if stream_ids.is_empty() {
            return Ok(0);
        }

        let stream_ids = stream_ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = (0..stream_ids.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql =
                format!("UPDATE reports SET observed_at = ?1 WHERE stream_id IN ({placeholders})");
            let values = std::iter::once(format_timestamp(at)).chain(stream_ids);
            Ok(conn.execute(&sql, params_from_iter(values))?)
        })
        .await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT room_id FROM rooms ORDER BY rowid")?;
            let rooms = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|id| id.map(Room::new))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rooms)
        })
        .await
    }

    async fn add_room(&self, room: &Room) -> Result<()> {
        let room = room.clone();
        self.with_conn(move |conn| {
            match conn.execute("INSERT INTO rooms (room_id) VALUES (?1)", params![room.id]) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate(format!("room {}", room.id)))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn remove_room(&self, room: &Room) -> Result<bool> {
        let room = room.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM rooms WHERE room_id = ?1", params![room.id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {REPORT_COLUMNS} FROM reports ORDER BY rowid"))?;
            let rows = stmt
                .query_map([], row_to_report)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(ReportRow::into_report).collect()
        })
        .await
    }

    async fn report_for(
        &self,
        stream_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Report>> {
        let stream_id = stream_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {REPORT_COLUMNS} FROM reports
                         WHERE stream_id = ?1 AND started_at = ?2"
                    ),
                    params![stream_id, format_timestamp(started_at)],
                    row_to_report,
                )
                .optional()?;
            row.map(ReportRow::into_report).transpose()
        })
        .await
    }
}
