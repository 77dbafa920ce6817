//! rollcall-store — SQLite persistence for registered faces and attendance.
//!
//! Registered identities live in `faces`, one row per worker id; a
//! re-registration replaces the row and moves it to the end of store order.
//! Attendance marks live in `attendance` with no uniqueness constraint:
//! one-mark-per-day is a policy of [`rollcall_core::record_attendance`].

use chrono::{DateTime, Local, NaiveDate};
use rollcall_core::{AttendanceLog, AttendanceMark, IdentityRecord};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS faces (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        worker_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        photo_path TEXT NOT NULL,
        enrolled_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        date TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS attendance_date ON attendance(date);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persistent entry store.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Register a face, superseding any earlier registration of `worker_id`.
    pub fn register(
        &self,
        worker_id: &str,
        name: &str,
        photo_path: &Path,
    ) -> Result<IdentityRecord, StoreError> {
        let worker_id = worker_id.trim();
        let name = name.trim();
        if worker_id.is_empty() {
            return Err(StoreError::InvalidInput("worker id is empty".into()));
        }
        if name.is_empty() {
            return Err(StoreError::InvalidInput("name is empty".into()));
        }
        // Stored as TEXT; a lossy conversion would point at a different file.
        let Some(photo) = photo_path.to_str() else {
            return Err(StoreError::InvalidInput(format!(
                "photo path is not valid UTF-8: {}",
                photo_path.display()
            )));
        };

        let enrolled_at = Local::now();
        self.conn.execute(
            "INSERT OR REPLACE INTO faces (worker_id, name, photo_path, enrolled_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![worker_id, name, photo, enrolled_at.to_rfc3339()],
        )?;
        tracing::info!(worker_id, name, "face registered");

        Ok(IdentityRecord {
            worker_id: worker_id.to_string(),
            name: name.to_string(),
            photo_path: photo_path.to_path_buf(),
            enrolled_at,
        })
    }

    /// All registered identities in store order.
    pub fn identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT worker_id, name, photo_path, enrolled_at FROM faces ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], raw_identity)?;
        let records = rows.map(|row| IdentityRecord::try_from(row?)).collect();
        records
    }

    pub fn identity(&self, worker_id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT worker_id, name, photo_path, enrolled_at FROM faces WHERE worker_id = ?1",
                params![worker_id],
                raw_identity,
            )
            .optional()?
            .map(IdentityRecord::try_from)
            .transpose()
    }

    /// Remove a registration. Returns whether a row existed.
    pub fn remove(&self, worker_id: &str) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM faces WHERE worker_id = ?1", params![worker_id])?;
        if n > 0 {
            tracing::info!(worker_id, "face removed");
        }
        Ok(n > 0)
    }

    pub fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, date, timestamp FROM attendance WHERE date = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], raw_mark)?;
        let records = rows.map(|row| AttendanceMark::try_from(row?)).collect();
        records
    }

    pub fn all_attendance(&self) -> Result<Vec<AttendanceMark>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, date, timestamp FROM attendance ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], raw_mark)?;
        let records = rows.map(|row| AttendanceMark::try_from(row?)).collect();
        records
    }

    pub fn insert_mark(&self, mark: &AttendanceMark) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO attendance (id, name, date, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                mark.id,
                mark.name,
                mark.date.format(DATE_FORMAT).to_string(),
                mark.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

impl AttendanceLog for Store {
    type Error = StoreError;

    fn marks_on(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, StoreError> {
        self.attendance_on(date)
    }

    fn append(&mut self, mark: AttendanceMark) -> Result<(), StoreError> {
        self.insert_mark(&mark)
    }
}

/// Column values of a `faces` row before parsing.
struct RawIdentity {
    worker_id: String,
    name: String,
    photo_path: String,
    enrolled_at: String,
}

fn raw_identity(row: &Row<'_>) -> rusqlite::Result<RawIdentity> {
    Ok(RawIdentity {
        worker_id: row.get(0)?,
        name: row.get(1)?,
        photo_path: row.get(2)?,
        enrolled_at: row.get(3)?,
    })
}

impl TryFrom<RawIdentity> for IdentityRecord {
    type Error = StoreError;

    fn try_from(raw: RawIdentity) -> Result<Self, StoreError> {
        Ok(IdentityRecord {
            enrolled_at: parse_timestamp(&raw.enrolled_at)?,
            worker_id: raw.worker_id,
            name: raw.name,
            photo_path: PathBuf::from(raw.photo_path),
        })
    }
}

struct RawMark {
    id: String,
    name: String,
    date: String,
    timestamp: String,
}

fn raw_mark(row: &Row<'_>) -> rusqlite::Result<RawMark> {
    Ok(RawMark {
        id: row.get(0)?,
        name: row.get(1)?,
        date: row.get(2)?,
        timestamp: row.get(3)?,
    })
}

impl TryFrom<RawMark> for AttendanceMark {
    type Error = StoreError;

    fn try_from(raw: RawMark) -> Result<Self, StoreError> {
        let date = NaiveDate::parse_from_str(&raw.date, DATE_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("attendance date {:?}: {e}", raw.date)))?;
        Ok(AttendanceMark {
            timestamp: parse_timestamp(&raw.timestamp)?,
            id: raw.id,
            name: raw.name,
            date,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Local>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s:?}: {e}")))
}
