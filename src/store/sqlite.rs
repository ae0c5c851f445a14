//! SQLite-backed sandbox task queue.
//!
//! Schema (created if missing):
//!
//! ```sql
//! CREATE TABLE tasks (
//!     id       INTEGER PRIMARY KEY AUTOINCREMENT,
//!     target   TEXT NOT NULL,
//!     sha256   TEXT NOT NULL UNIQUE,
//!     timeout  INTEGER,
//!     package  TEXT NOT NULL,
//!     priority INTEGER,
//!     custom   TEXT,
//!     machine  TEXT NOT NULL,
//!     status   TEXT NOT NULL DEFAULT 'pending',
//!     added_on TEXT NOT NULL
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{FilterError, Result};
use crate::model::submission::{Fingerprint, InsertOutcome, SubmissionRecord};

use super::TaskStore;

/// How long a writer waits for a lock held by a concurrent invocation.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target TEXT NOT NULL,
    sha256 TEXT NOT NULL UNIQUE,
    timeout INTEGER,
    package TEXT NOT NULL,
    priority INTEGER,
    custom TEXT,
    machine TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    added_on TEXT NOT NULL
)";

/// A connection to the task database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (and if necessary create) the task database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let connect_err = |e: rusqlite::Error| FilterError::StoreConnect {
            location: path.display().to_string(),
            reason: e.to_string(),
        };

        let conn = Connection::open(path).map_err(connect_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(connect_err)?;
        conn.execute(SCHEMA, []).map_err(connect_err)?;
        debug!(path = %path.display(), "Opened task store");
        Ok(Self { conn })
    }

    /// Number of queued tasks.
    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .map_err(|e| FilterError::StoreWrite {
                fingerprint: "*".into(),
                reason: e.to_string(),
            })
    }
}

impl TaskStore for SqliteStore {
    fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM tasks WHERE sha256 = ?1",
                params![fingerprint.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| FilterError::StoreWrite {
                fingerprint: fingerprint.to_string(),
                reason: e.to_string(),
            })
    }

    fn insert_if_absent(&self, record: &SubmissionRecord) -> Result<InsertOutcome> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO tasks
                    (target, sha256, timeout, package, priority, custom, machine, added_on)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.target,
                    record.fingerprint.as_str(),
                    record.timeout,
                    record.package.as_str(),
                    record.priority,
                    record.custom,
                    record.machine_pool,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| FilterError::StoreWrite {
                fingerprint: record.fingerprint.to_string(),
                reason: e.to_string(),
            })?;

        Ok(if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }
}
