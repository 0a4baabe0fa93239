//! SQLite-backed row store.
//!
//! The store never inspects record payloads; it persists `(parent,
//! result_id, id, name, data, etag)` rows in a single table and serves
//! strictly name-ordered scans for the pagination engine. All mutations on a
//! row serialise through the connection lock plus the etag guard on the
//! conditional write.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record `{name}` already exists")]
    Conflict { name: String },
    #[error("etag precondition failed for `{name}`")]
    PreconditionFailed { name: String },
    #[error("record `{name}` does not exist")]
    Missing { name: String },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One persisted row. `data` is the canonical encoded payload; structured
/// fields are derived by decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub parent: String,
    pub result_id: String,
    pub id: String,
    pub name: String,
    pub data: Vec<u8>,
    pub etag: String,
}

pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch("PRAGMA journal_mode = wal;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and the demo wiring.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Inserts a new row; a duplicate name is a conflict.
    pub fn insert(&self, row: &RecordRow) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO records (parent, result_id, id, name, data, etag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![row.parent, row.result_id, row.id, row.name, row.data, row.etag],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict {
                    name: row.name.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every row stored under `name`. The UNIQUE constraint keeps this to at
    /// most one; callers treat additional rows as a defect to log, not fail.
    pub fn find_by_name(&self, name: &str) -> Result<Vec<RecordRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT parent, result_id, id, name, data, etag FROM records WHERE name = ?1",
        )?;
        let rows = stmt
            .query_map(params![name], row_from_sql)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replaces the payload and etag of `name`.
    ///
    /// A non-empty `expected_etag` makes the write conditional: the row must
    /// still carry that etag or the call fails with a precondition error.
    pub fn update_blob(
        &self,
        name: &str,
        blob: &[u8],
        new_etag: &str,
        expected_etag: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let affected = if expected_etag.is_empty() {
            tx.execute(
                "UPDATE records SET data = ?1, etag = ?2 WHERE name = ?3",
                params![blob, new_etag, name],
            )?
        } else {
            tx.execute(
                "UPDATE records SET data = ?1, etag = ?2 WHERE name = ?3 AND etag = ?4",
                params![blob, new_etag, name, expected_etag],
            )?
        };
        if affected == 0 {
            let exists = tx
                .query_row("SELECT 1 FROM records WHERE name = ?1", params![name], |_| {
                    Ok(())
                })
                .optional()?;
            return match exists {
                Some(()) => Err(StoreError::PreconditionFailed {
                    name: name.to_string(),
                }),
                None => Err(StoreError::Missing {
                    name: name.to_string(),
                }),
            };
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes one row by name, optionally guarded by an etag. Returns the
    /// number of rows removed.
    pub fn delete_by_name(&self, name: &str, expected_etag: &str) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        check_etag(&tx, name, expected_etag)?;
        let affected = tx.execute("DELETE FROM records WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(affected)
    }

    /// Deletes a result row and all of its child records in one transaction.
    /// Children are addressed through the `result_id` column they carry.
    pub fn delete_result_cascade(
        &self,
        name: &str,
        result_id: &str,
        expected_etag: &str,
    ) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        check_etag(&tx, name, expected_etag)?;
        let affected = tx.execute("DELETE FROM records WHERE name = ?1", params![name])?;
        if affected > 0 && !result_id.is_empty() {
            tx.execute(
                "DELETE FROM records WHERE result_id = ?1",
                params![result_id],
            )?;
        }
        tx.commit()?;
        Ok(affected)
    }

    /// Scan scope for a single list request. Scans lock the connection per
    /// batch; cross-batch consistency comes from the strict name ordering.
    pub fn list_scope(&self) -> ScanScope<'_> {
        ScanScope { store: self }
    }

    fn scan_from(
        &self,
        bound: &str,
        inclusive: bool,
        limit: usize,
    ) -> Result<Vec<RecordRow>, StoreError> {
        let conn = self.lock()?;
        // Result rows carry an empty result_id; child records are reached
        // through their parent, never by a collection scan.
        let sql = if inclusive {
            "SELECT parent, result_id, id, name, data, etag FROM records
             WHERE result_id = '' AND name >= ?1 ORDER BY name ASC LIMIT ?2"
        } else {
            "SELECT parent, result_id, id, name, data, etag FROM records
             WHERE result_id = '' AND name > ?1 ORDER BY name ASC LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![bound, limit as i64], row_from_sql)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Name-ordered scans over result rows on behalf of one list request.
pub struct ScanScope<'a> {
    store: &'a RecordStore,
}

impl ScanScope<'_> {
    /// Result rows with `name > after_name`, ascending, up to `limit`. An
    /// empty bound scans from the beginning (names are never empty).
    pub fn scan(&self, after_name: &str, limit: usize) -> Result<Vec<RecordRow>, StoreError> {
        self.store.scan_from(after_name, false, limit)
    }

    /// Rows with `name >= start_name`; used to resume a paginated request at
    /// the first candidate of the new page.
    pub fn scan_inclusive(
        &self,
        start_name: &str,
        limit: usize,
    ) -> Result<Vec<RecordRow>, StoreError> {
        self.store.scan_from(start_name, true, limit)
    }
}

fn check_etag(
    tx: &rusqlite::Transaction<'_>,
    name: &str,
    expected_etag: &str,
) -> Result<(), StoreError> {
    if expected_etag.is_empty() {
        return Ok(());
    }
    let stored: Option<String> = tx
        .query_row(
            "SELECT etag FROM records WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        Some(etag) if etag == expected_etag => Ok(()),
        Some(_) => Err(StoreError::PreconditionFailed {
            name: name.to_string(),
        }),
        // Missing rows fall through to the DELETE's zero-affected path.
        None => Ok(()),
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    // The UNIQUE constraint doubles as the ascending name index the scan
    // queries rely on; no other index is required.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS records (
            parent    TEXT NOT NULL,
            result_id TEXT NOT NULL,
            id        TEXT NOT NULL,
            name      TEXT NOT NULL UNIQUE,
            data      BLOB NOT NULL,
            etag      TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        parent: row.get(0)?,
        result_id: row.get(1)?,
        id: row.get(2)?,
        name: row.get(3)?,
        data: row.get(4)?,
        etag: row.get(5)?,
    })
}
