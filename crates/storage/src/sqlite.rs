//! SQLite-backed task store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use qtask_core::{StoreConfig, TaskPriority, TaskRecord, TaskStatus};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::store::TaskStore;

const SCHEMA: &str = include_str!("schema.sql");

const COLUMNS: &str = "id, task_type, priority, status, progress, parameters, result, \
     error_message, fail_count, timeout_ms, created_at, started_at, completed_at";

/// Thread-safe task store over a single SQLite connection.
///
/// The connection slot is `None` after [`TaskStore::close`]; a later
/// [`TaskStore::reconnect`] reopens it.
pub struct SqliteTaskStore {
    config: StoreConfig,
    conn: Mutex<Option<Connection>>,
}

impl SqliteTaskStore {
    /// Open or create the database and apply the schema.
    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        let conn = Self::connect(&config)?;
        info!(path = %config.db_path.display(), "task store opened");
        Ok(Self {
            config,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open(StoreConfig::with_path(path.as_ref()))
    }

    pub fn path(&self) -> &Path {
        &self.config.db_path
    }

    fn connect(config: &StoreConfig) -> Result<Connection, StorageError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(&config.db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch(
            "
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let guard = self.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StorageError::Closed),
        }
    }

    /// Run a multi-row query. Rows that fail validation are logged and
    /// skipped so one bad record does not hide the rest.
    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TaskRecord>, StorageError> {
        let rows = self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params, RawRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let records = rows
            .into_iter()
            .filter_map(|raw| match raw.into_record() {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable task row");
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

impl TaskStore for SqliteTaskStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn save(&self, record: &TaskRecord) -> Result<(), StorageError> {
        let parameters = serde_json::to_string(&record.parameters)?;
        let result = record.result.as_ref().map(serde_json::to_string).transpose()?;
        let timeout_ms = record.timeout_ms.map(|ms| ms.min(i64::MAX as u64) as i64);

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, task_type, priority, status, progress, parameters, result,
                                    error_message, fail_count, timeout_ms, created_at, started_at,
                                    completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                    task_type = excluded.task_type,
                    priority = excluded.priority,
                    status = excluded.status,
                    progress = excluded.progress,
                    parameters = excluded.parameters,
                    result = excluded.result,
                    error_message = excluded.error_message,
                    fail_count = excluded.fail_count,
                    timeout_ms = excluded.timeout_ms,
                    created_at = excluded.created_at,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at",
                params![
                    record.id,
                    record.task_type,
                    record.priority.as_str(),
                    record.status.as_str(),
                    record.progress,
                    parameters,
                    result,
                    record.error_message,
                    record.fail_count as i64,
                    timeout_ms,
                    format_ts(&record.created_at),
                    record.started_at.as_ref().map(format_ts),
                    record.completed_at.as_ref().map(format_ts),
                ],
            )?;
            Ok(())
        })
    }

    fn load(&self, id: &str) -> Result<Option<TaskRecord>, StorageError> {
        let sql = format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1");
        let raw = self.with_connection(|conn| {
            Ok(conn
                .query_row(&sql, params![id], RawRow::from_row)
                .optional()?)
        })?;
        raw.map(RawRow::into_record).transpose()
    }

    fn load_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, StorageError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM tasks WHERE status = ?1 ORDER BY created_at, rowid"
        );
        self.query_records(&sql, &[&status.as_str()])
    }

    fn load_all(&self) -> Result<Vec<TaskRecord>, StorageError> {
        let sql = format!("SELECT {COLUMNS} FROM tasks ORDER BY created_at, rowid");
        self.query_records(&sql, &[])
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.with_connection(|conn| {
            let removed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
    }

    fn reconnect(&self) -> Result<(), StorageError> {
        let fresh = Self::connect(&self.config)?;
        let mut guard = self.lock();
        *guard = Some(fresh);
        debug!(path = %self.config.db_path.display(), "task store reconnected");
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.lock();
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
            debug!(path = %self.config.db_path.display(), "task store closed");
        }
        Ok(())
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Column values as stored, before validation.
struct RawRow {
    id: String,
    task_type: String,
    priority: String,
    status: String,
    progress: f64,
    parameters: Option<String>,
    result: Option<String>,
    error_message: Option<String>,
    fail_count: i64,
    timeout_ms: Option<i64>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_type: row.get(1)?,
            priority: row.get(2)?,
            status: row.get(3)?,
            progress: row.get(4)?,
            parameters: row.get(5)?,
            result: row.get(6)?,
            error_message: row.get(7)?,
            fail_count: row.get(8)?,
            timeout_ms: row.get(9)?,
            created_at: row.get(10)?,
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord, StorageError> {
        let id = self.id;
        let corrupt = |reason: String| StorageError::Corrupt {
            id: id.clone(),
            reason,
        };

        let priority = self.priority.parse::<TaskPriority>().map_err(|e| corrupt(format!("{e}")))?;
        let status = self.status.parse::<TaskStatus>().map_err(|e| corrupt(format!("{e}")))?;
        let parameters = match self.parameters.as_deref() {
            Some(text) if !text.is_empty() => serde_json::from_str::<Value>(text)
                .map_err(|e| corrupt(format!("bad parameters: {e}")))?,
            _ => Value::Object(Default::default()),
        };
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|e| corrupt(format!("bad result: {e}")))?;
        let parse_ts = |text: &str| {
            DateTime::parse_from_rfc3339(text)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp '{text}': {e}")))
        };
        let created_at = parse_ts(&self.created_at)?;
        let started_at = self.started_at.as_deref().map(parse_ts).transpose()?;
        let completed_at = self.completed_at.as_deref().map(parse_ts).transpose()?;

        Ok(TaskRecord {
            task_type: self.task_type,
            priority,
            status,
            progress: qtask_core::clamp_progress(self.progress),
            parameters,
            result,
            error_message: self.error_message,
            fail_count: self.fail_count.clamp(0, u32::MAX as i64) as u32,
            timeout_ms: self.timeout_ms.map(|ms| ms.max(0) as u64),
            created_at,
            started_at,
            completed_at,
            id,
        })
    }
}
