//! Persistence gateway contract.

use qtask_core::{TaskRecord, TaskStatus};

use crate::error::StorageError;

/// Durable store of task records, keyed by task id.
///
/// Implementations must be safe to call from any worker thread. The engine
/// treats every error as non-fatal: it logs, calls [`TaskStore::reconnect`]
/// and keeps the in-memory state authoritative.
pub trait TaskStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Insert or fully overwrite the record with the same id.
    fn save(&self, record: &TaskRecord) -> Result<(), StorageError>;

    fn load(&self, id: &str) -> Result<Option<TaskRecord>, StorageError>;

    fn load_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, StorageError>;

    fn load_all(&self) -> Result<Vec<TaskRecord>, StorageError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &str) -> Result<bool, StorageError>;

    /// Re-establish the underlying connection after a failure.
    fn reconnect(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Release the underlying connection. Later calls may fail with
    /// [`StorageError::Closed`].
    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
