use qtask_core::{TaskId, TaskStatus};
use qtask_storage::StorageError;
use thiserror::Error;

/// Errors surfaced synchronously to callers of the task manager.
///
/// Failures inside the worker loop never appear here; they are recorded on
/// the task record instead.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("invalid task descriptor: {0}")]
    Submission(String),

    #[error("task id already exists: {0}")]
    DuplicateId(TaskId),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task manager is shutting down")]
    ShuttingDown,

    #[error("failed to start task manager: {0}")]
    Startup(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
