use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use qtask_core::TaskId;
use serde::Serialize;
use serde_json::Value;

/// Distinguishes why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    /// The task body reported a failure.
    Execution,
    /// The task body panicked.
    Panic,
    /// The deadline elapsed before the body returned.
    Timeout,
    /// No task is registered under the record's type name.
    UnknownType,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Execution => "EXECUTION_ERROR",
            ErrorCode::Panic => "PANIC",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::UnknownType => "UNKNOWN_TASK_TYPE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one execution attempt.
///
/// Expected business failures are returned as values, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub code: Option<ErrorCode>,
}

impl TaskResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::failed(ErrorCode::Execution, message.into())
    }

    pub fn timeout(after: Duration) -> Self {
        Self::failed(
            ErrorCode::Timeout,
            format!("TIMEOUT: task exceeded its {:?} deadline", after),
        )
    }

    pub fn panicked(message: impl fmt::Display) -> Self {
        Self::failed(ErrorCode::Panic, format!("task panicked: {message}"))
    }

    pub fn unknown_type(task_type: &str) -> Self {
        Self::failed(ErrorCode::UnknownType, format!("unknown type: {task_type}"))
    }

    fn failed(code: ErrorCode, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            code: Some(code),
        }
    }

    /// Whether the retry policy may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        !self.success && self.code != Some(ErrorCode::UnknownType)
    }

    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "task failed without an error message".to_string())
    }
}

impl<E: fmt::Display> From<Result<Value, E>> for TaskResult {
    fn from(result: Result<Value, E>) -> Self {
        match result {
            Ok(data) => TaskResult::ok(data),
            Err(e) => TaskResult::failure(e.to_string()),
        }
    }
}

/// Receives progress from running task bodies.
///
/// `attempt` is the record's `fail_count` when the attempt started; it lets
/// the receiver ignore bodies orphaned by a timeout or a cancellation.
pub trait ProgressSink: Send + Sync {
    fn report_progress(&self, task_id: &str, attempt: u32, fraction: f64, message: &str);

    fn is_cancelled(&self, task_id: &str, attempt: u32) -> bool;
}

struct DetachedSink;

impl ProgressSink for DetachedSink {
    fn report_progress(&self, _task_id: &str, _attempt: u32, _fraction: f64, _message: &str) {}

    fn is_cancelled(&self, _task_id: &str, _attempt: u32) -> bool {
        false
    }
}

/// Everything a task body can see about the attempt it is running.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    task_type: String,
    parameters: Value,
    attempt: u32,
    sink: Arc<dyn ProgressSink>,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<TaskId>,
        task_type: impl Into<String>,
        parameters: Value,
        attempt: u32,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            parameters,
            attempt,
            sink,
        }
    }

    /// A context whose progress goes nowhere. Useful for running a task
    /// outside the manager.
    pub fn detached(task_id: impl Into<TaskId>, task_type: impl Into<String>, parameters: Value) -> Self {
        Self::new(task_id, task_type, parameters, 0, Arc::new(DetachedSink))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Zero-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report fractional completion in [0, 1]. Values outside the range are
    /// clamped; values below the current progress are ignored.
    pub fn report_progress(&self, fraction: f64, message: impl AsRef<str>) {
        self.sink
            .report_progress(&self.task_id, self.attempt, fraction, message.as_ref());
    }

    /// True once the task was cancelled, removed, or this attempt was
    /// superseded. Long bodies should poll this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.sink.is_cancelled(&self.task_id, self.attempt)
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("task_type", &self.task_type)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// A unit of work the scheduler can execute.
pub trait Task: Send + Sync {
    fn execute(&self, ctx: &TaskContext) -> TaskResult;
}
