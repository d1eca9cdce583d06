use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Unique task identifier (caller-supplied or a generated UUID).
pub type TaskId = String;

/// Scheduling priority. Variants are declared in run order, so the derived
/// `Ord` puts `High` first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High = 0,
    #[default]
    Medium = 1,
    Low = 2,
}

impl TaskPriority {
    /// Numeric rank, lower runs first.
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Storage form (`"high"`, `"medium"`, `"low"`).
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    /// Display form used in progress payloads.
    pub fn label(self) -> &'static str {
        match self {
            TaskPriority::High => "HIGH",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::Low => "LOW",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            other => Err(CoreError::InvalidValue {
                field: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Pending)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == lowered)
            .ok_or(CoreError::InvalidValue {
                field: "status",
                value: lowered,
            })
    }
}

/// Persisted and observable state of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Fraction complete, always within [0.0, 1.0].
    pub progress: f64,
    pub parameters: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Failed attempts so far.
    pub fail_count: u32,
    /// Per-task deadline override in milliseconds.
    pub timeout_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// A fresh PENDING record with zero progress.
    pub fn new(
        id: impl Into<TaskId>,
        task_type: impl Into<String>,
        priority: TaskPriority,
        parameters: Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            priority,
            status: TaskStatus::Pending,
            progress: 0.0,
            parameters,
            result: None,
            error_message: None,
            fail_count: 0,
            timeout_ms: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Raise progress to `value` (clamped). Lower values are ignored.
    /// Returns the stored progress when it changed.
    pub fn advance_progress(&mut self, value: f64) -> Option<f64> {
        let clamped = clamp_progress(value);
        if clamped > self.progress {
            self.progress = clamped;
            Some(clamped)
        } else {
            None
        }
    }

    /// PENDING -> RUNNING.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(now);
        self.completed_at = None;
        Ok(())
    }

    /// RUNNING -> COMPLETED with the task's output.
    pub fn complete(&mut self, data: Option<Value>, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Completed)?;
        self.progress = 1.0;
        self.result = data;
        self.error_message = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// RUNNING -> FAILED, counting the attempt.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Failed)?;
        self.fail_count += 1;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// FAILED -> PENDING for another attempt. The last error message is kept
    /// so observers can see why the task is being retried.
    pub fn reset_for_retry(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Pending)?;
        self.progress = 0.0;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// RUNNING -> PENDING for a record orphaned by a crash.
    pub fn demote_orphaned(&mut self) -> Result<(), CoreError> {
        if self.status != TaskStatus::Running {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Pending,
            });
        }
        self.transition(TaskStatus::Pending)?;
        self.progress = 0.0;
        self.started_at = None;
        Ok(())
    }

    /// {PENDING, RUNNING} -> CANCELLED.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Cancelled)?;
        self.completed_at = Some(now);
        Ok(())
    }
}

/// Clamp to [0.0, 1.0]; NaN counts as no progress.
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ── Progress query payload ────────────────────────────────────

/// Answer to a progress query. Unknown ids produce [`TaskProgress::NotFound`]
/// rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskProgress {
    Found(ProgressReport),
    NotFound(MissingTask),
}

impl TaskProgress {
    pub fn not_found(task_id: impl Into<TaskId>) -> Self {
        TaskProgress::NotFound(MissingTask {
            task_id: task_id.into(),
            status: "NOT_FOUND",
            progress: 0.0,
        })
    }

    pub fn is_found(&self) -> bool {
        matches!(self, TaskProgress::Found(_))
    }

    /// Upper-case status label, `NOT_FOUND` for unknown ids.
    pub fn status(&self) -> &str {
        match self {
            TaskProgress::Found(report) => report.status,
            TaskProgress::NotFound(missing) => missing.status,
        }
    }

    pub fn progress(&self) -> f64 {
        match self {
            TaskProgress::Found(report) => report.progress,
            TaskProgress::NotFound(missing) => missing.progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub task_id: TaskId,
    pub task_type: String,
    pub status: &'static str,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub priority: &'static str,
    pub fail_count: u32,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingTask {
    pub task_id: TaskId,
    pub status: &'static str,
    pub progress: f64,
}

impl From<&TaskRecord> for ProgressReport {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id.clone(),
            task_type: record.task_type.clone(),
            status: record.status.label(),
            progress: record.progress,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            result: record.result.clone(),
            error_message: record.error_message.clone(),
            priority: record.priority.label(),
            fail_count: record.fail_count,
            parameters: record.parameters.clone(),
        }
    }
}
