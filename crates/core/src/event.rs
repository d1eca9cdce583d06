use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{clamp_progress, TaskId};

/// Kind of notification pushed to a task's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Done,
    Error,
}

/// Structured event consumed by the external delivery layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn progress(task_id: impl Into<TaskId>, progress: f64, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Progress,
            task_id: task_id.into(),
            progress: Some(clamp_progress(progress)),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn done(task_id: impl Into<TaskId>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Done,
            task_id: task_id.into(),
            progress: Some(1.0),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(task_id: impl Into<TaskId>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            task_id: task_id.into(),
            progress: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_wire_shape() {
        let event = TaskEvent::progress("t-1", 0.25, "AAPL downloaded");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["task_id"], "t-1");
        assert_eq!(json["progress"], 0.25);
        assert_eq!(json["message"], "AAPL downloaded");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn error_event_omits_progress() {
        let event = TaskEvent::error("t-1", "boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json.get("progress").is_none());
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(TaskEvent::progress("t", 3.0, "").progress, Some(1.0));
    }
}
