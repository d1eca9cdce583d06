use std::time::Duration;

use qtask_core::{TaskId, TaskPriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

/// What a caller submits. Unset fields take defaults: a generated id and
/// MEDIUM priority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub parameters: Value,
    /// Deadline override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskDescriptor {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// Reject descriptors that can only come from a caller bug. The task
    /// type is not checked against the registry here.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.task_type.trim().is_empty() {
            return Err(TaskError::Submission("task type must not be empty".into()));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(TaskError::Submission("task id must not be blank".into()));
            }
        }
        if !(self.parameters.is_object() || self.parameters.is_null()) {
            return Err(TaskError::Submission(format!(
                "parameters must be a JSON object, got {}",
                json_kind(&self.parameters)
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(TaskError::Submission("timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
