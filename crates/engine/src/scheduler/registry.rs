use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::task::{Task, TaskContext, TaskResult};

/// Builds a fresh task instance for one execution attempt.
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Maps task type names to factories.
///
/// Populate it before handing it to the manager; the manager owns it
/// read-only afterwards.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`. A second registration replaces the
    /// first.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            warn!(task_type = %name, "task type registered twice, replacing factory");
        } else {
            info!(task_type = %name, "registered task type");
        }
    }

    /// Register a plain function as a task body.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        self.register(name, move || Box::new(FnTask(Arc::clone(&body))) as Box<dyn Task>);
    }

    /// Instantiate a task. Unknown names yield a stub whose execution fails,
    /// so the error surfaces on the task record rather than at submission.
    pub fn create(&self, task_type: &str) -> Box<dyn Task> {
        match self.factories.get(task_type) {
            Some(factory) => factory(),
            None => Box::new(UnknownTask {
                task_type: task_type.to_string(),
            }),
        }
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    /// Registered names, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry").field("types", &self.types()).finish()
    }
}

struct FnTask<F>(Arc<F>);

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext) -> TaskResult + Send + Sync,
{
    fn execute(&self, ctx: &TaskContext) -> TaskResult {
        (self.0)(ctx)
    }
}

struct UnknownTask {
    task_type: String,
}

impl Task for UnknownTask {
    fn execute(&self, _ctx: &TaskContext) -> TaskResult {
        TaskResult::unknown_type(&self.task_type)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::scheduler::task::ErrorCode;

    #[test]
    fn registered_function_runs() {
        let mut registry = TaskRegistry::new();
        registry.register_fn("double", |ctx| {
            let x = ctx.param("x").and_then(|v| v.as_i64()).unwrap_or(0);
            TaskResult::ok(json!(x * 2))
        });

        let ctx = TaskContext::detached("t", "double", json!({"x": 21}));
        let result = registry.create("double").execute(&ctx);
        assert_eq!(result.data, Some(json!(42)));
        assert!(registry.contains("double"));
    }

    #[test]
    fn unknown_type_yields_failing_stub() {
        let registry = TaskRegistry::new();
        let ctx = TaskContext::detached("t", "bogus", json!({}));
        let result = registry.create("bogus").execute(&ctx);
        assert!(!result.success);
        assert_eq!(result.code, Some(ErrorCode::UnknownType));
        assert!(result.error_message().contains("unknown type"));
    }

    #[test]
    fn types_are_sorted() {
        let mut registry = TaskRegistry::new();
        registry.register_fn("zeta", |_| TaskResult::ok(json!(null)));
        registry.register_fn("alpha", |_| TaskResult::ok(json!(null)));
        registry.register_fn("alpha", |_| TaskResult::failure("replaced"));
        assert_eq!(registry.types(), vec!["alpha", "zeta"]);
        assert_eq!(registry.len(), 2);
    }
}
