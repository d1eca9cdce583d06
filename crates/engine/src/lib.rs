pub mod error;
pub mod scheduler;

pub use error::TaskError;
pub use scheduler::{
    register_builtin, ErrorCode, ProgressSink, RetryPolicy, SchedulerMetrics, Task, TaskContext,
    TaskDescriptor, TaskManager, TaskRegistry, TaskResult,
};
