//! Priority task scheduler with a bounded worker pool, deadlines, retries
//! and crash recovery.
//!
//! Callers submit [`TaskDescriptor`]s to a [`TaskManager`]. Workers pull ids
//! from the [`queue::TaskQueue`] in priority order, run the registered
//! [`Task`] body under a deadline and route failures through the
//! [`RetryPolicy`]. Every lifecycle transition is mirrored to a
//! [`qtask_storage::TaskStore`] so that a restart can pick up where the
//! previous process stopped.

pub mod events;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod task;
pub mod tasks;
pub mod types;

pub use events::EventHub;
pub use metrics::SchedulerMetrics;
pub use registry::TaskRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use runner::TaskManager;
pub use task::{ErrorCode, ProgressSink, Task, TaskContext, TaskResult};
pub use tasks::{register_builtin, EchoTask, SimulatedDownloadTask};
pub use types::TaskDescriptor;
