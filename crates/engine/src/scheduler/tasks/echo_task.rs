use crate::scheduler::task::{Task, TaskContext, TaskResult};

/// Returns its parameters unchanged.
pub struct EchoTask;

impl EchoTask {
    pub const NAME: &'static str = "echo";
}

impl Task for EchoTask {
    fn execute(&self, ctx: &TaskContext) -> TaskResult {
        TaskResult::ok(ctx.parameters().clone())
    }
}
