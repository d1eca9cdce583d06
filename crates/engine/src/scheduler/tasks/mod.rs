mod download_task;
mod echo_task;

pub use download_task::SimulatedDownloadTask;
pub use echo_task::EchoTask;

use super::registry::TaskRegistry;
use super::task::Task;

/// Register the demo task types shipped with the engine.
pub fn register_builtin(registry: &mut TaskRegistry) {
    registry.register(EchoTask::NAME, || Box::new(EchoTask) as Box<dyn Task>);
    registry.register(SimulatedDownloadTask::NAME, || {
        Box::new(SimulatedDownloadTask) as Box<dyn Task>
    });
}
