use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::scheduler::task::{Task, TaskContext, TaskResult};

const DEFAULT_DELAY_MS: u64 = 1_000;

/// Pretends to download one item per entry of `parameters.symbols`,
/// sleeping `parameters.delay_ms` (default 1s) per item and reporting
/// progress after each.
pub struct SimulatedDownloadTask;

impl SimulatedDownloadTask {
    pub const NAME: &'static str = "simulated_download";
}

impl Task for SimulatedDownloadTask {
    fn execute(&self, ctx: &TaskContext) -> TaskResult {
        let symbols: Vec<String> = match ctx.param("symbols") {
            None => Vec::new(),
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(symbols) => symbols,
                Err(e) => {
                    return TaskResult::failure(format!(
                        "parameters.symbols must be a list of strings: {e}"
                    ))
                }
            },
        };
        let delay = Duration::from_millis(
            ctx.param("delay_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_DELAY_MS),
        );

        let total = symbols.len();
        for (i, symbol) in symbols.iter().enumerate() {
            if ctx.is_cancelled() {
                return TaskResult::failure(format!("cancelled after {i} of {total} symbols"));
            }
            thread::sleep(delay);
            let progress = (i + 1) as f64 / total as f64;
            ctx.report_progress(progress, format!("{symbol} downloaded"));
            debug!(task_id = ctx.task_id(), symbol = %symbol, progress, "simulated download step");
        }

        TaskResult::ok(json!({"status": "done", "count": total}))
    }
}
