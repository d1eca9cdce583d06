use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Task manager operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Execution attempts by task type, successful or not.
    pub tasks_executed: HashMap<String, u64>,
    /// Failed attempts by task type.
    pub tasks_failed: HashMap<String, u64>,
    /// Retries handed to the delay queue.
    pub retries_scheduled: u64,
    /// Attempts that exceeded their deadline.
    pub timeouts: u64,
    /// Writes that still failed after a reconnect.
    pub persistence_failures: u64,
    /// Records re-enqueued from the store at startup.
    pub recovered_tasks: u64,
    /// Tasks currently occupying a worker.
    pub running: usize,
    /// Ids waiting in the priority queue.
    pub queue_depth: usize,
    /// Retries waiting for their delay to elapse.
    pub pending_retries: usize,
    /// Worker utilization ratio (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Average attempt duration by task type.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last attempt end time by task type.
    pub last_run: HashMap<String, DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record a finished attempt.
    pub fn record_execution(&mut self, task_type: &str, duration: Duration, success: bool) {
        *self.tasks_executed.entry(task_type.to_string()).or_default() += 1;
        if !success {
            *self.tasks_failed.entry(task_type.to_string()).or_default() += 1;
        }
        self.last_run.insert(task_type.to_string(), Utc::now());

        let count = self.tasks_executed[task_type];
        let prev_avg = self
            .avg_task_duration
            .get(task_type)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task_type.to_string(), new_avg);
    }

    pub fn total_executed(&self) -> u64 {
        self.tasks_executed.values().sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.tasks_failed.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("echo", Duration::from_millis(100), true);

        assert_eq!(m.tasks_executed["echo"], 1);
        assert!(m.tasks_failed.is_empty());
        assert!(m.last_run.contains_key("echo"));
        assert_eq!(m.avg_task_duration["echo"], Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("task", Duration::from_millis(100), true);
        m.record_execution("task", Duration::from_millis(200), false);

        assert_eq!(m.tasks_executed["task"], 2);
        assert_eq!(m.tasks_failed["task"], 1);
        let avg = m.avg_task_duration["task"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn totals_span_task_types() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("a", Duration::ZERO, true);
        m.record_execution("b", Duration::ZERO, false);
        m.record_execution("b", Duration::ZERO, false);
        assert_eq!(m.total_executed(), 3);
        assert_eq!(m.total_failed(), 2);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.queue_depth, 0);
        assert_eq!(m.worker_utilization, 0.0);
        assert!(m.tasks_executed.is_empty());
    }
}
