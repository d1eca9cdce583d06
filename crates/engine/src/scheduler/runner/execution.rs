use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use qtask_core::{TaskEvent, TaskId, TaskRecord, TaskStatus};
use qtask_storage::StorageError;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::scheduler::retry::RetryDecision;
use crate::scheduler::task::{ErrorCode, ProgressSink, TaskContext, TaskResult};

use super::core::Shared;

/// A task a worker has moved to RUNNING.
struct Claim {
    task_id: TaskId,
    task_type: String,
    parameters: Value,
    /// `fail_count` at claim time; identifies this attempt.
    attempt: u32,
    timeout: Duration,
}

impl Shared {
    /// Pull ids until shutdown. Runs on a pool thread.
    pub(super) fn worker_loop(self: &Arc<Self>, index: usize) {
        debug!(worker = index, "worker started");
        while !self.is_shutting_down() {
            let Some(task_id) = self.queue.pop_timeout(self.config.dequeue_timeout()) else {
                continue;
            };
            if self.is_shutting_down() {
                break;
            }
            if let Some(claim) = self.claim(&task_id) {
                self.execute(claim);
            }
        }
        debug!(worker = index, "worker stopped");
    }

    /// Move a PENDING record to RUNNING. Stale queue entries (removed,
    /// cancelled or already running) are skipped.
    fn claim(&self, task_id: &str) -> Option<Claim> {
        let mut tasks = self.lock_tasks();
        let Some(record) = tasks.get_mut(task_id) else {
            debug!(task_id, "skipping queue entry for removed task");
            return None;
        };
        if record.status != TaskStatus::Pending {
            debug!(task_id, status = %record.status, "skipping stale queue entry");
            return None;
        }
        if let Err(e) = record.start(Utc::now()) {
            warn!(task_id, error = %e, "could not start task");
            return None;
        }
        self.running.fetch_add(1, Ordering::SeqCst);
        self.persist(record);

        info!(
            task_id,
            task_type = %record.task_type,
            attempt = record.fail_count + 1,
            "task started"
        );
        Some(Claim {
            task_id: record.id.clone(),
            task_type: record.task_type.clone(),
            parameters: record.parameters.clone(),
            attempt: record.fail_count,
            timeout: record.timeout().unwrap_or_else(|| self.config.default_timeout()),
        })
    }

    fn execute(self: &Arc<Self>, claim: Claim) {
        let started = Instant::now();
        let result = self.run_with_deadline(&claim);
        let elapsed = started.elapsed();
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finish(&claim, result, elapsed);
    }

    /// Run the task body on its own thread and wait at most `claim.timeout`.
    /// A body that overruns keeps running detached; its result is dropped.
    fn run_with_deadline(self: &Arc<Self>, claim: &Claim) -> TaskResult {
        let created =
            panic::catch_unwind(AssertUnwindSafe(|| self.registry.create(&claim.task_type)));
        let task = match created {
            Ok(task) => task,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(
                    task_id = %claim.task_id,
                    task_type = %claim.task_type,
                    error = %message,
                    "task factory panicked"
                );
                return TaskResult::panicked(message);
            }
        };
        let sink: Arc<dyn ProgressSink> = Arc::new(ManagerSink(Arc::downgrade(self)));
        let ctx = TaskContext::new(
            claim.task_id.clone(),
            claim.task_type.clone(),
            claim.parameters.clone(),
            claim.attempt,
            sink,
        );

        let (tx, rx) = mpsc::sync_channel(1);
        let spawned = thread::Builder::new()
            .name(format!("task-{}", claim.task_type))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.execute(&ctx)));
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return TaskResult::failure(format!("failed to spawn task thread: {e}"));
        }

        match rx.recv_timeout(claim.timeout) {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => TaskResult::panicked(panic_message(payload.as_ref())),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    task_id = %claim.task_id,
                    timeout = ?claim.timeout,
                    "task exceeded its deadline, abandoning attempt"
                );
                TaskResult::timeout(claim.timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                TaskResult::panicked("task thread exited without a result")
            }
        }
    }

    /// Apply an attempt's outcome to the record and route failures through
    /// the retry policy.
    fn finish(&self, claim: &Claim, result: TaskResult, elapsed: Duration) {
        let event = {
            let mut tasks = self.lock_tasks();
            let Some(record) = tasks.get_mut(&claim.task_id) else {
                debug!(task_id = %claim.task_id, "task removed while running, discarding result");
                return;
            };
            if record.status != TaskStatus::Running || record.fail_count != claim.attempt {
                debug!(
                    task_id = %claim.task_id,
                    status = %record.status,
                    "attempt superseded, discarding result"
                );
                return;
            }

            {
                let mut metrics = self.metrics_mut();
                metrics.record_execution(&claim.task_type, elapsed, result.success);
                if result.code == Some(ErrorCode::Timeout) {
                    metrics.timeouts += 1;
                }
            }

            if result.success {
                self.complete(record, result.data, elapsed)
            } else {
                self.fail(record, &result)
            }
        };

        if let Some(event) = event {
            self.events.publish(event);
        }
    }

    fn complete(
        &self,
        record: &mut TaskRecord,
        data: Option<Value>,
        elapsed: Duration,
    ) -> Option<TaskEvent> {
        if let Err(e) = record.complete(data, Utc::now()) {
            warn!(task_id = %record.id, error = %e, "could not complete task");
            return None;
        }
        self.persist(record);
        info!(task_id = %record.id, task_type = %record.task_type, elapsed = ?elapsed, "task completed");
        Some(TaskEvent::done(record.id.clone(), "completed"))
    }

    fn fail(&self, record: &mut TaskRecord, result: &TaskResult) -> Option<TaskEvent> {
        let message = result.error_message();
        if let Err(e) = record.fail(message.clone(), Utc::now()) {
            warn!(task_id = %record.id, error = %e, "could not fail task");
            return None;
        }

        match self.policy.decide(record.fail_count, result.is_retryable()) {
            RetryDecision::Retry { attempt, delay } => {
                if let Err(e) = record.reset_for_retry() {
                    warn!(task_id = %record.id, error = %e, "could not reset task for retry");
                    return None;
                }
                self.persist(record);
                self.metrics_mut().retries_scheduled += 1;
                self.retries.schedule(record.id.clone(), delay);
                info!(
                    task_id = %record.id,
                    retry = attempt,
                    max_retries = self.policy.max_retries,
                    delay = ?delay,
                    error = %message,
                    "task failed, retry scheduled"
                );
                None
            }
            RetryDecision::GiveUp => {
                self.persist(record);
                warn!(
                    task_id = %record.id,
                    fail_count = record.fail_count,
                    error = %message,
                    "task failed permanently"
                );
                Some(TaskEvent::error(record.id.clone(), message))
            }
        }
    }

    /// Best-effort write: on failure reconnect and try once more. Errors are
    /// logged and counted, never propagated to the worker.
    pub(super) fn persist(&self, record: &TaskRecord) -> bool {
        let first = match self.store.save(record) {
            Ok(()) => return true,
            Err(e) => e,
        };
        if matches!(first, StorageError::Closed) && self.is_shutting_down() {
            debug!(task_id = %record.id, "store closed during shutdown, skipping write");
            return false;
        }

        warn!(task_id = %record.id, error = %first, "failed to persist task, reconnecting");
        if let Err(e) = self.store.reconnect() {
            warn!(error = %e, "store reconnect failed");
        }
        match self.store.save(record) {
            Ok(()) => true,
            Err(e) => {
                error!(task_id = %record.id, error = %e, "failed to persist task after reconnect");
                self.metrics_mut().persistence_failures += 1;
                false
            }
        }
    }

    /// Feed due retries back into the priority queue. Runs on the retry
    /// thread until the delay queue closes.
    pub(super) fn retry_loop(&self) {
        while let Some(task_id) = self.retries.next_due() {
            if self.is_shutting_down() {
                break;
            }
            let priority = self
                .lock_tasks()
                .get(&task_id)
                .filter(|r| r.status == TaskStatus::Pending)
                .map(|r| r.priority);
            match priority {
                Some(priority) => {
                    debug!(task_id = %task_id, "retry due, re-enqueueing");
                    self.queue.push(task_id, priority);
                }
                None => debug!(task_id = %task_id, "retry due but task is no longer pending"),
            }
        }
        debug!("retry thread stopped");
    }
}

/// Routes progress from task bodies back into the manager. Holds a weak
/// reference so detached bodies do not keep a stopped manager alive.
struct ManagerSink(Weak<Shared>);

impl ProgressSink for ManagerSink {
    fn report_progress(&self, task_id: &str, attempt: u32, fraction: f64, message: &str) {
        let Some(shared) = self.0.upgrade() else {
            return;
        };
        let advanced = {
            let mut tasks = shared.lock_tasks();
            match tasks.get_mut(task_id) {
                Some(record)
                    if record.status == TaskStatus::Running && record.fail_count == attempt =>
                {
                    record.advance_progress(fraction)
                }
                _ => None,
            }
        };
        if let Some(progress) = advanced {
            shared
                .events
                .publish(TaskEvent::progress(task_id, progress, message));
        }
    }

    fn is_cancelled(&self, task_id: &str, attempt: u32) -> bool {
        let Some(shared) = self.0.upgrade() else {
            return true;
        };
        let tasks = shared.lock_tasks();
        !matches!(
            tasks.get(task_id),
            Some(record) if record.status == TaskStatus::Running && record.fail_count == attempt
        )
    }
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
