use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;

use chrono::Utc;
use qtask_core::{ProgressReport, TaskEvent, TaskId, TaskProgress, TaskRecord, TaskStatus};
use serde_json::{Map, Value};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::types::TaskDescriptor;

use super::core::TaskManager;

impl TaskManager {
    /// Validate, persist and enqueue a task. Returns its id.
    ///
    /// Only malformed descriptors and duplicate ids are rejected; an
    /// unregistered task type is accepted and fails when executed.
    pub fn add_task(&self, descriptor: TaskDescriptor) -> Result<TaskId, TaskError> {
        let shared = &self.shared;
        if shared.is_shutting_down() {
            return Err(TaskError::ShuttingDown);
        }
        descriptor.validate()?;

        let TaskDescriptor {
            id,
            task_type,
            priority,
            parameters,
            timeout_ms,
        } = descriptor;
        let id = id
            .map(|id| id.trim().to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let parameters = match parameters {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let mut record = TaskRecord::new(
            id.clone(),
            task_type.trim(),
            priority.unwrap_or_default(),
            parameters,
        );
        record.timeout_ms = timeout_ms;

        if !shared.registry.contains(&record.task_type) {
            warn!(task_id = %id, task_type = %record.task_type, "no task registered for this type, it will fail when run");
        }

        {
            let mut tasks = shared.lock_tasks();
            if tasks.contains_key(&id) {
                return Err(TaskError::DuplicateId(id));
            }
            match shared.store.load(&id) {
                Ok(Some(_)) => return Err(TaskError::DuplicateId(id)),
                Ok(None) => {}
                Err(e) => warn!(task_id = %id, error = %e, "could not check store for duplicate id"),
            }
            tasks.insert(id.clone(), record.clone());
            shared.persist(&record);
        }

        shared.queue.push(id.clone(), record.priority);
        info!(
            task_id = %id,
            task_type = %record.task_type,
            priority = %record.priority,
            "task submitted"
        );
        Ok(id)
    }

    /// Look a task up in memory, falling back to the store. Records found
    /// only in the store are cached in memory.
    pub fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        let shared = &self.shared;
        let mut tasks = shared.lock_tasks();
        if let Some(record) = tasks.get(task_id) {
            return Some(record.clone());
        }
        match shared.store.load(task_id) {
            Ok(Some(record)) => Some(tasks.entry(record.id.clone()).or_insert(record).clone()),
            Ok(None) => None,
            Err(e) => {
                warn!(task_id, error = %e, "failed to load task from store");
                None
            }
        }
    }

    /// Status payload for observers. Unknown ids yield a NOT_FOUND marker.
    pub fn get_task_progress(&self, task_id: &str) -> TaskProgress {
        match self.get_task(task_id) {
            Some(record) => TaskProgress::Found(ProgressReport::from(&record)),
            None => TaskProgress::not_found(task_id),
        }
    }

    /// All tasks with `status`, merging store records into memory.
    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        let mut tasks = self.shared.lock_tasks();
        match self.shared.store.load_by_status(status) {
            Ok(stored) => reconcile(&mut tasks, stored),
            Err(e) => warn!(status = %status, error = %e, "failed to load tasks from store"),
        }
        collect(&tasks, |record| record.status == status)
    }

    /// Every known task, merging store records into memory.
    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        let mut tasks = self.shared.lock_tasks();
        match self.shared.store.load_all() {
            Ok(stored) => reconcile(&mut tasks, stored),
            Err(e) => warn!(error = %e, "failed to load tasks from store"),
        }
        collect(&tasks, |_| true)
    }

    /// Delete a task from memory and the store and drop its mailbox.
    /// Returns whether the task existed anywhere.
    pub fn remove_task(&self, task_id: &str) -> Result<bool, TaskError> {
        let shared = &self.shared;
        let (in_memory, in_store) = {
            let mut tasks = shared.lock_tasks();
            let in_memory = tasks.remove(task_id).is_some();
            (in_memory, shared.store.delete(task_id)?)
        };
        shared.events.release(task_id);
        if in_memory || in_store {
            info!(task_id, "task removed");
        }
        Ok(in_memory || in_store)
    }

    /// Mark a PENDING or RUNNING task as CANCELLED. A running body is not
    /// interrupted; its result is discarded.
    pub fn cancel_task(&self, task_id: &str) -> Result<(), TaskError> {
        if self.get_task(task_id).is_none() {
            return Err(TaskError::NotFound(task_id.to_string()));
        }

        let shared = &self.shared;
        {
            let mut tasks = shared.lock_tasks();
            let record = tasks
                .get_mut(task_id)
                .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
            let from = record.status;
            record
                .cancel(Utc::now())
                .map_err(|_| TaskError::InvalidTransition {
                    id: task_id.to_string(),
                    from,
                    to: TaskStatus::Cancelled,
                })?;
            shared.persist(record);
            info!(task_id, from = %from, "task cancelled");
        }

        shared.events.publish(TaskEvent::error(task_id, "cancelled"));
        Ok(())
    }

    /// Receiving half of the task's event mailbox.
    pub fn subscribe(&self, task_id: &str) -> Receiver<TaskEvent> {
        self.shared.events.subscribe(task_id)
    }

    pub fn release_mailbox(&self, task_id: &str) -> bool {
        self.shared.events.release(task_id)
    }

    /// Names accepted by the registry.
    pub fn registered_types(&self) -> Vec<String> {
        self.shared.registry.types()
    }

    /// Snapshot of the manager's metrics with live gauges filled in.
    pub fn metrics(&self) -> SchedulerMetrics {
        let shared = &self.shared;
        let running = shared.running.load(Ordering::SeqCst);
        let mut snapshot = shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.running = running;
        snapshot.queue_depth = shared.queue.len();
        snapshot.pending_retries = shared.retries.len();
        snapshot.worker_utilization = if shared.workers == 0 {
            0.0
        } else {
            running as f64 / shared.workers as f64
        };
        snapshot
    }
}

fn reconcile(tasks: &mut HashMap<TaskId, TaskRecord>, stored: Vec<TaskRecord>) {
    for record in stored {
        if !tasks.contains_key(&record.id) {
            debug!(task_id = %record.id, "caching task loaded from store");
            tasks.insert(record.id.clone(), record);
        }
    }
}

fn collect(
    tasks: &HashMap<TaskId, TaskRecord>,
    keep: impl Fn(&TaskRecord) -> bool,
) -> Vec<TaskRecord> {
    let mut records: Vec<TaskRecord> = tasks
        .values()
        .filter(|record| keep(record))
        .cloned()
        .collect();
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    records
}
