use qtask_core::{TaskRecord, TaskStatus};
use qtask_storage::StorageError;
use tracing::{error, info, warn};

use super::core::Shared;

impl Shared {
    /// Re-enqueue unfinished records from the store. RUNNING records were
    /// orphaned by an earlier process and restart from scratch; PENDING
    /// records are queued as they are. Returns how many were recovered.
    pub(super) fn recover(&self) -> usize {
        let mut recovered = 0;

        for mut record in self.load_for_recovery(TaskStatus::Running) {
            if let Err(e) = record.demote_orphaned() {
                warn!(task_id = %record.id, error = %e, "could not demote orphaned task");
                continue;
            }
            warn!(task_id = %record.id, task_type = %record.task_type, "re-queueing task orphaned by an earlier run");
            self.persist(&record);
            if self.adopt(record) {
                recovered += 1;
            }
        }

        for record in self.load_for_recovery(TaskStatus::Pending) {
            if self.adopt(record) {
                recovered += 1;
            }
        }

        self.metrics_mut().recovered_tasks = recovered as u64;
        if recovered > 0 {
            info!(recovered, "recovered unfinished tasks from store");
        }
        recovered
    }

    fn load_for_recovery(&self, status: TaskStatus) -> Vec<TaskRecord> {
        let loaded = self.store.load_by_status(status).or_else(|e: StorageError| {
            warn!(status = %status, error = %e, "failed to load tasks for recovery, reconnecting");
            self.store.reconnect()?;
            self.store.load_by_status(status)
        });
        match loaded {
            Ok(records) => records,
            Err(e) => {
                error!(status = %status, error = %e, "giving up on recovering tasks");
                Vec::new()
            }
        }
    }

    /// Place a PENDING record in memory and on the queue.
    fn adopt(&self, record: TaskRecord) -> bool {
        let id = record.id.clone();
        let priority = record.priority;
        {
            let mut tasks = self.lock_tasks();
            if tasks.contains_key(&id) {
                return false;
            }
            tasks.insert(id.clone(), record);
        }
        self.queue.push(id, priority)
    }
}
