use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use qtask_core::{TaskRecord, TaskStatus};

use crate::error::StorageError;
use crate::store::TaskStore;

/// Non-durable store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskStore for MemoryTaskStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn save(&self, record: &TaskRecord) -> Result<(), StorageError> {
        self.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<TaskRecord>, StorageError> {
        Ok(self.lock().get(id).cloned())
    }

    fn load_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, StorageError> {
        let mut records: Vec<TaskRecord> = self
            .lock()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    fn load_all(&self) -> Result<Vec<TaskRecord>, StorageError> {
        let mut records: Vec<TaskRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.lock().remove(id).is_some())
    }
}
