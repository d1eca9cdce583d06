//! Store failures are logged and retried but never stop execution.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use qtask_core::{TaskRecord, TaskStatus};
use qtask_engine::{register_builtin, TaskDescriptor, TaskManager, TaskRegistry};
use qtask_storage::{MemoryTaskStore, StorageError, TaskStore};
use serde_json::json;

use common::{fast_config, wait_for_status};

/// Wraps a memory store and fails writes on demand.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryTaskStore,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
    reconnects: AtomicUsize,
    failed_writes: AtomicUsize,
}

impl FlakyStore {
    fn should_fail(&self) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl TaskStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    fn save(&self, record: &TaskRecord) -> Result<(), StorageError> {
        if self.should_fail() {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Other("injected write failure".into()));
        }
        self.inner.save(record)
    }

    fn load(&self, id: &str) -> Result<Option<TaskRecord>, StorageError> {
        self.inner.load(id)
    }

    fn load_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, StorageError> {
        self.inner.load_by_status(status)
    }

    fn load_all(&self) -> Result<Vec<TaskRecord>, StorageError> {
        self.inner.load_all()
    }

    fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.inner.delete(id)
    }

    fn reconnect(&self) -> Result<(), StorageError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);
    registry
}

#[test]
fn execution_continues_when_every_write_fails() {
    let store = Arc::new(FlakyStore::default());
    store.fail_all.store(true, Ordering::SeqCst);
    let manager = TaskManager::start(fast_config(1), store.clone(), registry()).unwrap();

    let id = manager
        .add_task(TaskDescriptor::new("echo").with_parameters(json!({"x": 5})))
        .unwrap();
    let record = wait_for_status(&manager, &id, TaskStatus::Completed);

    assert_eq!(record.result, Some(json!({"x": 5})));
    assert!(store.reconnects.load(Ordering::SeqCst) >= 3);
    assert!(store.inner.load(&id).unwrap().is_none());
    // submit, start and complete each fail twice
    assert!(manager.metrics().persistence_failures >= 3);
}

#[test]
fn single_write_failure_is_healed_by_reconnect() {
    let store = Arc::new(FlakyStore::default());
    let manager = TaskManager::start(fast_config(1), store.clone(), registry()).unwrap();

    store.fail_next.store(1, Ordering::SeqCst);
    let id = manager.add_task(TaskDescriptor::new("echo")).unwrap();
    wait_for_status(&manager, &id, TaskStatus::Completed);

    assert_eq!(store.failed_writes.load(Ordering::SeqCst), 1);
    assert_eq!(store.reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(manager.metrics().persistence_failures, 0);

    assert!(common::wait_until(|| {
        store.inner.load(&id).unwrap().map(|r| r.status) == Some(TaskStatus::Completed)
    }));
}

#[test]
fn failing_store_does_not_block_recovery_or_queries() {
    let store = Arc::new(FlakyStore::default());
    store.fail_all.store(true, Ordering::SeqCst);
    let manager = TaskManager::start(fast_config(2), store.clone(), registry()).unwrap();

    let ids: Vec<_> = (0..5)
        .map(|i| {
            manager
                .add_task(TaskDescriptor::new("echo").with_parameters(json!({ "i": i })))
                .unwrap()
        })
        .collect();
    for id in &ids {
        wait_for_status(&manager, id, TaskStatus::Completed);
    }
    assert_eq!(manager.get_tasks_by_status(TaskStatus::Completed).len(), 5);
    assert_eq!(manager.list_tasks().len(), 5);
}
