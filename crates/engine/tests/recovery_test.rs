//! Restart and crash-recovery behaviour against a real SQLite file.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use qtask_core::{TaskPriority, TaskRecord, TaskStatus};
use qtask_engine::{register_builtin, TaskDescriptor, TaskManager, TaskRegistry, TaskResult};
use qtask_storage::{SqliteTaskStore, TaskStore};
use serde_json::json;

use common::{fast_config, wait_for_status};

fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);
    registry
}

fn counting_registry(runs: &Arc<AtomicUsize>) -> TaskRegistry {
    let mut registry = builtin_registry();
    let runs = Arc::clone(runs);
    registry.register_fn("count", move |ctx| {
        runs.fetch_add(1, Ordering::SeqCst);
        TaskResult::ok(ctx.parameters().clone())
    });
    registry
}

#[test]
fn completed_task_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    let (id, before) = {
        let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
        let manager = TaskManager::start(fast_config(2), store, builtin_registry()).unwrap();
        let id = manager
            .add_task(TaskDescriptor::new("echo").with_parameters(json!({"x": 5})))
            .unwrap();
        let before = wait_for_status(&manager, &id, TaskStatus::Completed);
        manager.stop();
        (id, before)
    };

    let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
    let manager = TaskManager::start(fast_config(2), store, builtin_registry()).unwrap();
    let after = manager.get_task(&id).expect("record reloaded from store");

    assert_eq!(after.status, before.status);
    assert_eq!(after.progress, before.progress);
    assert_eq!(after.result, before.result);
    assert_eq!(after.result, Some(json!({"x": 5})));
    assert_eq!(manager.metrics().recovered_tasks, 0);
}

#[test]
fn running_record_is_demoted_and_executed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    {
        let store = SqliteTaskStore::open_path(&path).unwrap();
        let mut orphan = TaskRecord::new("orphan", "count", TaskPriority::High, json!({"n": 1}));
        orphan.start(Utc::now()).unwrap();
        orphan.advance_progress(0.6);
        store.save(&orphan).unwrap();
        store.close().unwrap();
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
    let manager = TaskManager::start(fast_config(1), store.clone(), counting_registry(&runs)).unwrap();

    let record = wait_for_status(&manager, "orphan", TaskStatus::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(record.fail_count, 0);
    assert_eq!(record.result, Some(json!({"n": 1})));
    assert_eq!(manager.metrics().recovered_tasks, 1);

    let stored = store.load("orphan").unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}

#[test]
fn pending_records_are_requeued_in_priority_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    {
        let store = SqliteTaskStore::open_path(&path).unwrap();
        for (id, priority) in [("p-low", TaskPriority::Low), ("p-high", TaskPriority::High)] {
            store
                .save(&TaskRecord::new(id, "count", priority, json!({})))
                .unwrap();
        }
        let mut done = TaskRecord::new("done", "count", TaskPriority::High, json!({}));
        done.start(Utc::now()).unwrap();
        done.complete(None, Utc::now()).unwrap();
        store.save(&done).unwrap();
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
    let manager = TaskManager::start(fast_config(1), store, counting_registry(&runs)).unwrap();

    let high = wait_for_status(&manager, "p-high", TaskStatus::Completed);
    let low = wait_for_status(&manager, "p-low", TaskStatus::Completed);
    assert!(high.started_at <= low.started_at);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(manager.metrics().recovered_tasks, 2);
}

#[test]
fn retry_cancelled_by_stop_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    let attempts = Arc::new(AtomicUsize::new(0));

    let registry = |attempts: &Arc<AtomicUsize>| {
        let mut registry = TaskRegistry::new();
        let attempts = Arc::clone(attempts);
        registry.register_fn("flaky", move |_| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                TaskResult::failure("transient")
            } else {
                TaskResult::ok(json!("recovered"))
            }
        });
        registry
    };

    let id = {
        let config = qtask_core::EngineConfig {
            retry_delay_ms: 60_000,
            ..fast_config(1)
        };
        let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
        let manager = TaskManager::start(config, store, registry(&attempts)).unwrap();
        let id = manager.add_task(TaskDescriptor::new("flaky")).unwrap();
        assert!(common::wait_until(|| manager.metrics().pending_retries == 1));
        manager.stop();
        id
    };

    let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
    let manager = TaskManager::start(fast_config(1), store, registry(&attempts)).unwrap();
    let record = wait_for_status(&manager, &id, TaskStatus::Completed);
    assert_eq!(record.fail_count, 1);
    assert_eq!(record.result, Some(json!("recovered")));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn per_task_timeout_is_kept_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    {
        let store = SqliteTaskStore::open_path(&path).unwrap();
        let mut record = TaskRecord::new("slow", "sleepy", TaskPriority::Medium, json!({}));
        record.timeout_ms = Some(20);
        store.save(&record).unwrap();
    }

    let mut registry = TaskRegistry::new();
    registry.register_fn("sleepy", |_| {
        std::thread::sleep(std::time::Duration::from_millis(300));
        TaskResult::ok(json!(null))
    });
    let config = qtask_core::EngineConfig {
        max_retries: 0,
        ..fast_config(1)
    };
    let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
    let manager = TaskManager::start(config, store, registry).unwrap();

    let record = wait_for_status(&manager, "slow", TaskStatus::Failed);
    assert!(record.error_message.unwrap_or_default().starts_with("TIMEOUT"));
}

#[test]
fn corrupt_row_does_not_block_recovery_of_healthy_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    {
        let store = SqliteTaskStore::open_path(&path).unwrap();
        for id in ["good", "bad"] {
            store
                .save(&TaskRecord::new(id, "count", TaskPriority::Medium, json!({})))
                .unwrap();
        }
        store.close().unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute("UPDATE tasks SET created_at = 'garbage' WHERE id = 'bad'", [])
            .unwrap();
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(SqliteTaskStore::open_path(&path).unwrap());
    let manager = TaskManager::start(fast_config(1), store, counting_registry(&runs)).unwrap();

    wait_for_status(&manager, "good", TaskStatus::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(manager.metrics().recovered_tasks, 1);
    assert!(manager.get_task("bad").is_none());
}
