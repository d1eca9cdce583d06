#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use qtask_core::{EngineConfig, TaskRecord, TaskStatus};
use qtask_engine::TaskManager;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fast_config(workers: usize) -> EngineConfig {
    EngineConfig {
        worker_threads: workers,
        default_timeout_secs: 5,
        max_retries: 3,
        retry_delay_ms: 10,
        dequeue_timeout_ms: 10,
        shutdown_timeout_secs: 2,
        mailbox_capacity: 100,
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn wait_for_status(manager: &TaskManager, id: &str, status: TaskStatus) -> TaskRecord {
    let reached = wait_until(|| manager.get_task(id).map(|r| r.status) == Some(status));
    let record = manager.get_task(id).expect("task exists");
    assert!(reached, "task {id} stuck in {:?}, expected {:?}", record.status, status);
    record
}
