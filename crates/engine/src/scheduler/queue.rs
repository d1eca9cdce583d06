//! Thread-safe priority queue feeding the workers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use qtask_core::{TaskId, TaskPriority};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    priority: TaskPriority,
    seq: u64,
    task_id: TaskId,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
    closed: bool,
}

/// Min-ordered queue of task ids: highest priority first, then submission
/// order. Entries are keys only; workers validate the record on dequeue.
#[derive(Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task id. Returns false once the queue is closed.
    pub fn push(&self, task_id: TaskId, priority: TaskPriority) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse(QueueEntry {
            priority,
            seq,
            task_id,
        }));
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Block up to `timeout` for the next id. Returns `None` on timeout or
    /// once the queue is closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<TaskId> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(Reverse(entry)) = state.heap.pop() {
                return Some(entry.task_id);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Wake every waiter and refuse further pushes.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn high_priority_first_then_fifo() {
        let queue = TaskQueue::new();
        queue.push("low".into(), TaskPriority::Low);
        queue.push("m1".into(), TaskPriority::Medium);
        queue.push("high".into(), TaskPriority::High);
        queue.push("m2".into(), TaskPriority::Medium);
        queue.push("a-medium".into(), TaskPriority::Medium);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_timeout(SHORT)).collect();
        assert_eq!(order, vec!["high", "m1", "m2", "a-medium", "low"]);
    }

    #[test]
    fn empty_queue_times_out() {
        let queue = TaskQueue::new();
        let started = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap().is_none());
        assert!(!queue.push("late".into(), TaskPriority::High));
    }

    #[test]
    fn push_wakes_blocked_consumer() {
        let queue = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push("t".into(), TaskPriority::Low);
        assert_eq!(consumer.join().unwrap().as_deref(), Some("t"));
        assert!(queue.is_empty());
    }
}
