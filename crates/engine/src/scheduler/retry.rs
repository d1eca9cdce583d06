//! Retry policy and the cancellable delay queue that re-enqueues failed
//! tasks.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use qtask_core::{EngineConfig, TaskId};

/// Fixed-delay retry with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after `delay`. `attempt` is the 1-based number of the
    /// upcoming retry.
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }

    /// `fail_count` is the count after the failure that was just recorded.
    pub fn decide(&self, fail_count: u32, retryable: bool) -> RetryDecision {
        if retryable && fail_count <= self.max_retries {
            RetryDecision::Retry {
                attempt: fail_count,
                delay: self.delay,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[derive(Default)]
struct DelayState {
    heap: BinaryHeap<Reverse<(Instant, u64, TaskId)>>,
    next_seq: u64,
    closed: bool,
}

/// Deferred work keyed by due time. A single consumer drains it with
/// [`DelayQueue::next_due`]; [`DelayQueue::cancel_all`] drops everything
/// still pending.
#[derive(Default)]
pub struct DelayQueue {
    state: Mutex<DelayState>,
    wake: Condvar,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false once the queue is closed.
    pub fn schedule(&self, task_id: TaskId, delay: Duration) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse((Instant::now() + delay, seq, task_id)));
        drop(state);
        self.wake.notify_all();
        true
    }

    /// Block until the earliest entry is due and return it. Returns `None`
    /// once the queue is closed.
    pub fn next_due(&self) -> Option<TaskId> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            let now = Instant::now();
            let earliest = state.heap.peek().map(|Reverse((due, _, _))| *due);
            let wait = match earliest {
                Some(due) if due <= now => {
                    return state.heap.pop().map(|Reverse((_, _, id))| id);
                }
                Some(due) => Some(due - now),
                None => None,
            };
            state = match wait {
                Some(timeout) => {
                    self.wake
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.wake.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Drop all pending entries, returning how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        let cancelled = state.heap.len();
        state.heap.clear();
        cancelled
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.wake.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, DelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn retries_until_bound_then_gives_up() {
        let policy = RetryPolicy::new(2, Duration::from_millis(5));
        assert_eq!(
            policy.decide(1, true),
            RetryDecision::Retry { attempt: 1, delay: Duration::from_millis(5) }
        );
        assert!(matches!(policy.decide(2, true), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(3, true), RetryDecision::GiveUp);
    }

    #[test]
    fn non_retryable_gives_up_immediately() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        assert_eq!(policy.decide(1, false), RetryDecision::GiveUp);
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.decide(1, true), RetryDecision::GiveUp);
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from_config(&EngineConfig::default());
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(10));
    }

    #[test]
    fn entries_come_out_in_due_order() {
        let queue = DelayQueue::new();
        queue.schedule("later".into(), Duration::from_millis(40));
        queue.schedule("sooner".into(), Duration::from_millis(5));

        let started = Instant::now();
        assert_eq!(queue.next_due().as_deref(), Some("sooner"));
        assert_eq!(queue.next_due().as_deref(), Some("later"));
        assert!(started.elapsed() >= Duration::from_millis(35));
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_and_close_release_consumer() {
        let queue = Arc::new(DelayQueue::new());
        queue.schedule("t".into(), Duration::from_secs(60));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.next_due())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.cancel_all(), 1);
        queue.close();

        assert!(consumer.join().unwrap().is_none());
        assert!(!queue.schedule("late".into(), Duration::ZERO));
    }
}
