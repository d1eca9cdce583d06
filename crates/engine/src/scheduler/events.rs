//! Per-task bounded mailboxes for push-style progress notification.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use qtask_core::{EventKind, TaskEvent, TaskId};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::debug;

struct Mailbox {
    tx: Sender<TaskEvent>,
    rx: Option<Receiver<TaskEvent>>,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: Some(rx) }
    }
}

/// Owns one bounded mailbox per task. Publishing never blocks: when a
/// mailbox is full the event is dropped.
pub struct EventHub {
    capacity: usize,
    mailboxes: Mutex<HashMap<TaskId, Mailbox>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            mailboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Take the receiving half of a task's mailbox, creating it on demand.
    /// Progress published before the first subscription is buffered. A second
    /// subscription replaces the mailbox and closes the earlier receiver.
    pub fn subscribe(&self, task_id: &str) -> Receiver<TaskEvent> {
        let capacity = self.capacity;
        let mut mailboxes = self.lock();
        let mailbox = mailboxes
            .entry(task_id.to_string())
            .or_insert_with(|| Mailbox::new(capacity));
        match mailbox.rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(capacity);
                *mailbox = Mailbox { tx, rx: None };
                rx
            }
        }
    }

    /// Deliver an event without blocking. A terminal event for a task nobody
    /// has subscribed to releases its mailbox instead of buffering.
    pub fn publish(&self, event: TaskEvent) {
        let capacity = self.capacity;
        let mut mailboxes = self.lock();
        if event.kind != EventKind::Progress {
            let unobserved = mailboxes
                .get(&event.task_id)
                .map_or(true, |mailbox| mailbox.rx.is_some());
            if unobserved {
                mailboxes.remove(&event.task_id);
                debug!(
                    task_id = %event.task_id,
                    kind = ?event.kind,
                    "no subscriber, releasing mailbox"
                );
                return;
            }
        }
        let mailbox = mailboxes
            .entry(event.task_id.clone())
            .or_insert_with(|| Mailbox::new(capacity));
        match mailbox.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(task_id = %event.task_id, kind = ?event.kind, "mailbox full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(task_id = %event.task_id, kind = ?event.kind, "mailbox closed, dropping event");
            }
        }
    }

    /// Drop a task's mailbox. Returns whether one existed.
    pub fn release(&self, task_id: &str) -> bool {
        self.lock().remove(task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Mailbox>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
