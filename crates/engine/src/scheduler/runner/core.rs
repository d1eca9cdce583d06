use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use qtask_core::{EngineConfig, TaskId, TaskRecord};
use qtask_storage::TaskStore;
use tracing::{error, info, warn};

use crate::error::TaskError;
use crate::scheduler::events::EventHub;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::registry::TaskRegistry;
use crate::scheduler::retry::{DelayQueue, RetryPolicy};

use super::execution::panic_message;

/// State shared between the manager handle, the workers and the retry
/// thread.
pub(super) struct Shared {
    pub(super) config: EngineConfig,
    pub(super) registry: TaskRegistry,
    pub(super) store: Arc<dyn TaskStore>,
    /// In-memory records; authoritative over the store.
    pub(super) tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    pub(super) queue: TaskQueue,
    pub(super) retries: DelayQueue,
    pub(super) events: EventHub,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    pub(super) policy: RetryPolicy,
    pub(super) shutdown: AtomicBool,
    /// Tasks currently occupying a worker.
    pub(super) running: AtomicUsize,
    pub(super) workers: usize,
}

impl Shared {
    pub(super) fn lock_tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn metrics_mut(&self) -> RwLockWriteGuard<'_, SchedulerMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

struct Handles {
    /// Keeps the worker threads alive; dropping it does not block.
    _pool: rayon::ThreadPool,
    exits: Receiver<usize>,
    retry_thread: JoinHandle<()>,
}

/// Signals the manager when a worker loop ends, including by unwinding.
struct ExitSignal {
    index: usize,
    tx: Sender<usize>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.index);
    }
}

/// The task orchestrator. Accepts submissions, runs them on a fixed worker
/// pool in priority order and mirrors every transition to a [`TaskStore`].
///
/// Construct with [`TaskManager::start`]; the handle is meant to be shared
/// by reference (or `Arc`) with every caller. [`TaskManager::stop`] ends the
/// lifecycle and is also run on drop.
pub struct TaskManager {
    pub(super) shared: Arc<Shared>,
    handles: Mutex<Option<Handles>>,
}

impl TaskManager {
    /// Recover unfinished records from `store`, then start the workers and
    /// the retry thread.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
    ) -> Result<Self, TaskError> {
        let workers = config.resolved_worker_threads();
        let shared = Arc::new(Shared {
            policy: RetryPolicy::from_config(&config),
            events: EventHub::new(config.mailbox_capacity),
            config,
            registry,
            store,
            tasks: Mutex::new(HashMap::new()),
            queue: TaskQueue::new(),
            retries: DelayQueue::new(),
            metrics: RwLock::new(SchedulerMetrics::default()),
            shutdown: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            workers,
        });

        let recovered = shared.recover();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("task-worker-{i}"))
            .panic_handler(|payload| {
                error!(error = %panic_message(payload.as_ref()), "worker thread panicked");
            })
            .build()
            .map_err(|e| TaskError::Startup(format!("worker pool: {e}")))?;

        let (exit_tx, exits) = mpsc::channel();
        for index in 0..workers {
            let shared = Arc::clone(&shared);
            let signal = ExitSignal {
                index,
                tx: exit_tx.clone(),
            };
            pool.spawn(move || {
                let _signal = signal;
                shared.worker_loop(index);
            });
        }
        drop(exit_tx);

        let retry_thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("task-retry".to_string())
                .spawn(move || shared.retry_loop())
                .map_err(|e| TaskError::Startup(format!("retry thread: {e}")))?
        };

        info!(
            workers,
            recovered,
            store = shared.store.name(),
            task_types = shared.registry.len(),
            "task manager started"
        );

        Ok(Self {
            shared,
            handles: Mutex::new(Some(Handles {
                _pool: pool,
                exits,
                retry_thread,
            })),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Whether `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Signal shutdown, cancel pending retries, wait for workers up to the
    /// configured shutdown timeout, then close the store. Idempotent.
    pub fn stop(&self) {
        let handles = match self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(handles) => handles,
            None => return,
        };

        info!("task manager stopping");
        self.shared.shutdown.store(true, Ordering::SeqCst);

        let cancelled = self.shared.retries.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "cancelled pending retries");
        }
        self.shared.retries.close();
        self.shared.queue.close();

        let deadline = Instant::now() + self.shared.config.shutdown_timeout();
        let mut exited = 0;
        while exited < self.shared.workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match handles.exits.recv_timeout(remaining) {
                Ok(_) => exited += 1,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        still_running = self.shared.workers - exited,
                        "workers did not stop within the shutdown timeout"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if handles.retry_thread.join().is_err() {
            error!("retry thread panicked");
        }

        if let Err(e) = self.shared.store.close() {
            warn!(error = %e, "failed to close task store");
        }
        info!(workers_stopped = exited, "task manager stopped");
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.stop();
    }
}
