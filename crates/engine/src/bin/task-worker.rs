//! task-worker: standalone task manager process.
//!
//! Recovers unfinished tasks from the SQLite store, runs them on the worker
//! pool, optionally submits one task given on the command line and follows
//! its events, then shuts down cleanly on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use qtask_core::{config, Config, EventKind, TaskPriority};
use qtask_engine::{register_builtin, TaskDescriptor, TaskManager, TaskRegistry};
use qtask_storage::SqliteTaskStore;

// ── CLI ─────────────────────────────────────────────────────────────

/// Run the task manager with the built-in task types.
#[derive(Parser, Debug)]
#[command(name = "task-worker", version, about)]
struct Cli {
    /// SQLite database holding task records.
    #[arg(long, env = "TASK_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Number of worker threads (0 = available parallelism).
    #[arg(long, env = "TASK_WORKERS")]
    workers: Option<usize>,

    /// Submit one task of this type at startup.
    #[arg(long)]
    submit: Option<String>,

    /// JSON parameters for the submitted task.
    #[arg(long, default_value = "{}")]
    params: String,

    /// Priority for the submitted task (high, medium, low).
    #[arg(long, default_value = "medium")]
    priority: TaskPriority,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.db_path {
        config.store.db_path = path;
    }
    if let Some(workers) = cli.workers {
        config.engine.worker_threads = workers;
    }
    config.log_summary();

    let store = Arc::new(SqliteTaskStore::open(config.store.clone())?);
    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);

    let manager = Arc::new(TaskManager::start(config.engine.clone(), store, registry)?);
    info!(types = ?manager.registered_types(), "task-worker ready");

    if let Some(task_type) = cli.submit {
        let parameters: serde_json::Value = serde_json::from_str(&cli.params)?;
        let id = uuid::Uuid::new_v4().to_string();
        let mut events = manager.subscribe(&id);
        manager.add_task(
            TaskDescriptor::new(task_type)
                .with_id(id)
                .with_priority(cli.priority)
                .with_parameters(parameters),
        )?;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                info!(
                    task_id = %event.task_id,
                    kind = ?event.kind,
                    progress = ?event.progress,
                    message = %event.message,
                    "task event"
                );
                if event.kind != EventKind::Progress {
                    break;
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let stopping = Arc::clone(&manager);
    if let Err(e) = tokio::task::spawn_blocking(move || stopping.stop()).await {
        warn!(error = %e, "task manager shutdown panicked");
    }

    info!("task-worker exited cleanly");
    Ok(())
}
