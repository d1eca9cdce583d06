use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub engine: EngineConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `QTASK_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("QTASK_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            engine: EngineConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  engine:  workers={}, max_retries={}, retry_delay={}ms, default_timeout={}s",
            self.engine.resolved_worker_threads(),
            self.engine.max_retries,
            self.engine.retry_delay_ms,
            self.engine.default_timeout_secs
        );
        tracing::info!(
            "  store:   db_path={}, wal={}",
            self.store.db_path.display(),
            self.store.wal_mode
        );
    }
}

// ── Engine ────────────────────────────────────────────────────

/// Worker pool, timeout and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Wall-clock deadline for a task body unless the task overrides it.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Failed attempts allowed before a task becomes terminally failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay before a failed task is queued again.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How long an idle worker blocks on the queue before re-checking shutdown.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// Upper bound on how long `stop()` waits for workers.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Capacity of each per-task event mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_worker_threads() -> usize { 4 }
fn default_timeout_secs() -> u64 { 3600 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 10_000 }
fn default_dequeue_timeout_ms() -> u64 { 1_000 }
fn default_shutdown_timeout_secs() -> u64 { 5 }
fn default_mailbox_capacity() -> usize { 100 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            default_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_threads: profiled_env_parse(p, "TASK_WORKERS", default_worker_threads()),
            default_timeout_secs: profiled_env_parse(p, "TASK_DEFAULT_TIMEOUT_SECS", default_timeout_secs()),
            max_retries: profiled_env_parse(p, "TASK_MAX_RETRIES", default_max_retries()),
            retry_delay_ms: profiled_env_parse(p, "TASK_RETRY_DELAY_MS", default_retry_delay_ms()),
            dequeue_timeout_ms: profiled_env_parse(p, "TASK_DEQUEUE_TIMEOUT_MS", default_dequeue_timeout_ms()),
            shutdown_timeout_secs: profiled_env_parse(
                p,
                "TASK_SHUTDOWN_TIMEOUT_SECS",
                default_shutdown_timeout_secs(),
            ),
            mailbox_capacity: profiled_env_parse(p, "TASK_MAILBOX_CAPACITY", default_mailbox_capacity()),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file holding task records.
    pub db_path: PathBuf,
    /// Enable WAL journaling.
    pub wal_mode: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/tasks.db"),
            wal_mode: true,
        }
    }
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            db_path: PathBuf::from(profiled_env_or(p, "TASK_DB_PATH", "data/tasks.db")),
            wal_mode: profiled_env_bool(p, "TASK_DB_WAL", true),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Default::default()
        }
    }
}
