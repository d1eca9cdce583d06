//! Task manager runner -- owns the worker pool and the public task API.
//!
//! Split into focused submodules:
//! - `core`: TaskManager struct, startup and shutdown
//! - `execution`: worker loop, deadline enforcement, retry routing
//! - `submission`: submission, queries, cancellation and removal
//! - `recovery`: re-enqueueing records left behind by an earlier process

mod core;
mod execution;
mod recovery;
mod submission;

pub use self::core::TaskManager;
