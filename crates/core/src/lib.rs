pub mod config;
pub mod error;
pub mod event;
pub mod record;

pub use config::{Config, EngineConfig, StoreConfig};
pub use error::CoreError;
pub use event::{EventKind, TaskEvent};
pub use record::*;
