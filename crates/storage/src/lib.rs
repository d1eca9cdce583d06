pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StorageError;
pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;
pub use store::TaskStore;
