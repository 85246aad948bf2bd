pub mod sqlite_task_store;

pub use sqlite_task_store::SqliteTaskStore;
