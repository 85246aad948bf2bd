//! 任务存储实现
//!
//! - [`InMemoryStore`] - 内存存储，进程退出后数据丢失
//! - [`SqliteTaskStore`] - SQLite 存储
//! - [`StoreFactory`] - 按配置创建存储

pub mod database;
pub mod in_memory_store;
pub mod store_factory;

pub use database::*;
pub use in_memory_store::InMemoryStore;
pub use store_factory::{StoreFactory, Stores};
