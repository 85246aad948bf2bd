use std::sync::Arc;
use tracing::{debug, info};

use scheduler_core::{StoreConfig, StoreKind};
use scheduler_domain::{EventStore, TaskStore};
use scheduler_errors::SchedulerResult;

use crate::{InMemoryStore, SqliteTaskStore};

/// 同一个存储实例的两种视图
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub events: Arc<dyn EventStore>,
}

pub struct StoreFactory;

impl StoreFactory {
    pub async fn create(config: &StoreConfig) -> SchedulerResult<Stores> {
        debug!("Creating task store with kind: {:?}", config.kind);

        match config.kind {
            StoreKind::Memory => {
                info!("使用内存任务存储，进程重启后任务不会恢复");
                let store = Arc::new(InMemoryStore::new());
                Ok(Stores {
                    tasks: store.clone(),
                    events: store,
                })
            }
            StoreKind::Sqlite => {
                info!("使用SQLite任务存储: {}", config.url);
                let store = Arc::new(SqliteTaskStore::connect(config).await?);
                Ok(Stores {
                    tasks: store.clone(),
                    events: store,
                })
            }
        }
    }
}
