use async_trait::async_trait;
use scheduler_domain::{
    validate_paging, EventStore, FailureEvent, PagedResult, PersistedTask, SuccessEvent, TaskStore,
};
use scheduler_errors::SchedulerResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存任务存储
///
/// 适用于测试与不需要跨进程恢复的嵌入式场景。同一时间创建的任务按插入顺序排列，
/// 删除任务时同时删除它的执行历史。
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tasks: RwLock<HashMap<String, StoredTask>>,
    history: RwLock<History>,
    sequence: AtomicU64,
}

#[derive(Debug)]
struct StoredTask {
    sequence: u64,
    task: PersistedTask,
}

#[derive(Debug, Default)]
struct History {
    successes: Vec<SuccessEvent>,
    failures: Vec<FailureEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<PersistedTask> {
        self.tasks.read().await.get(id).map(|stored| stored.task.clone())
    }

    /// 某个任务的执行成功记录
    pub async fn success_events(&self, id: &str) -> Vec<SuccessEvent> {
        self.history
            .read()
            .await
            .successes
            .iter()
            .filter(|event| event.id == id)
            .cloned()
            .collect()
    }

    /// 某个任务的执行失败记录
    pub async fn failure_events(&self, id: &str) -> Vec<FailureEvent> {
        self.history
            .read()
            .await
            .failures
            .iter()
            .filter(|event| event.id == id)
            .cloned()
            .collect()
    }

    /// 按创建时间与插入顺序排序后的任务
    async fn ordered(&self, keyword: Option<&str>) -> Vec<PersistedTask> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<&StoredTask> = tasks
            .values()
            .filter(|stored| match keyword {
                Some(keyword) => stored.task.name.starts_with(keyword),
                None => true,
            })
            .collect();
        matched.sort_by(|a, b| {
            a.task
                .creation_time
                .cmp(&b.task.creation_time)
                .then(a.sequence.cmp(&b.sequence))
        });
        matched.into_iter().map(|stored| stored.task.clone()).collect()
    }
}

fn page_of(tasks: Vec<PersistedTask>, page: u32, limit: u32) -> Vec<PersistedTask> {
    let offset = (page as usize - 1).saturating_mul(limit as usize);
    tasks.into_iter().skip(offset).take(limit as usize).collect()
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn save_task(&self, task: &PersistedTask) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            debug!(task.id = %task.id, "任务已存在，忽略保存");
            return Ok(false);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        tasks.insert(
            task.id.clone(),
            StoredTask {
                sequence,
                task: task.clone(),
            },
        );
        Ok(true)
    }

    async fn take_tasks(&self, page: u32, limit: u32) -> SchedulerResult<Vec<PersistedTask>> {
        validate_paging(page, limit)?;
        Ok(page_of(self.ordered(None).await, page, limit))
    }

    async fn remove_task(&self, id: &str) -> SchedulerResult<bool> {
        let removed = self.tasks.write().await.remove(id).is_some();
        if removed {
            let mut history = self.history.write().await;
            history.successes.retain(|event| event.id != id);
            history.failures.retain(|event| event.id != id);
        }
        Ok(removed)
    }

    async fn update_task(&self, task: &PersistedTask) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(stored) => {
                stored.task.name = task.name.clone();
                stored.task.type_name = task.type_name.clone();
                stored.task.data = task.data.clone();
                stored.task.properties = task.properties.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn paged_query(
        &self,
        keyword: Option<&str>,
        page: u32,
        limit: u32,
    ) -> SchedulerResult<PagedResult<PersistedTask>> {
        validate_paging(page, limit)?;
        let matched = self.ordered(keyword).await;
        let count = matched.len() as u64;
        Ok(PagedResult::new(count, page, limit, page_of(matched, page, limit)))
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn save_success(&self, event: &SuccessEvent) -> SchedulerResult<()> {
        if let Some(stored) = self.tasks.write().await.get_mut(&event.id) {
            stored.task.record_success();
        }
        self.history.write().await.successes.push(event.clone());
        Ok(())
    }

    async fn save_failure(&self, event: &FailureEvent) -> SchedulerResult<()> {
        if let Some(stored) = self.tasks.write().await.get_mut(&event.id) {
            stored.task.record_failure();
        }
        self.history.write().await.failures.push(event.clone());
        Ok(())
    }
}
