//! 存储层接口定义
//!
//! - `TaskStore` - 任务记录的持久化
//! - `EventStore` - 执行结果的持久化
//!
//! 所有实现都必须是 `Send + Sync`，调度器会在多个并发任务中共享同一个实例。

use async_trait::async_trait;

use crate::entities::{PagedResult, PersistedTask};
use crate::events::{FailureEvent, SuccessEvent};
use scheduler_errors::SchedulerResult;

/// 任务记录存储
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 保存新任务
    ///
    /// id 已存在时返回 `Ok(false)`，不会覆盖原有记录。
    async fn save_task(&self, task: &PersistedTask) -> SchedulerResult<bool>;

    /// 按创建时间升序分页获取任务，`page` 从 1 开始
    async fn take_tasks(&self, page: u32, limit: u32) -> SchedulerResult<Vec<PersistedTask>>;

    /// 删除任务及其执行历史
    async fn remove_task(&self, id: &str) -> SchedulerResult<bool>;

    /// 更新任务的名称、类型、状态与属性
    async fn update_task(&self, task: &PersistedTask) -> SchedulerResult<bool>;

    /// 分页查询，`keyword` 非空时按名称前缀过滤
    async fn paged_query(
        &self,
        keyword: Option<&str>,
        page: u32,
        limit: u32,
    ) -> SchedulerResult<PagedResult<PersistedTask>>;
}

/// 执行结果存储
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save_success(&self, event: &SuccessEvent) -> SchedulerResult<()>;

    async fn save_failure(&self, event: &FailureEvent) -> SchedulerResult<()>;
}
