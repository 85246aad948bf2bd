//! 基于哈希时间轮的任务调度
//!
//! - [`wheel`] - 哈希时间轮定时器
//! - [`recurrence`] - 触发规则（CRON、固定间隔、一次性）
//! - [`task`] - 用户任务接口
//! - [`live_task`] - 运行中任务的状态机
//! - [`factory`] - 从持久化记录重建任务
//! - [`scheduler`] - 调度器，负责创建、更新、删除与启动恢复

pub mod cron_utils;
pub mod factory;
pub mod live_task;
pub mod metrics_collector;
pub mod recurrence;
pub mod scheduler;
pub mod task;
pub mod wheel;

pub use cron_utils::CronScheduler;
pub use factory::{
    create_task_factory, InjectedTaskFactory, SerializerTaskFactory, ServiceContainer,
    TaskFactory, TaskTypeRegistry,
};
pub use live_task::{LiveTask, TaskState};
pub use metrics_collector::SchedulerMetrics;
pub use recurrence::{Recurrence, TaskSchedule};
pub use scheduler::TaskScheduler;
pub use task::{Task, TaskContext, TaskType};
pub use wheel::{HashedWheelTimer, Timeout, TimerTask};
