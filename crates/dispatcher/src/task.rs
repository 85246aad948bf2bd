//! 任务抽象
//!
//! 用户任务实现 [`Task`]，注册时还需实现 [`TaskType`] 以便持久化与重建。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::recurrence::TaskSchedule;
use scheduler_errors::SchedulerResult;

/// 单次执行尝试的上下文
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub properties: &'a HashMap<String, String>,
    /// 当前尝试序号，从1开始
    pub attempt: u32,
    /// 本周期的最大尝试次数
    pub retry: u32,
}

impl TaskContext<'_> {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// 可调度的任务
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn schedule(&self) -> &TaskSchedule;

    fn schedule_mut(&mut self) -> &mut TaskSchedule;

    /// 任务主体，返回错误视为本次尝试失败
    async fn handle(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()>;

    /// 校验调度配置，创建与恢复时都会调用
    fn verify(&self) -> SchedulerResult<()> {
        self.schedule().verify()
    }

    /// 从另一个实例加载配置，容器构建的实例通过它获得持久化的调度配置
    fn load(&mut self, origin: &dyn Task) {
        self.schedule_mut().load(origin.schedule());
    }
}

/// 可注册、可持久化的任务类型
pub trait TaskType: Task + Serialize + DeserializeOwned + Sized {
    /// 持久化记录中引用该类型的名称，注册后不应再修改
    const TYPE_NAME: &'static str;

    /// 任务是否依赖只能由容器提供的协作对象
    const NEEDS_INJECTION: bool = false;
}
