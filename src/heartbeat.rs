use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use scheduler_dispatcher::{Recurrence, Task, TaskContext, TaskSchedule, TaskType};

/// 演示用的心跳任务，按固定间隔输出一条日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatTask {
    pub schedule: TaskSchedule,
    pub message: String,
}

impl HeartbeatTask {
    pub fn every(period: Duration, message: impl Into<String>) -> Self {
        Self {
            schedule: TaskSchedule::new(Recurrence::every(period)),
            message: message.into(),
        }
    }
}

impl Default for HeartbeatTask {
    fn default() -> Self {
        Self::every(Duration::from_secs(30), "heartbeat")
    }
}

#[async_trait]
impl Task for HeartbeatTask {
    fn schedule(&self) -> &TaskSchedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut TaskSchedule {
        &mut self.schedule
    }

    async fn handle(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        info!(task.id = ctx.id, "{}: {}", ctx.name, self.message);
        Ok(())
    }
}

impl TaskType for HeartbeatTask {
    const TYPE_NAME: &'static str = "heartbeat";
}
