//! 任务的触发规则

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cron_utils::CronScheduler;
use scheduler_errors::{SchedulerError, SchedulerResult};

/// 触发规则
///
/// 序列化时以 `kind` 字段区分类型：
///
/// ```json
/// {"kind": "cron", "expression": "0 2 * * *"}
/// {"kind": "interval", "period_ms": 60000}
/// {"kind": "one_time", "trigger_at": "2030-01-01T00:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// 按CRON表达式重复触发
    Cron { expression: String },
    /// 按固定间隔重复触发
    Interval { period_ms: u64 },
    /// 在指定时间触发一次
    OneTime { trigger_at: DateTime<Utc> },
}

impl Recurrence {
    pub fn cron(expression: impl Into<String>) -> Self {
        Recurrence::Cron {
            expression: expression.into(),
        }
    }

    pub fn every(period: Duration) -> Self {
        Recurrence::Interval {
            period_ms: period.as_millis() as u64,
        }
    }

    pub fn once_at(trigger_at: DateTime<Utc>) -> Self {
        Recurrence::OneTime { trigger_at }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Recurrence::Cron { .. } => "cron",
            Recurrence::Interval { .. } => "interval",
            Recurrence::OneTime { .. } => "one_time",
        }
    }

    /// 校验规则能否产生触发时间
    pub fn verify(&self) -> SchedulerResult<()> {
        match self {
            Recurrence::Cron { expression } => CronScheduler::validate_cron_expression(expression),
            Recurrence::Interval { period_ms } => {
                if *period_ms == 0 {
                    return Err(SchedulerError::invalid_schedule("触发间隔必须大于0"));
                }
                Ok(())
            }
            Recurrence::OneTime { trigger_at } => {
                if *trigger_at <= Utc::now() {
                    return Err(SchedulerError::invalid_schedule(format!(
                        "一次性任务的触发时间必须晚于当前时间: {trigger_at}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// 计算从 `now` 起到下一次触发的时长，返回零表示不再触发
    ///
    /// `fired` 表示任务是否已经被时间轮触发过，一次性任务触发后不再触发。
    pub fn next_delay(&self, now: DateTime<Utc>, fired: bool) -> Duration {
        match self {
            Recurrence::Cron { expression } => match CronScheduler::new(expression) {
                Ok(scheduler) => scheduler.delay_until_next(now),
                Err(e) => {
                    warn!("无法计算下一次触发时间: {}", e);
                    Duration::ZERO
                }
            },
            Recurrence::Interval { period_ms } => Duration::from_millis(*period_ms),
            Recurrence::OneTime { trigger_at } => {
                if fired {
                    return Duration::ZERO;
                }
                (*trigger_at - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

fn default_retry() -> u32 {
    1
}

/// 任务的调度配置：触发规则与每个周期的最大尝试次数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSchedule {
    pub recurrence: Recurrence,
    #[serde(default = "default_retry")]
    pub retry: u32,
}

impl TaskSchedule {
    pub fn new(recurrence: Recurrence) -> Self {
        Self {
            recurrence,
            retry: default_retry(),
        }
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// 每个触发周期的尝试次数，至少为1
    pub fn retry_budget(&self) -> u32 {
        self.retry.max(1)
    }

    pub fn verify(&self) -> SchedulerResult<()> {
        self.recurrence.verify()
    }

    /// 从另一个实例复制调度配置
    pub fn load(&mut self, origin: &TaskSchedule) {
        self.recurrence = origin.recurrence.clone();
        self.retry = origin.retry;
    }
}
