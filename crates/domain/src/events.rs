//! 任务执行结果事件
//!
//! 每次执行尝试结束后由任务状态机发出，调度器负责转交给 `EventStore`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务执行成功事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEvent {
    pub id: String,
    pub type_name: String,
    pub duration_ms: u64,
    pub occurred_at: DateTime<Utc>,
}

impl SuccessEvent {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            duration_ms,
            occurred_at: Utc::now(),
        }
    }
}

/// 任务执行失败事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub id: String,
    pub type_name: String,
    pub duration_ms: u64,
    /// 包含尝试次数的错误描述，例如 `Execute at 1 of 3: ...`
    pub message: String,
    /// 完整的错误链
    pub trace: String,
    pub occurred_at: DateTime<Utc>,
}

impl FailureEvent {
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        duration_ms: u64,
        message: impl Into<String>,
        trace: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            duration_ms,
            message: message.into(),
            trace: trace.into(),
            occurred_at: Utc::now(),
        }
    }
}
