use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("无法解析任务类型: {type_name}")]
    UnknownTaskType { type_name: String },
    #[error("任务构建失败: {0}")]
    TaskConstruction(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("持久化失败: {0}")]
    Persistence(String),
    #[error("任务 {id} 不会再被触发")]
    NeverOccurs { id: String },
    #[error("时间轮已停止")]
    TimerStopped,
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn invalid_schedule<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSchedule(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn construction_error<S: Into<String>>(msg: S) -> Self {
        Self::TaskConstruction(msg.into())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
