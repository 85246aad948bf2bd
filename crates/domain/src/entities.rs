use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scheduler_errors::SchedulerResult;

/// 持久化的任务记录
///
/// 存储层拥有该记录，调度器只通过 `TaskStore` 读写它，不关心 `data` 与
/// `properties` 的内部编码。
///
/// # 字段说明
///
/// - `id`: 调用方指定的唯一标识（不超过36个字符）
/// - `name`: 任务名称（不超过255个字符）
/// - `type_name`: 任务类型引用，由任务工厂解析
/// - `data`: 任务序列化状态（JSON）
/// - `properties`: 任务属性（JSON 字符串字典），可以为空
/// - `success_count` / `failure_count`: 执行成功 / 失败次数
/// - `creation_time`: 记录创建时间，恢复时按此排序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTask {
    pub id: String,
    pub name: String,
    pub type_name: String,
    pub data: String,
    pub properties: Option<String>,
    pub success_count: i64,
    pub failure_count: i64,
    pub creation_time: DateTime<Utc>,
}

impl PersistedTask {
    /// 创建新的任务记录
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        type_name: impl Into<String>,
        data: impl Into<String>,
        properties: Option<&HashMap<String, String>>,
    ) -> SchedulerResult<Self> {
        let properties = match properties {
            Some(map) => Some(serde_json::to_string(map)?),
            None => None,
        };

        Ok(Self {
            id: id.into(),
            name: name.into(),
            type_name: type_name.into(),
            data: data.into(),
            properties,
            success_count: 0,
            failure_count: 0,
            creation_time: Utc::now(),
        })
    }

    /// 解析任务属性，未设置时返回空字典
    pub fn properties_map(&self) -> SchedulerResult<HashMap<String, String>> {
        match self.properties.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(raw)?),
            _ => Ok(HashMap::new()),
        }
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }
}

/// 分页查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    /// 满足条件的记录总数
    pub count: u64,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<T>,
}

impl<T> PagedResult<T> {
    pub fn new(count: u64, page: u32, limit: u32, items: Vec<T>) -> Self {
        Self {
            count,
            page,
            limit,
            items,
        }
    }
}

/// 调度器运行状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// 正在执行的任务数量
    pub processing_count: usize,
    /// 时间轮中等待触发的定时数量
    pub pending_timeouts: usize,
}

/// 调度器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    #[serde(rename = "NOT_INITIALIZED")]
    NotInitialized,
    #[serde(rename = "INITIALIZING")]
    Initializing,
    #[serde(rename = "INITIALIZED")]
    Initialized,
}

impl SchedulerState {
    pub fn is_initialized(&self) -> bool {
        matches!(self, SchedulerState::Initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_persisted_task() {
        let mut properties = HashMap::new();
        properties.insert("owner".to_string(), "ops".to_string());

        let task = PersistedTask::new("job-1", "备份", "backup", "{}", Some(&properties)).unwrap();
        assert_eq!(task.id, "job-1");
        assert_eq!(task.success_count, 0);
        assert_eq!(task.failure_count, 0);
        assert_eq!(task.properties_map().unwrap(), properties);
    }

    #[test]
    fn test_properties_map_defaults_to_empty() {
        let mut task = PersistedTask::new("job-1", "备份", "backup", "{}", None).unwrap();
        assert!(task.properties.is_none());
        assert!(task.properties_map().unwrap().is_empty());

        task.properties = Some("   ".to_string());
        assert!(task.properties_map().unwrap().is_empty());

        task.properties = Some("not json".to_string());
        assert!(task.properties_map().is_err());
    }

    #[test]
    fn test_record_counters() {
        let mut task = PersistedTask::new("job-1", "备份", "backup", "{}", None).unwrap();
        task.record_success();
        task.record_success();
        task.record_failure();
        assert_eq!(task.success_count, 2);
        assert_eq!(task.failure_count, 1);
    }

    #[test]
    fn test_scheduler_state() {
        assert!(SchedulerState::Initialized.is_initialized());
        assert!(!SchedulerState::Initializing.is_initialized());
        assert_eq!(
            serde_json::to_string(&SchedulerState::NotInitialized).unwrap(),
            "\"NOT_INITIALIZED\""
        );
    }
}
