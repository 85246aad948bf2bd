use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigValidator, ValidationUtils};
use crate::config::{ConfigError, ConfigResult};

/// 任务实例化策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskFactoryKind {
    /// 直接从序列化状态反序列化出任务
    #[default]
    Serializer,
    /// 从容器获取实例后再加载序列化状态中的配置
    Injected,
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 时间轮每格的时长（毫秒）
    pub tick_interval_ms: u64,
    /// 时间轮格数，会向上取整为2的幂
    pub wheel_size: usize,
    /// 两次失败重试之间的等待时间（毫秒）
    pub retry_backoff_ms: u64,
    /// 连续失败的周期数超过该值后不再调度
    pub failure_ceiling: u32,
    /// 启动恢复时每页读取的任务数
    pub recovery_page_size: u32,
    pub factory: TaskFactoryKind,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            wheel_size: 512,
            retry_backoff_ms: 10_000,
            failure_ceiling: 3,
            recovery_page_size: 200,
            factory: TaskFactoryKind::Serializer,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_millis(
            self.tick_interval_ms,
            "scheduler.tick_interval_ms",
            1,
            60_000,
        )?;
        ValidationUtils::validate_count(self.wheel_size, "scheduler.wheel_size", 1 << 20)?;
        ValidationUtils::validate_millis(
            self.retry_backoff_ms,
            "scheduler.retry_backoff_ms",
            0,
            3_600_000,
        )?;
        ValidationUtils::validate_count(
            self.recovery_page_size as usize,
            "scheduler.recovery_page_size",
            10000,
        )?;

        if self.failure_ceiling == 0 {
            return Err(ConfigError::Validation(
                "scheduler.failure_ceiling must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scheduler_config() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(), Duration::from_secs(10));
        assert_eq!(config.failure_ceiling, 3);
        assert_eq!(config.recovery_page_size, 200);
        assert_eq!(config.factory, TaskFactoryKind::Serializer);
    }

    #[test]
    fn test_invalid_scheduler_config() {
        let mut config = SchedulerConfig::default();
        config.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.wheel_size = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.failure_ceiling = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.recovery_page_size = 0;
        assert!(config.validate().is_err());
    }
}
