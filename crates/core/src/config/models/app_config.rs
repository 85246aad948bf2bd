use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{logging::LoggingConfig, scheduler::SchedulerConfig, store::StoreConfig};
use crate::config::validation::ConfigValidator;
use crate::config::ConfigResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 指定的路径必须存在；未指定时依次查找默认路径，都不存在则使用默认值。
    /// 最后叠加 `SCHEDULER_` 前缀的环境变量，例如
    /// `SCHEDULER_SCHEDULER__TICK_INTERVAL_MS=50`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/scheduler.toml",
                "scheduler.toml",
                "/etc/scheduler/config.toml",
            ];

            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.scheduler.validate()?;
        self.store.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{LogFormat, StoreKind, TaskFactoryKind};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_toml_partial() {
        let toml_str = r#"
            [scheduler]
            tick_interval_ms = 50
            retry_backoff_ms = 500
            factory = "injected"

            [store]
            kind = "sqlite"
            url = "sqlite://jobs.db"
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 50);
        assert_eq!(config.scheduler.retry_backoff_ms, 500);
        assert_eq!(config.scheduler.failure_ceiling, 3);
        assert_eq!(config.scheduler.factory, TaskFactoryKind::Injected);
        assert_eq!(config.store.kind, StoreKind::Sqlite);
        assert_eq!(config.store.url, "sqlite://jobs.db");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let toml_str = r#"
            [scheduler]
            tick_interval_ms = 0
        "#;
        assert!(AppConfig::from_toml(toml_str).is_err());

        let toml_str = r#"
            [logging]
            level = "loud"
        "#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.scheduler.wheel_size = 64;
        let serialized = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [scheduler]
            recovery_page_size = 50

            [logging]
            format = "json"
            "#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.scheduler.recovery_page_size, 50);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/scheduler.toml")).is_err());
    }
}
