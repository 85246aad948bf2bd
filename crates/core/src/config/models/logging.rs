use serde::{Deserialize, Serialize};

use crate::config::validation::ConfigValidator;
use crate::config::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: {s}. Valid formats: json, pretty"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter 指令，例如 `info` 或 `scheduler_dispatcher=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl ConfigValidator for LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        // 带 `=` 的是按模块的过滤指令，交给 EnvFilter 解析
        if !self.level.contains('=') && !valid_levels.contains(&self.level.to_lowercase().as_str())
        {
            return Err(ConfigError::Validation(format!(
                "Invalid log level: {}. Valid levels: {:?}",
                self.level, valid_levels
            )));
        }
        Ok(())
    }
}
