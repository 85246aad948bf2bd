use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigValidator, ValidationUtils};
use crate::config::ConfigResult;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

/// 任务存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            url: "sqlite://scheduler.db".to_string(),
            max_connections: 5,
        }
    }
}

impl ConfigValidator for StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.kind == StoreKind::Sqlite {
            ValidationUtils::validate_url(&self.url, "store.url")?;
            ValidationUtils::validate_count(
                self.max_connections as usize,
                "store.max_connections",
                100,
            )?;
        }
        Ok(())
    }
}
