pub mod config;
pub mod logging;

pub use config::models::{
    AppConfig, LogFormat, LoggingConfig, SchedulerConfig, StoreConfig, StoreKind,
    TaskFactoryKind,
};
pub use config::validation::{ConfigValidator, ValidationUtils};
pub use config::{ConfigError, ConfigResult};
pub use logging::init_logging;
