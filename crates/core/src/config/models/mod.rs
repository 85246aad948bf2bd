pub mod app_config;
pub mod logging;
pub mod scheduler;
pub mod store;

pub use app_config::AppConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use scheduler::{SchedulerConfig, TaskFactoryKind};
pub use store::{StoreConfig, StoreKind};
