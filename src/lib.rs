//! 任务调度器宿主程序
//!
//! 负责加载配置、初始化日志、组装存储与调度器，并在收到关闭信号后优雅退出。

pub mod app;
pub mod heartbeat;
pub mod shutdown;
