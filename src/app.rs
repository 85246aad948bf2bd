use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use scheduler_core::AppConfig;
use scheduler_dispatcher::{create_task_factory, ServiceContainer, TaskScheduler, TaskTypeRegistry};
use scheduler_infrastructure::StoreFactory;

use crate::heartbeat::HeartbeatTask;

const DEMO_TASK_ID: &str = "demo-heartbeat";
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(60);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 主应用程序
pub struct Application {
    config: AppConfig,
    scheduler: Arc<TaskScheduler>,
}

impl Application {
    /// 按配置创建存储、任务工厂与调度器
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            "初始化应用程序: 存储={:?}, 任务工厂={:?}",
            config.store.kind, config.scheduler.factory
        );

        let stores = StoreFactory::create(&config.store)
            .await
            .context("创建任务存储失败")?;

        let registry = Arc::new(Self::task_registry());
        let container = Arc::new(Self::service_container());
        let factory = create_task_factory(config.scheduler.factory, registry, container);

        let scheduler = Arc::new(TaskScheduler::new(
            &config.scheduler,
            factory,
            stores.tasks,
            stores.events,
        ));

        Ok(Self { config, scheduler })
    }

    fn task_registry() -> TaskTypeRegistry {
        TaskTypeRegistry::new().with::<HeartbeatTask>()
    }

    fn service_container() -> ServiceContainer {
        let mut container = ServiceContainer::new();
        container.register(HeartbeatTask::default);
        container
    }

    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// 恢复任务并运行，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>, demo: bool) -> Result<()> {
        self.scheduler
            .start()
            .await
            .context("从存储恢复任务失败")?;

        if demo {
            self.create_demo_task().await;
        }

        info!(
            "调度器已就绪: tick={}ms, 当前任务数={}",
            self.config.scheduler.tick_interval_ms,
            self.scheduler.live_count().await
        );

        let mut report = tokio::time::interval(STATUS_REPORT_INTERVAL);
        report.tick().await;

        loop {
            tokio::select! {
                _ = report.tick() => {
                    let status = self.scheduler.status();
                    info!(
                        processing = status.processing_count,
                        pending = status.pending_timeouts,
                        "调度器状态"
                    );
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止调度器");
                    break;
                }
            }
        }

        self.scheduler.stop();
        self.drain().await;
        Ok(())
    }

    async fn create_demo_task(&self) {
        if self.scheduler.contains(DEMO_TASK_ID).await {
            return;
        }

        let task = HeartbeatTask::every(Duration::from_secs(10), "调度器运行中");
        match self
            .scheduler
            .create(DEMO_TASK_ID, "演示心跳", task, None)
            .await
        {
            Ok(Some(id)) => info!("已创建演示任务 {}", id),
            Ok(None) => warn!("演示任务未能保存到存储"),
            Err(e) => error!("创建演示任务失败: {}", e),
        }
    }

    /// 等待正在执行的任务结束
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        loop {
            let processing = self.scheduler.status().processing_count;
            if processing == 0 {
                info!("所有任务已执行完毕");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("等待任务执行完毕超时，仍有 {} 个任务在执行", processing);
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownManager;

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let mut config = AppConfig::default();
        config.scheduler.tick_interval_ms = 10;

        let app = Arc::new(Application::new(config).await.unwrap());
        let shutdown = ShutdownManager::new();
        let rx = shutdown.subscribe().await;

        let handle = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.run(rx, true).await })
        };

        let scheduler = app.scheduler();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !scheduler.contains(DEMO_TASK_ID).await {
            assert!(tokio::time::Instant::now() < deadline, "演示任务未创建");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.status().pending_timeouts, 1);

        shutdown.shutdown().await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.status().pending_timeouts, 0);
    }
}
