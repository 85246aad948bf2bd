use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cron_utils::CronScheduler;
use crate::factory::TaskFactory;
use crate::live_task::{LiveTask, TaskNotifier, TaskRuntime, TaskState};
use crate::metrics_collector::SchedulerMetrics;
use crate::recurrence::Recurrence;
use crate::task::TaskType;
use crate::wheel::HashedWheelTimer;
use scheduler_core::{SchedulerConfig, TaskFactoryKind};
use scheduler_domain::{
    validate_paging, validate_task_id, validate_task_name, EventStore, FailureEvent, PagedResult,
    PersistedTask, SchedulerState, SchedulerStatus, SuccessEvent, TaskStore,
};
use scheduler_errors::{SchedulerError, SchedulerResult};

/// 任务调度器
///
/// 维护运行中任务的登记表，并通过 [`TaskStore`] 保证任务在重启后可以恢复。
/// 创建任务的调用会等待 [`TaskScheduler::start`] 完成恢复之后才继续。
pub struct TaskScheduler {
    task_store: Arc<dyn TaskStore>,
    factory: Arc<dyn TaskFactory>,
    timer: HashedWheelTimer,
    tasks: RwLock<HashMap<String, Arc<LiveTask>>>,
    runtime: Arc<TaskRuntime>,
    state: watch::Sender<SchedulerState>,
    recovery_page_size: u32,
    metrics: SchedulerMetrics,
    event_forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// 创建调度器并启动时间轮与执行结果的转存任务，必须在 tokio 运行时中调用
    pub fn new(
        config: &SchedulerConfig,
        factory: Arc<dyn TaskFactory>,
        task_store: Arc<dyn TaskStore>,
        event_store: Arc<dyn EventStore>,
    ) -> Self {
        let (success_tx, success_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let metrics = SchedulerMetrics::new();

        let runtime = Arc::new(TaskRuntime::new(
            config.retry_backoff(),
            config.failure_ceiling,
            TaskNotifier::new(success_tx, failure_tx),
            metrics.clone(),
        ));
        let event_forwarders = spawn_event_forwarders(event_store, success_rx, failure_rx);
        let (state, _) = watch::channel(SchedulerState::NotInitialized);

        info!(
            "创建任务调度器: tick={}ms, 格数={}, 任务工厂={:?}",
            config.tick_interval_ms, config.wheel_size, config.factory
        );

        Self {
            task_store,
            factory,
            timer: HashedWheelTimer::from_config(config),
            tasks: RwLock::new(HashMap::new()),
            runtime,
            state,
            recovery_page_size: config.recovery_page_size.max(1),
            metrics,
            event_forwarders: Mutex::new(event_forwarders),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// 从存储中分页恢复任务
    ///
    /// 单个任务恢复失败只记录日志并跳过；读取存储失败时回到未初始化状态并返回错误，
    /// 可以再次调用。重复调用已启动的调度器不会产生任何效果。
    pub async fn start(&self) -> SchedulerResult<()> {
        let began = self.state.send_if_modified(|state| {
            if *state == SchedulerState::NotInitialized {
                *state = SchedulerState::Initializing;
                true
            } else {
                false
            }
        });
        if !began {
            warn!("调度器已经启动，忽略重复的启动请求");
            return Ok(());
        }

        info!("开始从存储恢复任务");
        let limit = self.recovery_page_size;
        let mut page = 1;
        let mut recovered: u64 = 0;
        let mut skipped: u64 = 0;

        loop {
            let records = match self.task_store.take_tasks(page, limit).await {
                Ok(records) => records,
                Err(e) => {
                    error!("读取第 {} 页任务失败: {}", page, e);
                    self.state.send_replace(SchedulerState::NotInitialized);
                    return Err(e);
                }
            };
            let fetched = records.len();

            for record in &records {
                match self.enqueue(record).await {
                    Ok(delay) => {
                        recovered += 1;
                        debug!(
                            task.id = %record.id,
                            "恢复任务 {}，{}ms 后触发",
                            record.name,
                            delay.as_millis()
                        );
                    }
                    Err(e) => {
                        skipped += 1;
                        error!(task.id = %record.id, error = %e, "恢复任务失败，跳过该任务");
                    }
                }
            }

            if fetched < limit as usize {
                break;
            }
            page += 1;
        }

        self.metrics.record_recovered(recovered);
        self.state.send_replace(SchedulerState::Initialized);
        info!("任务恢复完成: 恢复 {} 个，跳过 {} 个", recovered, skipped);
        Ok(())
    }

    /// 创建任务
    ///
    /// 持久化失败（例如 id 已存在）时返回 `Ok(None)`，不会登记任何任务。
    pub async fn create<T: TaskType>(
        &self,
        id: &str,
        name: &str,
        task: T,
        properties: Option<HashMap<String, String>>,
    ) -> SchedulerResult<Option<String>> {
        validate_task_id(id)?;
        validate_task_name(name)?;
        task.verify()?;

        if T::NEEDS_INJECTION && self.factory.kind() == TaskFactoryKind::Serializer {
            warn!(
                task.id = %id,
                "任务类型 {} 依赖注入的协作对象，当前使用的序列化工厂无法提供",
                T::TYPE_NAME
            );
        }

        self.wait_for_initialized().await;

        let data = serde_json::to_string(&task)?;
        let record = PersistedTask::new(id, name, T::TYPE_NAME, data, properties.as_ref())?;
        let (live, delay) = self.instantiate(&record)?;

        match self.task_store.save_task(&record).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(task.id = %id, "保存任务失败，可能已存在相同 id 的任务");
                return Ok(None);
            }
            Err(e) => {
                error!(task.id = %id, error = %e, "保存任务失败");
                return Ok(None);
            }
        }

        self.activate(live, delay).await?;
        info!(task.id = %id, "创建任务 {}，{}ms 后触发", name, delay.as_millis());
        Ok(Some(id.to_string()))
    }

    /// 使用随机生成的 id 创建任务
    pub async fn create_with_generated_id<T: TaskType>(
        &self,
        name: &str,
        task: T,
        properties: Option<HashMap<String, String>>,
    ) -> SchedulerResult<Option<String>> {
        let id = Uuid::new_v4().to_string();
        self.create(&id, name, task, properties).await
    }

    /// 替换已有任务的定义，新的调度从当前时间重新计算
    pub async fn update<T: TaskType>(
        &self,
        id: &str,
        name: &str,
        task: T,
        properties: Option<HashMap<String, String>>,
    ) -> SchedulerResult<bool> {
        validate_task_id(id)?;
        validate_task_name(name)?;
        task.verify()?;

        let data = serde_json::to_string(&task)?;
        let record = PersistedTask::new(id, name, T::TYPE_NAME, data, properties.as_ref())?;
        let (live, delay) = self.instantiate(&record)?;

        let previous = self
            .tasks
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        previous.remove();

        let updated = self.task_store.update_task(&record).await.map_err(|e| {
            SchedulerError::Persistence(format!("更新任务 {id} 失败: {e}"))
        })?;
        if !updated {
            return Err(SchedulerError::Persistence(format!(
                "更新任务 {id} 失败: 存储中不存在该任务"
            )));
        }

        self.activate(live, delay).await?;
        info!(task.id = %id, "更新任务 {}，{}ms 后触发", name, delay.as_millis());
        Ok(true)
    }

    /// 删除任务，返回存储层是否删除了记录
    pub async fn remove(&self, id: &str) -> SchedulerResult<bool> {
        validate_task_id(id)?;

        let live = self
            .tasks
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        live.remove();

        let removed = self.task_store.remove_task(id).await?;
        info!(task.id = %id, "删除任务 {}", live.name());
        Ok(removed)
    }

    /// 立即执行一次任务主体，不影响已登记的下一次触发
    ///
    /// 任务不存在时返回 `Ok(false)`。
    pub async fn trigger(&self, id: &str) -> SchedulerResult<bool> {
        validate_task_id(id)?;

        let live = self.tasks.read().await.get(id).cloned();
        match live {
            Some(live) => {
                debug!(task.id = %id, "手动触发任务");
                live.run(None).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 分页查询任务记录，`keyword` 按名称前缀匹配
    pub async fn paged_query(
        &self,
        keyword: Option<&str>,
        page: u32,
        limit: u32,
    ) -> SchedulerResult<PagedResult<PersistedTask>> {
        validate_paging(page, limit)?;
        let keyword = keyword.map(str::trim).filter(|k| !k.is_empty());
        self.task_store.paged_query(keyword, page, limit).await
    }

    pub fn status(&self) -> SchedulerStatus {
        let status = SchedulerStatus {
            processing_count: self.runtime.processing_count(),
            pending_timeouts: self.timer.pending_timeouts(),
        };
        self.metrics.update_status(&status);
        status
    }

    /// 停止时间轮，正在执行的任务会继续执行完毕，但不会再被登记
    pub fn stop(&self) {
        let dropped = self.timer.stop();
        info!("调度器已停止，{} 个等待中的触发被丢弃", dropped);
    }

    pub async fn task_state(&self, id: &str) -> Option<TaskState> {
        self.tasks.read().await.get(id).map(|live| live.state())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    pub async fn live_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    async fn wait_for_initialized(&self) {
        let mut rx = self.state.subscribe();
        let ready = rx.borrow().is_initialized();
        if !ready {
            debug!("调度器尚未完成恢复，等待初始化");
        }
        // 发送端由 self 持有，等待期间不会关闭
        let _ = rx.wait_for(|state| state.is_initialized()).await;
    }

    async fn enqueue(&self, record: &PersistedTask) -> SchedulerResult<Duration> {
        let (live, delay) = self.instantiate(record)?;
        self.activate(live, delay).await?;
        Ok(delay)
    }

    /// 通过任务工厂重建任务并计算首次触发时间
    fn instantiate(&self, record: &PersistedTask) -> SchedulerResult<(Arc<LiveTask>, Duration)> {
        let task = self.factory.create(&record.type_name, &record.data)?;
        task.verify()?;

        if let Recurrence::Cron { expression } = &task.schedule().recurrence {
            if let Ok(cron) = CronScheduler::new(expression) {
                debug!(task.id = %record.id, "任务执行频率: {}", cron.frequency_description());
            }
        }

        let live = Arc::new(LiveTask::new(record, task, self.runtime.clone())?);
        let delay = live.next_delay();
        if delay.is_zero() {
            return Err(SchedulerError::NeverOccurs {
                id: record.id.clone(),
            });
        }
        Ok((live, delay))
    }

    async fn activate(&self, live: Arc<LiveTask>, delay: Duration) -> SchedulerResult<()> {
        live.arm(&self.timer, delay)?;

        let mut tasks = self.tasks.write().await;
        if let Some(previous) = tasks.insert(live.id().to_string(), live.clone()) {
            warn!(task.id = %live.id(), "登记表中已存在相同 id 的任务，旧任务被移除");
            previous.remove();
        }
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.timer.stop();
        let handles = match self.event_forwarders.get_mut() {
            Ok(handles) => std::mem::take(handles),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for handle in handles {
            handle.abort();
        }
    }
}

/// 把执行结果转存到 [`EventStore`]，保存失败只记录日志
fn spawn_event_forwarders(
    event_store: Arc<dyn EventStore>,
    mut success_rx: mpsc::UnboundedReceiver<SuccessEvent>,
    mut failure_rx: mpsc::UnboundedReceiver<FailureEvent>,
) -> Vec<JoinHandle<()>> {
    let store = event_store.clone();
    let success = tokio::spawn(async move {
        while let Some(event) = success_rx.recv().await {
            info!(
                task.id = %event.id,
                duration_ms = event.duration_ms,
                "任务执行成功"
            );
            if let Err(e) = store.save_success(&event).await {
                error!(task.id = %event.id, error = %e, "保存执行成功记录失败");
            }
        }
    });

    let store = event_store;
    let failure = tokio::spawn(async move {
        while let Some(event) = failure_rx.recv().await {
            error!(
                task.id = %event.id,
                duration_ms = event.duration_ms,
                "任务执行失败: {}\n{}",
                event.message,
                event.trace
            );
            if let Err(e) = store.save_failure(&event).await {
                error!(task.id = %event.id, error = %e, "保存执行失败记录失败");
            }
        }
    });

    vec![success, failure]
}
