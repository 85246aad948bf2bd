//! 运行中的任务
//!
//! 每个登记到调度器的任务对应一个 [`LiveTask`]，它同时是时间轮的回调：
//! 到期后执行任务主体，按需重试，然后决定是否登记下一次触发。
//!
//! 状态流转：
//!
//! ```text
//! Armed -> Running -> Succeeded / Failed -> Armed（重新登记）
//!                                        -> Terminal（不再触发）
//! ```

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::metrics_collector::SchedulerMetrics;
use crate::task::{Task, TaskContext};
use crate::wheel::{HashedWheelTimer, TimerTask, Timeout};
use scheduler_domain::{FailureEvent, PersistedTask, SuccessEvent};
use scheduler_errors::SchedulerResult;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// 已登记到时间轮，等待触发
    Armed,
    /// 正在执行
    Running,
    /// 最近一次尝试成功
    Succeeded,
    /// 最近一次尝试失败
    Failed,
    /// 不会再被调度
    Terminal,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Armed,
            1 => TaskState::Running,
            2 => TaskState::Succeeded,
            3 => TaskState::Failed,
            _ => TaskState::Terminal,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskState::Armed => 0,
            TaskState::Running => 1,
            TaskState::Succeeded => 2,
            TaskState::Failed => 3,
            TaskState::Terminal => 4,
        }
    }
}

/// 执行结果通知
#[derive(Clone)]
pub struct TaskNotifier {
    success: mpsc::UnboundedSender<SuccessEvent>,
    failure: mpsc::UnboundedSender<FailureEvent>,
}

impl TaskNotifier {
    pub fn new(
        success: mpsc::UnboundedSender<SuccessEvent>,
        failure: mpsc::UnboundedSender<FailureEvent>,
    ) -> Self {
        Self { success, failure }
    }

    fn notify_success(&self, event: SuccessEvent) {
        if self.success.send(event).is_err() {
            debug!("执行成功事件的接收端已关闭");
        }
    }

    fn notify_failure(&self, event: FailureEvent) {
        if self.failure.send(event).is_err() {
            debug!("执行失败事件的接收端已关闭");
        }
    }
}

/// 所有任务共享的运行环境
pub struct TaskRuntime {
    pub retry_backoff: Duration,
    pub failure_ceiling: u32,
    pub processing: AtomicUsize,
    pub notifier: TaskNotifier,
    pub metrics: SchedulerMetrics,
}

impl TaskRuntime {
    pub fn new(
        retry_backoff: Duration,
        failure_ceiling: u32,
        notifier: TaskNotifier,
        metrics: SchedulerMetrics,
    ) -> Self {
        Self {
            retry_backoff,
            failure_ceiling,
            processing: AtomicUsize::new(0),
            notifier,
            metrics,
        }
    }

    pub fn processing_count(&self) -> usize {
        self.processing.load(Ordering::Acquire)
    }
}

/// 在执行期间维持正在执行计数，任务主体 panic 时也能正确归还
struct ProcessingGuard<'a>(&'a AtomicUsize);

impl<'a> ProcessingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 运行中的任务
pub struct LiveTask {
    id: String,
    name: String,
    type_name: String,
    task: Box<dyn Task>,
    properties: HashMap<String, String>,
    removed: AtomicBool,
    fired: AtomicBool,
    consecutive_failures: AtomicU32,
    state: AtomicU8,
    run_lock: Mutex<()>,
    current: SyncMutex<Option<Timeout>>,
    runtime: Arc<TaskRuntime>,
}

impl LiveTask {
    pub fn new(
        record: &PersistedTask,
        task: Box<dyn Task>,
        runtime: Arc<TaskRuntime>,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            type_name: record.type_name.clone(),
            task,
            properties: record.properties_map()?,
            removed: AtomicBool::new(false),
            fired: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            state: AtomicU8::new(TaskState::Armed.as_u8()),
            run_lock: Mutex::new(()),
            current: SyncMutex::new(None),
            runtime,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TaskState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn retry_budget(&self) -> u32 {
        self.task.schedule().retry_budget()
    }

    /// 标记为已移除并取消等待中的触发，之后的触发都会被静默取消
    pub fn remove(&self) {
        self.removed.store(true, Ordering::Release);
        let current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(timeout) = current {
            if timeout.cancel() {
                self.set_state(TaskState::Terminal);
            }
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// 从当前时间到下一次触发的时长，零表示不再触发
    pub fn next_delay(&self) -> Duration {
        self.task
            .schedule()
            .recurrence
            .next_delay(Utc::now(), self.fired.load(Ordering::Acquire))
    }

    /// 登记到时间轮
    pub fn arm(
        self: &Arc<Self>,
        timer: &HashedWheelTimer,
        delay: Duration,
    ) -> SchedulerResult<Timeout> {
        self.set_state(TaskState::Armed);
        let timeout = timer.new_timeout(self.clone(), delay)?;
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(timeout.clone());

        // remove 可能在登记前已经取走了上一个定时
        if self.is_removed() {
            if timeout.cancel() {
                self.set_state(TaskState::Terminal);
            }
            return Ok(timeout);
        }
        debug!(
            task.id = %self.id,
            delay_ms = delay.as_millis() as u64,
            "任务已登记到时间轮"
        );
        Ok(timeout)
    }

    /// 执行一个周期
    ///
    /// `timeout` 为 `None` 时是手动触发：只执行任务主体，不影响连续失败计数，
    /// 也不会登记下一次触发。与时间轮触发互斥执行。
    pub async fn run(self: &Arc<Self>, timeout: Option<Timeout>) {
        let _guard = self.run_lock.lock().await;

        if self.is_removed() {
            if let Some(timeout) = &timeout {
                timeout.cancel();
            }
            self.set_state(TaskState::Terminal);
            debug!(task.id = %self.id, "任务已移除，忽略本次触发");
            return;
        }

        let Some(timeout) = timeout else {
            let previous = self.state();
            self.execute().await;
            self.set_state(previous);
            return;
        };

        self.fired.store(true, Ordering::Release);
        let success = self.execute().await;
        self.complete(success, &timeout);
    }

    /// 在重试预算内执行任务主体，返回本周期是否成功
    async fn execute(&self) -> bool {
        let retry = self.retry_budget();

        for attempt in 1..=retry {
            self.set_state(TaskState::Running);
            let ctx = TaskContext {
                id: &self.id,
                name: &self.name,
                properties: &self.properties,
                attempt,
                retry,
            };
            let span = info_span!("task", task.id = %self.id, task.name = %self.name, attempt);

            let started = Instant::now();
            let result = {
                let _processing = ProcessingGuard::enter(&self.runtime.processing);
                AssertUnwindSafe(self.task.handle(&ctx))
                    .catch_unwind()
                    .instrument(span)
                    .await
                    .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic))))
            };
            let duration = started.elapsed();
            let duration_ms = duration.as_millis() as u64;

            match result {
                Ok(()) => {
                    self.set_state(TaskState::Succeeded);
                    self.runtime.metrics.record_task_execution(
                        &self.type_name,
                        true,
                        duration.as_secs_f64(),
                    );
                    self.runtime
                        .notifier
                        .notify_success(SuccessEvent::new(&self.id, &self.type_name, duration_ms));
                    return true;
                }
                Err(err) => {
                    self.set_state(TaskState::Failed);
                    self.runtime.metrics.record_task_execution(
                        &self.type_name,
                        false,
                        duration.as_secs_f64(),
                    );
                    self.runtime.notifier.notify_failure(FailureEvent::new(
                        &self.id,
                        &self.type_name,
                        duration_ms,
                        format!("Execute at {attempt} of {retry}: {err}"),
                        format!("{err:?}"),
                    ));

                    if attempt == retry || self.is_removed() {
                        break;
                    }
                    self.runtime.metrics.record_task_retry();
                    tokio::time::sleep(self.runtime.retry_backoff).await;
                    if self.is_removed() {
                        break;
                    }
                }
            }
        }

        false
    }

    /// 周期结束后决定是否登记下一次触发
    fn complete(self: &Arc<Self>, success: bool, timeout: &Timeout) {
        let failures = if success {
            self.consecutive_failures.store(0, Ordering::Release);
            0
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
        };

        if failures > self.runtime.failure_ceiling {
            warn!(
                task.id = %self.id,
                "任务连续失败 {} 个周期，超过上限 {}，不再调度",
                failures,
                self.runtime.failure_ceiling
            );
            self.terminate();
            return;
        }

        if self.is_removed() {
            self.terminate();
            return;
        }

        let delay = self.next_delay();
        if delay.is_zero() {
            info!(task.id = %self.id, "任务没有下一次触发时间，不再调度");
            self.terminate();
            return;
        }

        let Some(timer) = timeout.timer() else {
            self.terminate();
            return;
        };
        if let Err(e) = self.arm(&timer, delay) {
            warn!(task.id = %self.id, error = %e, "重新登记任务失败");
            self.terminate();
        }
    }

    fn terminate(&self) {
        self.set_state(TaskState::Terminal);
        self.runtime.metrics.record_task_terminal();
    }
}

impl TimerTask for LiveTask {
    fn expire(self: Arc<Self>, timeout: Timeout) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.run(Some(timeout)).await })
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("任务执行发生panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("任务执行发生panic: {message}")
    } else {
        "任务执行发生panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{Recurrence, TaskSchedule};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedTask {
        schedule: TaskSchedule,
        calls: Arc<AtomicUsize>,
        /// 前 `fail_first` 次调用失败
        fail_first: usize,
    }

    #[async_trait]
    impl Task for ScriptedTask {
        fn schedule(&self) -> &TaskSchedule {
            &self.schedule
        }

        fn schedule_mut(&mut self) -> &mut TaskSchedule {
            &mut self.schedule
        }

        async fn handle(&self, _ctx: &TaskContext<'_>) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("第{}次调用失败", call + 1);
            }
            Ok(())
        }
    }

    struct PanicTask {
        schedule: TaskSchedule,
    }

    #[async_trait]
    impl Task for PanicTask {
        fn schedule(&self) -> &TaskSchedule {
            &self.schedule
        }

        fn schedule_mut(&mut self) -> &mut TaskSchedule {
            &mut self.schedule
        }

        async fn handle(&self, _ctx: &TaskContext<'_>) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    struct Harness {
        runtime: Arc<TaskRuntime>,
        success_rx: mpsc::UnboundedReceiver<SuccessEvent>,
        failure_rx: mpsc::UnboundedReceiver<FailureEvent>,
    }

    fn harness(failure_ceiling: u32) -> Harness {
        let (success_tx, success_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(TaskRuntime::new(
            Duration::from_millis(5),
            failure_ceiling,
            TaskNotifier::new(success_tx, failure_tx),
            SchedulerMetrics::new(),
        ));
        Harness {
            runtime,
            success_rx,
            failure_rx,
        }
    }

    fn live(task: Box<dyn Task>, runtime: Arc<TaskRuntime>) -> Arc<LiveTask> {
        let record = PersistedTask::new("job-1", "测试任务", "scripted", "{}", None).unwrap();
        Arc::new(LiveTask::new(&record, task, runtime).unwrap())
    }

    fn scripted(retry: u32, fail_first: usize, calls: Arc<AtomicUsize>) -> Box<dyn Task> {
        Box::new(ScriptedTask {
            schedule: TaskSchedule::new(Recurrence::every(Duration::from_secs(60))).with_retry(retry),
            calls,
            fail_first,
        })
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let mut h = harness(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = live(scripted(3, 2, calls.clone()), h.runtime.clone());

        task.run(None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let first = h.failure_rx.try_recv().unwrap();
        assert_eq!(first.message, "Execute at 1 of 3: 第1次调用失败");
        let second = h.failure_rx.try_recv().unwrap();
        assert_eq!(second.message, "Execute at 2 of 3: 第2次调用失败");
        assert!(h.failure_rx.try_recv().is_err());
        assert_eq!(h.success_rx.try_recv().unwrap().id, "job-1");
        assert_eq!(h.runtime.processing_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let mut h = harness(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = live(scripted(2, usize::MAX, calls.clone()), h.runtime.clone());

        task.run(None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(h.failure_rx.try_recv().is_ok());
        assert!(h.failure_rx.try_recv().is_ok());
        assert!(h.failure_rx.try_recv().is_err());
        assert!(h.success_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_run_keeps_state_and_failure_count() {
        let h = harness(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = live(scripted(1, usize::MAX, calls.clone()), h.runtime.clone());

        task.run(None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Armed);
        assert_eq!(task.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_removed_task_does_not_execute() {
        let h = harness(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = live(scripted(1, 0, calls.clone()), h.runtime.clone());

        task.remove();
        task.run(None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(task.state(), TaskState::Terminal);
    }

    #[tokio::test]
    async fn test_remove_cancels_pending_fire() {
        let h = harness(3);
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = live(scripted(1, 0, calls.clone()), h.runtime.clone());

        let timeout = task.arm(&timer, Duration::from_millis(50)).unwrap();
        assert_eq!(timer.pending_timeouts(), 1);

        task.remove();
        assert!(timeout.is_cancelled());
        assert_eq!(timer.pending_timeouts(), 0);
        assert_eq!(task.state(), TaskState::Terminal);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        timer.stop();
    }

    #[tokio::test]
    async fn test_arm_after_remove_is_cancelled() {
        let h = harness(3);
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = live(scripted(1, 0, calls.clone()), h.runtime.clone());

        // 重新登记与删除交错：删除发生在登记之前
        task.remove();
        let timeout = task.arm(&timer, Duration::from_millis(20)).unwrap();

        assert!(timeout.is_cancelled());
        assert_eq!(timer.pending_timeouts(), 0);
        assert_eq!(task.state(), TaskState::Terminal);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        timer.stop();
    }

    #[tokio::test]
    async fn test_scheduled_run_rearms() {
        let h = harness(3);
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = live(scripted(1, 0, calls.clone()), h.runtime.clone());

        task.arm(&timer, Duration::from_millis(20)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Armed);
        assert_eq!(timer.pending_timeouts(), 1);

        timer.stop();
    }

    #[tokio::test]
    async fn test_failure_ceiling_terminates() {
        let h = harness(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(
            LiveTask::new(
                &PersistedTask::new("job-2", "失败任务", "scripted", "{}", None).unwrap(),
                Box::new(ScriptedTask {
                    schedule: TaskSchedule::new(Recurrence::every(Duration::from_millis(20))),
                    calls: calls.clone(),
                    fail_first: usize::MAX,
                }),
                h.runtime.clone(),
            )
            .unwrap(),
        );
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);

        task.arm(&timer, Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        // 上限为1：第2个失败周期后终止
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(task.state(), TaskState::Terminal);
        assert_eq!(timer.pending_timeouts(), 0);

        timer.stop();
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let mut h = harness(3);
        let task = live(
            Box::new(PanicTask {
                schedule: TaskSchedule::new(Recurrence::every(Duration::from_secs(1))),
            }),
            h.runtime.clone(),
        );

        task.run(None).await;

        let event = h.failure_rx.try_recv().unwrap();
        assert!(event.message.contains("boom"));
        assert_eq!(h.runtime.processing_count(), 0);
    }
}
