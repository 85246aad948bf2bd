//! 哈希时间轮定时器
//!
//! 固定数量的格子组成一个环，由单独的 tokio 任务每隔一个 tick 推进一格。
//! 新的定时先进入待处理队列，在每个 tick 开始时由推进任务放入对应的格子，
//! 因此插入不会与游标推进产生竞争。超过一圈的定时记录剩余圈数，每次经过
//! 所在格子时减一，为零时触发。
//!
//! 触发时不持有格子的锁，每个到期的定时都在独立的 tokio 任务中执行，
//! 执行缓慢的任务不会拖慢时间轮本身。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use scheduler_core::SchedulerConfig;
use scheduler_errors::{SchedulerError, SchedulerResult};

/// 由时间轮触发的任务
pub trait TimerTask: Send + Sync + 'static {
    /// 定时到期时调用，`timeout` 为本次触发对应的定时句柄
    fn expire(self: Arc<Self>, timeout: Timeout) -> BoxFuture<'static, ()>;
}

const STATUS_INIT: u8 = 0;
const STATUS_CANCELLED: u8 = 1;
const STATUS_EXPIRED: u8 = 2;

const UNPLACED: usize = usize::MAX;

struct TimeoutState {
    id: u64,
    status: AtomicU8,
    bucket: AtomicUsize,
}

impl TimeoutState {
    fn transition(&self, to: u8) -> bool {
        self.status
            .compare_exchange(STATUS_INIT, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct WheelEntry {
    state: Arc<TimeoutState>,
    task: Arc<dyn TimerTask>,
    /// 相对时间轮启动时刻的到期时间
    deadline: Duration,
    remaining_rounds: u64,
}

struct WheelInner {
    tick_duration: Duration,
    mask: usize,
    buckets: Vec<Mutex<HashMap<u64, WheelEntry>>>,
    incoming: Mutex<VecDeque<WheelEntry>>,
    start: Instant,
    pending: AtomicUsize,
    next_id: AtomicU64,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WheelInner {
    fn wheel_len(&self) -> u64 {
        self.mask as u64 + 1
    }

    /// 计数减一，与 stop 并发时不会下溢
    fn release_pending(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// 把待处理队列中的定时放入对应格子
    fn transfer_incoming(&self, tick: u64) {
        let entries: Vec<WheelEntry> = lock(&self.incoming).drain(..).collect();

        for mut entry in entries {
            if entry.state.status.load(Ordering::Acquire) != STATUS_INIT {
                continue;
            }

            let calculated = (entry.deadline.as_nanos() / self.tick_duration.as_nanos()) as u64;
            entry.remaining_rounds = calculated.saturating_sub(tick) / self.wheel_len();

            // 已经过期的定时放进当前格子，本次 tick 就会触发
            let ticks = calculated.max(tick);
            let index = (ticks as usize) & self.mask;

            entry.state.bucket.store(index, Ordering::Release);
            lock(&self.buckets[index]).insert(entry.state.id, entry);
        }
    }

    /// 处理当前格子，返回需要触发的定时
    fn expire_bucket(&self, tick: u64) -> Vec<(Arc<dyn TimerTask>, Arc<TimeoutState>)> {
        let index = (tick as usize) & self.mask;
        let mut expired = Vec::new();

        lock(&self.buckets[index]).retain(|_, entry| {
            if entry.state.status.load(Ordering::Acquire) != STATUS_INIT {
                return false;
            }
            if entry.remaining_rounds > 0 {
                entry.remaining_rounds -= 1;
                return true;
            }
            if entry.state.transition(STATUS_EXPIRED) {
                self.release_pending();
                expired.push((entry.task.clone(), entry.state.clone()));
            }
            false
        });

        expired
    }
}

/// 时间轮中的一个定时
#[derive(Clone)]
pub struct Timeout {
    state: Arc<TimeoutState>,
    wheel: Weak<WheelInner>,
}

impl Timeout {
    /// 取消尚未触发的定时，已触发或已取消时返回 `false`
    pub fn cancel(&self) -> bool {
        if !self.state.transition(STATUS_CANCELLED) {
            return false;
        }

        if let Some(inner) = self.wheel.upgrade() {
            inner.release_pending();
            let index = self.state.bucket.load(Ordering::Acquire);
            if index != UNPLACED {
                lock(&inner.buckets[index]).remove(&self.state.id);
            }
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == STATUS_CANCELLED
    }

    pub fn is_expired(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == STATUS_EXPIRED
    }

    /// 所属的时间轮，用于在触发回调中重新登记下一次定时
    pub fn timer(&self) -> Option<HashedWheelTimer> {
        self.wheel
            .upgrade()
            .map(|inner| HashedWheelTimer { inner })
    }
}

impl fmt::Debug for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("id", &self.state.id)
            .field("cancelled", &self.is_cancelled())
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// 哈希时间轮
///
/// 克隆得到的句柄共享同一个时间轮。推进任务只持有弱引用，所有句柄被释放后
/// 会自行退出；显式调用 [`HashedWheelTimer::stop`] 会立即停止并丢弃未触发的定时。
#[derive(Clone)]
pub struct HashedWheelTimer {
    inner: Arc<WheelInner>,
}

impl HashedWheelTimer {
    /// 创建并启动时间轮，必须在 tokio 运行时中调用
    ///
    /// `wheel_size` 会向上取整为2的幂，`tick_duration` 最小为1毫秒。
    pub fn new(tick_duration: Duration, wheel_size: usize) -> Self {
        let tick_duration = tick_duration.max(Duration::from_millis(1));
        let wheel_size = wheel_size.max(1).next_power_of_two();

        let inner = Arc::new(WheelInner {
            tick_duration,
            mask: wheel_size - 1,
            buckets: (0..wheel_size).map(|_| Mutex::new(HashMap::new())).collect(),
            incoming: Mutex::new(VecDeque::new()),
            start: Instant::now(),
            pending: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_worker(Arc::downgrade(&inner)));
        *lock(&inner.worker) = Some(handle);

        debug!(
            "时间轮已启动: tick={}ms, 格数={}",
            tick_duration.as_millis(),
            wheel_size
        );

        Self { inner }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.tick_interval(), config.wheel_size)
    }

    async fn run_worker(wheel: Weak<WheelInner>) {
        let (start, tick_duration) = match wheel.upgrade() {
            Some(inner) => (inner.start, inner.tick_duration),
            None => return,
        };

        let mut ticker = tokio::time::interval_at(start + tick_duration, tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;

            let Some(inner) = wheel.upgrade() else {
                break;
            };
            if inner.stopped.load(Ordering::Acquire) {
                break;
            }

            inner.transfer_incoming(tick);
            let expired = inner.expire_bucket(tick);
            Self::dispatch(&inner, expired);

            tick = tick.wrapping_add(1);
        }
    }

    /// 在独立的 tokio 任务中执行到期的定时，返回实际派发的数量
    ///
    /// 停止之后到期的定时直接丢弃。
    fn dispatch(
        inner: &Arc<WheelInner>,
        expired: Vec<(Arc<dyn TimerTask>, Arc<TimeoutState>)>,
    ) -> usize {
        let mut dispatched = 0;
        for (task, state) in expired {
            if inner.stopped.load(Ordering::Acquire) {
                break;
            }
            let timeout = Timeout {
                state,
                wheel: Arc::downgrade(inner),
            };
            tokio::spawn(task.expire(timeout));
            dispatched += 1;
        }
        dispatched
    }

    /// 登记一个在 `delay` 之后触发的定时，`delay` 为零时在下一个 tick 触发
    pub fn new_timeout(
        &self,
        task: Arc<dyn TimerTask>,
        delay: Duration,
    ) -> SchedulerResult<Timeout> {
        let state = Arc::new(TimeoutState {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            status: AtomicU8::new(STATUS_INIT),
            bucket: AtomicUsize::new(UNPLACED),
        });
        let entry = WheelEntry {
            state: state.clone(),
            task,
            deadline: self.inner.start.elapsed().saturating_add(delay),
            remaining_rounds: 0,
        };

        {
            // 在队列锁内检查停止标记，避免与 stop 交错后遗留定时
            let mut incoming = lock(&self.inner.incoming);
            if self.inner.stopped.load(Ordering::Acquire) {
                return Err(SchedulerError::TimerStopped);
            }
            incoming.push_back(entry);
            self.inner.pending.fetch_add(1, Ordering::AcqRel);
        }

        Ok(Timeout {
            state,
            wheel: Arc::downgrade(&self.inner),
        })
    }

    /// 停止推进并丢弃所有未触发的定时，返回丢弃的数量
    pub fn stop(&self) -> usize {
        let dropped_entries: Vec<WheelEntry> = {
            let mut incoming = lock(&self.inner.incoming);
            if self.inner.stopped.swap(true, Ordering::AcqRel) {
                return 0;
            }
            incoming.drain(..).collect()
        };

        if let Some(handle) = lock(&self.inner.worker).take() {
            handle.abort();
        }

        let mut dropped = dropped_entries
            .iter()
            .filter(|entry| entry.state.transition(STATUS_CANCELLED))
            .count();
        for bucket in &self.inner.buckets {
            dropped += lock(bucket)
                .drain()
                .filter(|(_, entry)| entry.state.transition(STATUS_CANCELLED))
                .count();
        }
        let _ = self
            .inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(dropped))
            });

        info!("时间轮已停止，丢弃 {} 个未触发的定时", dropped);
        dropped
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// 尚未触发的定时数量，并发修改时为近似值
    pub fn pending_timeouts(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub fn tick_duration(&self) -> Duration {
        self.inner.tick_duration
    }
}

impl fmt::Debug for HashedWheelTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedWheelTimer")
            .field("tick_duration", &self.inner.tick_duration)
            .field("wheel_size", &self.inner.wheel_len())
            .field("pending", &self.pending_timeouts())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct Recorder {
        fired: AtomicUsize,
        tx: mpsc::UnboundedSender<Instant>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Instant>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    fired: AtomicUsize::new(0),
                    tx,
                }),
                rx,
            )
        }
    }

    impl TimerTask for Recorder {
        fn expire(self: Arc<Self>, _timeout: Timeout) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                self.fired.fetch_add(1, Ordering::SeqCst);
                let _ = self.tx.send(Instant::now());
            })
        }
    }

    /// 每次触发后重新登记自己，直到达到指定次数
    struct Repeater {
        remaining: AtomicUsize,
        delay: Duration,
        tx: mpsc::UnboundedSender<usize>,
    }

    impl TimerTask for Repeater {
        fn expire(self: Arc<Self>, timeout: Timeout) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let left = self.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
                let _ = self.tx.send(left);
                if left > 0 {
                    if let Some(timer) = timeout.timer() {
                        let delay = self.delay;
                        timer.new_timeout(self, delay).unwrap();
                    }
                }
            })
        }
    }

    #[tokio::test]
    async fn test_timeout_fires_after_delay() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (recorder, mut rx) = Recorder::new();

        let begin = Instant::now();
        let timeout = timer
            .new_timeout(recorder.clone(), Duration::from_millis(50))
            .unwrap();
        assert_eq!(timer.pending_timeouts(), 1);

        let fired_at = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(fired_at.duration_since(begin) >= Duration::from_millis(50));
        assert!(timeout.is_expired());
        assert_eq!(recorder.fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending_timeouts(), 0);

        timer.stop();
    }

    #[tokio::test]
    async fn test_zero_delay_fires_on_next_tick() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (recorder, mut rx) = Recorder::new();

        timer.new_timeout(recorder.clone(), Duration::ZERO).unwrap();

        let fired = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(fired.is_ok());
        assert_eq!(recorder.fired.load(Ordering::SeqCst), 1);

        timer.stop();
    }

    #[tokio::test]
    async fn test_delay_longer_than_one_revolution() {
        // 4 格 * 10ms = 40ms 一圈
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 4);
        let (recorder, mut rx) = Recorder::new();

        let begin = Instant::now();
        timer
            .new_timeout(recorder.clone(), Duration::from_millis(130))
            .unwrap();

        let fired_at = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(fired_at.duration_since(begin) >= Duration::from_millis(130));
        assert_eq!(recorder.fired.load(Ordering::SeqCst), 1);

        timer.stop();
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (recorder, _rx) = Recorder::new();

        let timeout = timer
            .new_timeout(recorder.clone(), Duration::from_millis(60))
            .unwrap();
        // 等待定时被放入格子后再取消
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(timeout.cancel());
        assert!(timeout.is_cancelled());
        assert!(!timeout.cancel());
        assert_eq!(timer.pending_timeouts(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(recorder.fired.load(Ordering::SeqCst), 0);

        timer.stop();
    }

    #[tokio::test]
    async fn test_cancel_after_fire_is_noop() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (recorder, mut rx) = Recorder::new();

        let timeout = timer.new_timeout(recorder, Duration::ZERO).unwrap();
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap();

        assert!(!timeout.cancel());
        assert!(timeout.is_expired());
        assert_eq!(timer.pending_timeouts(), 0);

        timer.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_many_timeouts_in_same_bucket() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (recorder, mut rx) = Recorder::new();

        for _ in 0..100 {
            timer
                .new_timeout(recorder.clone(), Duration::from_millis(30))
                .unwrap();
        }
        assert_eq!(timer.pending_timeouts(), 100);

        for _ in 0..100 {
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap();
        }
        assert_eq!(recorder.fired.load(Ordering::SeqCst), 100);
        assert_eq!(timer.pending_timeouts(), 0);

        timer.stop();
    }

    #[tokio::test]
    async fn test_rearm_from_fire() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let repeater = Arc::new(Repeater {
            remaining: AtomicUsize::new(3),
            delay: Duration::from_millis(20),
            tx,
        });

        timer.new_timeout(repeater, Duration::ZERO).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let left = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(left);
        }
        assert_eq!(seen, vec![2, 1, 0]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(timer.pending_timeouts(), 0);

        timer.stop();
    }

    #[tokio::test]
    async fn test_stop_drops_outstanding_timeouts() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (recorder, _rx) = Recorder::new();

        let first = timer
            .new_timeout(recorder.clone(), Duration::from_millis(50))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        let second = timer
            .new_timeout(recorder.clone(), Duration::from_millis(50))
            .unwrap();

        assert_eq!(timer.stop(), 2);
        assert!(timer.is_stopped());
        assert_eq!(timer.pending_timeouts(), 0);
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(recorder.fired.load(Ordering::SeqCst), 0);

        let result = timer.new_timeout(recorder, Duration::ZERO);
        assert!(matches!(result, Err(SchedulerError::TimerStopped)));
        assert_eq!(timer.stop(), 0);
    }

    #[tokio::test]
    async fn test_pending_counter_does_not_underflow() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 8);
        let (recorder, _rx) = Recorder::new();

        timer
            .new_timeout(recorder, Duration::from_millis(500))
            .unwrap();
        assert_eq!(timer.stop(), 1);
        assert_eq!(timer.pending_timeouts(), 0);

        // 与 stop 并发、已经赢得状态切换的取消或触发随后才归还计数
        timer.inner.release_pending();
        assert_eq!(timer.pending_timeouts(), 0);
    }

    #[tokio::test]
    async fn test_expired_after_stop_is_not_dispatched() {
        // tick 足够长，推进任务在测试期间不会处理任何格子
        let timer = HashedWheelTimer::new(Duration::from_secs(3600), 8);
        let (recorder, _rx) = Recorder::new();

        timer.new_timeout(recorder.clone(), Duration::ZERO).unwrap();
        timer.inner.transfer_incoming(0);
        let expired = timer.inner.expire_bucket(0);
        assert_eq!(expired.len(), 1);

        // 推进任务取出到期定时之后、派发之前发生 stop
        timer.stop();
        assert_eq!(HashedWheelTimer::dispatch(&timer.inner, expired), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(recorder.fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.pending_timeouts(), 0);
    }

    #[tokio::test]
    async fn test_wheel_size_rounded_to_power_of_two() {
        let timer = HashedWheelTimer::new(Duration::from_millis(10), 5);
        assert_eq!(timer.inner.wheel_len(), 8);
        assert_eq!(timer.tick_duration(), Duration::from_millis(10));
        timer.stop();
    }
}
