//! Bounded worker-pool queue
//!
//! Tasks are enqueued with an optional priority and executed by a pool of
//! `concurrency` workers. Dispatch order is FIFO, LIFO, or by descending
//! priority (stable for ties). Bounded queues apply an overflow policy, and
//! priority queues can boost long-waiting items so low-priority work is not
//! starved forever.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Dispatch order for queued waiters and tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Arrival order
    Fifo,
    /// Reverse arrival order
    Lifo,
    /// Descending numeric priority, arrival order for ties
    Priority,
}

/// What to do when a bounded queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFullPolicy {
    /// Fail the new submission
    Error,
    /// Drop the new submission, failing its future
    DropNew,
    /// Evict the lowest-priority pending task to admit the new one
    DropLowestPriority,
    /// Suspend the submitter until space frees
    WaitForSpace,
}

/// Priority boost for long-waiting items
#[derive(Clone)]
pub struct StarvationConfig {
    /// How long an item may wait before its priority is boosted
    pub grace: Duration,
    /// Added to the effective priority per boost
    pub boost: i64,
    /// Invoked with the task id and its new effective priority
    pub on_starvation_boost: Option<Arc<dyn Fn(u64, i64) + Send + Sync>>,
}

impl StarvationConfig {
    /// Boost by `boost` after each `grace` spent waiting
    pub fn new(grace: Duration, boost: i64) -> Self {
        Self {
            grace,
            boost,
            on_starvation_boost: None,
        }
    }
}

/// Worker-pool construction parameters
#[derive(Clone)]
pub struct WorkQueueConfig {
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Dispatch order
    pub mode: QueueMode,
    /// Pending-queue capacity; `None` is unbounded
    pub max_queue_size: Option<usize>,
    /// Overflow policy for bounded queues
    pub full_policy: QueueFullPolicy,
    /// Starvation prevention, meaningful in priority mode
    pub starvation: Option<StarvationConfig>,
}

impl WorkQueueConfig {
    /// FIFO pool with `concurrency` workers and an unbounded queue
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            mode: QueueMode::Fifo,
            max_queue_size: None,
            full_policy: QueueFullPolicy::Error,
            starvation: None,
        }
    }
}

/// Point-in-time queue occupancy
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Pending tasks not yet dispatched
    pub queue_length: usize,
    /// Tasks currently running
    pub active_count: usize,
}

type Job<R> = Box<dyn FnOnce() -> BoxFuture<'static, WorkResult<R>> + Send>;

struct QueuedTask<R> {
    id: u64,
    effective_priority: i64,
    seq: u64,
    last_boost: Instant,
    job: Job<R>,
    tx: oneshot::Sender<WorkResult<R>>,
}

struct QueueState<R> {
    pending: VecDeque<QueuedTask<R>>,
    active: usize,
    seq: u64,
    shutdown: bool,
    space_waiters: Vec<oneshot::Sender<()>>,
}

struct QueueInner<R> {
    config: WorkQueueConfig,
    state: Mutex<QueueState<R>>,
    idle: Notify,
}

/// Worker pool executing submitted tasks
pub struct WorkQueue<R> {
    inner: Arc<QueueInner<R>>,
    scan: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl<R> WorkQueue<R>
where
    R: Send + 'static,
{
    /// Create a pool from configuration
    pub fn new(config: WorkQueueConfig) -> WorkResult<Self> {
        if config.concurrency == 0 {
            return Err(WorkError::Config("queue concurrency must be > 0".into()));
        }
        if config.max_queue_size == Some(0) {
            return Err(WorkError::Config("queue max_queue_size must be > 0".into()));
        }
        let inner = Arc::new(QueueInner {
            config: config.clone(),
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                active: 0,
                seq: 0,
                shutdown: false,
                space_waiters: Vec::new(),
            }),
            idle: Notify::new(),
        });
        let scan = config
            .starvation
            .as_ref()
            .map(|cfg| Self::spawn_starvation_scan(Arc::downgrade(&inner), cfg.clone()));
        Ok(Self {
            inner,
            scan: Mutex::new(scan),
            next_id: AtomicU64::new(0),
        })
    }

    /// Submit a task with default priority and await its outcome
    pub async fn enqueue<F, Fut>(&self, job: F) -> WorkResult<R>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        self.enqueue_priority(0, job).await
    }

    /// Submit a task with an explicit priority and await its outcome
    pub async fn enqueue_priority<F, Fut>(&self, priority: i64, job: F) -> WorkResult<R>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        enum Decision<R> {
            Shutdown,
            Rejected(WorkError),
            RunNow(Job<R>, oneshot::Sender<WorkResult<R>>),
            Queued,
            WaitForSpace(oneshot::Receiver<()>),
        }

        let mut job: Option<Job<R>> = Some(Box::new(move || job().boxed()));
        loop {
            let (tx, rx) = oneshot::channel();
            // the decision is taken under one lock acquisition; the guard never
            // survives past this block, so nothing here is held across an await
            let decision = {
                let mut state = self.inner.state.lock();
                if state.shutdown {
                    Decision::Shutdown
                } else if state.active < self.inner.config.concurrency {
                    // a free worker: run immediately, bypassing the queue
                    state.active += 1;
                    let job = job.take().expect("job consumed by a single branch");
                    Decision::RunNow(job, tx)
                } else {
                    let at_capacity = self
                        .inner
                        .config
                        .max_queue_size
                        .is_some_and(|max| state.pending.len() >= max);
                    if at_capacity {
                        match self.inner.config.full_policy {
                            QueueFullPolicy::Error => Decision::Rejected(WorkError::QueueFull(
                                format!("pending tasks at capacity {}", state.pending.len()),
                            )),
                            QueueFullPolicy::DropNew => {
                                debug!("queue full, dropping new task");
                                Decision::Rejected(WorkError::Dropped(
                                    "queue full, new task dropped",
                                ))
                            }
                            QueueFullPolicy::DropLowestPriority => {
                                QueueInner::<R>::evict_lowest(&mut state);
                                let job = job.take().expect("job consumed by a single branch");
                                Self::push_pending(&self.next_id, &mut state, priority, job, tx);
                                Decision::Queued
                            }
                            QueueFullPolicy::WaitForSpace => {
                                let (space_tx, space_rx) = oneshot::channel();
                                state.space_waiters.push(space_tx);
                                Decision::WaitForSpace(space_rx)
                            }
                        }
                    } else {
                        let job = job.take().expect("job consumed by a single branch");
                        Self::push_pending(&self.next_id, &mut state, priority, job, tx);
                        Decision::Queued
                    }
                }
            };

            match decision {
                Decision::Shutdown => {
                    return Err(WorkError::InvalidState("work queue is shut down".into()));
                }
                Decision::Rejected(err) => return Err(err),
                Decision::RunNow(job, tx) => {
                    QueueInner::spawn_worker(&self.inner, job, tx);
                    return rx.await.map_err(|_| WorkError::Cancelled)?;
                }
                Decision::Queued => {
                    return rx.await.map_err(|_| WorkError::Cancelled)?;
                }
                Decision::WaitForSpace(space_rx) => {
                    // space may be taken by another submitter first: retry
                    space_rx.await.map_err(|_| WorkError::Cancelled)?;
                }
            }
        }
    }

    fn push_pending(
        next_id: &AtomicU64,
        state: &mut QueueState<R>,
        priority: i64,
        job: Job<R>,
        tx: oneshot::Sender<WorkResult<R>>,
    ) {
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        state.seq += 1;
        let seq = state.seq;
        state.pending.push_back(QueuedTask {
            id,
            effective_priority: priority,
            seq,
            last_boost: Instant::now(),
            job,
            tx,
        });
    }

    fn spawn_starvation_scan(inner: Weak<QueueInner<R>>, cfg: StarvationConfig) -> JoinHandle<()> {
        let period = (cfg.grace / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                let boosted = {
                    let mut state = inner.state.lock();
                    let now = Instant::now();
                    let mut boosted = Vec::new();
                    for task in state.pending.iter_mut() {
                        if now.duration_since(task.last_boost) >= cfg.grace {
                            task.effective_priority += cfg.boost;
                            task.last_boost = now;
                            boosted.push((task.id, task.effective_priority));
                        }
                    }
                    boosted
                };
                if let Some(cb) = &cfg.on_starvation_boost {
                    for (id, priority) in &boosted {
                        debug!(id, priority, "starvation boost applied");
                        cb(*id, *priority);
                    }
                }
            }
        })
    }
}

impl<R> WorkQueue<R> {
    /// Current occupancy
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            queue_length: state.pending.len(),
            active_count: state.active,
        }
    }

    /// Pending tasks not yet dispatched
    pub fn queue_length(&self) -> usize {
        self.stats().queue_length
    }

    /// Tasks currently running
    pub fn active_count(&self) -> usize {
        self.stats().active_count
    }

    /// Wait until no task is pending or running
    pub async fn join(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let state = self.inner.state.lock();
                if state.pending.is_empty() && state.active == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Reject new work and fail all pending tasks with a cancellation
    pub fn shutdown(&self) {
        if let Some(handle) = self.scan.lock().take() {
            handle.abort();
        }
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        for task in state.pending.drain(..) {
            let _ = task.tx.send(Err(WorkError::Cancelled));
        }
        state.space_waiters.clear();
    }
}

impl<R> Drop for WorkQueue<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<R> QueueInner<R>
where
    R: Send + 'static,
{
    /// Dispatch pending tasks to free workers
    fn pump(this: &Arc<Self>, state: &mut QueueState<R>) {
        while state.active < this.config.concurrency {
            let Some(task) = Self::pick_next(state, this.config.mode) else {
                break;
            };
            state.active += 1;
            // space freed in the pending queue
            if let Some(space_tx) = state.space_waiters.pop() {
                let _ = space_tx.send(());
            }
            Self::spawn_worker(this, task.job, task.tx);
        }
    }

    fn spawn_worker(this: &Arc<Self>, job: Job<R>, tx: oneshot::Sender<WorkResult<R>>) {
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            let result = job().await;
            let _ = tx.send(result);
            let mut state = inner.state.lock();
            state.active -= 1;
            Self::pump(&inner, &mut state);
            if state.pending.is_empty() && state.active == 0 {
                inner.idle.notify_waiters();
            }
        });
    }

    fn pick_next(state: &mut QueueState<R>, mode: QueueMode) -> Option<QueuedTask<R>> {
        match mode {
            QueueMode::Fifo => state.pending.pop_front(),
            QueueMode::Lifo => state.pending.pop_back(),
            QueueMode::Priority => {
                let idx = state
                    .pending
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| {
                        a.effective_priority
                            .cmp(&b.effective_priority)
                            .then(b.seq.cmp(&a.seq))
                    })
                    .map(|(i, _)| i)?;
                state.pending.remove(idx)
            }
        }
    }

    /// Fail and remove the lowest-priority pending task (newest among ties)
    fn evict_lowest(state: &mut QueueState<R>) {
        let idx = state
            .pending
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.effective_priority
                    .cmp(&b.effective_priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i);
        if let Some(idx) = idx {
            if let Some(evicted) = state.pending.remove(idx) {
                debug!(id = evicted.id, "evicted pending task for a newer one");
                let _ = evicted
                    .tx
                    .send(Err(WorkError::Dropped("evicted for higher-priority task")));
            }
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Route invocations through a shared worker pool
    pub fn queued(self, queue: Arc<WorkQueue<R>>) -> Work<Args, R> {
        self.queued_priority(queue, 0)
    }

    /// Route invocations through a shared worker pool at a fixed priority
    pub fn queued_priority(self, queue: Arc<WorkQueue<R>>, priority: i64) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let queue = Arc::clone(&queue);
            Box::pin(async move {
                queue
                    .enqueue_priority(priority, move || inner(args))
                    .await
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{advance, sleep};

    #[tokio::test]
    async fn test_zero_concurrency_is_config_error() {
        assert!(matches!(
            WorkQueue::<u32>::new(WorkQueueConfig::new(0)).unwrap_err(),
            WorkError::Config(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_never_exceeds_concurrency() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new(2)).unwrap());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let queue = queue.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
            sleep(Duration::from_millis(1)).await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        queue.join().await;
        assert_eq!(queue.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_dispatch_order() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new(1)).unwrap());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        order.lock().push(i);
                        sleep(Duration::from_millis(5)).await;
                        Ok(i)
                    })
                    .await
            }));
            sleep(Duration::from_millis(1)).await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_dispatch_prefers_high() {
        let queue = Arc::new(
            WorkQueue::new(WorkQueueConfig {
                mode: QueueMode::Priority,
                ..WorkQueueConfig::new(1)
            })
            .unwrap(),
        );
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (label, priority) in [("first", 0), ("low", 1), ("high", 9), ("mid", 5)] {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue_priority(priority, move || async move {
                        order.lock().push(label);
                        sleep(Duration::from_millis(5)).await;
                        Ok(())
                    })
                    .await
            }));
            sleep(Duration::from_millis(1)).await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        // "first" starts immediately; the rest dispatch by priority
        assert_eq!(*order.lock(), vec!["first", "high", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_queue_error_policy() {
        let queue = Arc::new(
            WorkQueue::new(WorkQueueConfig {
                max_queue_size: Some(1),
                ..WorkQueueConfig::new(1)
            })
            .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..2 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(|| async {
                        sleep(Duration::from_millis(20)).await;
                        Ok(())
                    })
                    .await
            }));
            sleep(Duration::from_millis(1)).await;
        }

        let err = queue.enqueue(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, WorkError::QueueFull(_)));
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_lowest_priority_policy() {
        let queue = Arc::new(
            WorkQueue::new(WorkQueueConfig {
                mode: QueueMode::Priority,
                max_queue_size: Some(1),
                full_policy: QueueFullPolicy::DropLowestPriority,
                ..WorkQueueConfig::new(1)
            })
            .unwrap(),
        );

        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(|| async {
                        sleep(Duration::from_millis(50)).await;
                        Ok("blocker")
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(1)).await;

        let low = {
            let queue = queue.clone();
            tokio::spawn(
                async move { queue.enqueue_priority(1, || async { Ok("low") }).await },
            )
        };
        sleep(Duration::from_millis(1)).await;

        let high = {
            let queue = queue.clone();
            tokio::spawn(
                async move { queue.enqueue_priority(9, || async { Ok("high") }).await },
            )
        };
        sleep(Duration::from_millis(1)).await;

        assert!(matches!(
            low.await.unwrap().unwrap_err(),
            WorkError::Dropped(_)
        ));
        assert_eq!(high.await.unwrap().unwrap(), "high");
        assert_eq!(blocker.await.unwrap().unwrap(), "blocker");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_space_policy_suspends_submitter() {
        let queue = Arc::new(
            WorkQueue::new(WorkQueueConfig {
                max_queue_size: Some(1),
                full_policy: QueueFullPolicy::WaitForSpace,
                ..WorkQueueConfig::new(1)
            })
            .unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..3u32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(move || async move {
                        sleep(Duration::from_millis(10)).await;
                        Ok(i)
                    })
                    .await
            }));
            sleep(Duration::from_millis(1)).await;
        }
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.unwrap().unwrap(), i as u32);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_starvation_boost_promotes_old_item() {
        let boosts = Arc::new(AtomicUsize::new(0));
        let b = boosts.clone();
        let queue = Arc::new(
            WorkQueue::new(WorkQueueConfig {
                mode: QueueMode::Priority,
                starvation: Some(StarvationConfig {
                    grace: Duration::from_millis(50),
                    boost: 10,
                    on_starvation_boost: Some(Arc::new(move |_, _| {
                        b.fetch_add(1, Ordering::SeqCst);
                    })),
                }),
                ..WorkQueueConfig::new(1)
            })
            .unwrap(),
        );
        let order = Arc::new(Mutex::new(Vec::new()));

        // keep the single worker busy long enough for a boost cycle
        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(|| async {
                        sleep(Duration::from_millis(120)).await;
                        Ok(())
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(1)).await;

        let starved = {
            let queue = queue.clone();
            let order = order.clone();
            tokio::spawn(async move {
                queue
                    .enqueue_priority(1, move || async move {
                        order.lock().push("starved");
                        Ok(())
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(80)).await;

        // by now the starved item has been boosted past priority 5
        let newcomer = {
            let queue = queue.clone();
            let order = order.clone();
            tokio::spawn(async move {
                queue
                    .enqueue_priority(5, move || async move {
                        order.lock().push("newcomer");
                        Ok(())
                    })
                    .await
            })
        };

        blocker.await.unwrap().unwrap();
        starved.await.unwrap().unwrap();
        newcomer.await.unwrap().unwrap();
        assert!(boosts.load(Ordering::SeqCst) >= 1);
        assert_eq!(order.lock().first(), Some(&"starved"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_pending_tasks() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new(1)).unwrap());
        let running = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(|| async {
                        sleep(Duration::from_millis(50)).await;
                        Ok(())
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(1)).await;

        let pending = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(|| async { Ok(()) }).await })
        };
        sleep(Duration::from_millis(1)).await;

        queue.shutdown();
        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            WorkError::Cancelled
        ));
        assert!(matches!(
            queue.enqueue(|| async { Ok(()) }).await.unwrap_err(),
            WorkError::InvalidState(_)
        ));
        // the running task still completes
        running.await.unwrap().unwrap();
        advance(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn test_stats_snapshot_serializes() {
        let queue = WorkQueue::<u32>::new(WorkQueueConfig::new(2)).unwrap();
        let json = serde_json::to_string(&queue.stats()).unwrap();
        assert!(json.contains("queue_length"));
        assert!(json.contains("active_count"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_queued_integration() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new(2)).unwrap());
        let work = Work::from_fn1(|n: u32| async move { Ok(n * 2) }).queued(queue);
        assert_eq!(work.call(21).await.unwrap(), 42);
    }
}
