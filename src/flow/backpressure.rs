//! Backpressure scheduling
//!
//! Bounds concurrent invocations and reshapes the overflow per strategy:
//! drop it, drop the oldest buffered call, buffer it, admit it with a
//! sampling probability, or queue it for strict draining. Completion of any
//! active call drains the buffer back up to the concurrency bound.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Overflow handling once `max_concurrent` is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureStrategy {
    /// Fail the new call immediately
    Drop,
    /// Evict the oldest buffered call to make room for the new one
    DropOldest,
    /// Buffer up to `buffer_size`, then fail with buffer-full
    #[default]
    Buffer,
    /// Admit to the buffer with probability `sample_rate`
    Sample,
    /// Buffer and drain strictly as capacity frees
    Throttle,
    /// Fail immediately; an explicit, stricter `Drop`
    Error,
}

type OverflowCallback = Arc<dyn Fn() + Send + Sync>;

/// Scheduler parameters
#[derive(Clone)]
pub struct BackpressureConfig {
    /// Concurrent executions allowed
    pub max_concurrent: usize,
    /// Buffered calls allowed
    pub buffer_size: usize,
    /// Admission probability for the sampling strategy, in `[0, 1]`
    pub sample_rate: f64,
    /// Overflow handling
    pub strategy: BackpressureStrategy,
    /// Invoked when a call is shed at the concurrency bound
    pub on_overflow: Option<OverflowCallback>,
    /// Invoked when the buffer rejects a call
    pub on_buffer_full: Option<OverflowCallback>,
}

impl BackpressureConfig {
    /// Buffering scheduler with the given concurrency bound
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            buffer_size: 64,
            sample_rate: 1.0,
            strategy: BackpressureStrategy::Buffer,
            on_overflow: None,
            on_buffer_full: None,
        }
    }

    /// Select the overflow strategy
    pub fn with_strategy(mut self, strategy: BackpressureStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Bound the buffer
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the sampling admission probability
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    fn validate(&self) -> WorkResult<()> {
        if self.max_concurrent == 0 {
            return Err(WorkError::Config(
                "backpressure max_concurrent must be > 0".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(WorkError::Config(
                "backpressure buffer_size must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(WorkError::Config(
                "backpressure sample_rate must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

type Job<R> = Box<dyn FnOnce() -> BoxFuture<'static, WorkResult<R>> + Send>;

struct Buffered<R> {
    job: Job<R>,
    tx: oneshot::Sender<WorkResult<R>>,
}

struct SchedulerState<R> {
    active: usize,
    buffer: VecDeque<Buffered<R>>,
}

struct SchedulerInner<R> {
    config: BackpressureConfig,
    state: Mutex<SchedulerState<R>>,
}

/// Shared backpressure scheduler
pub struct BackpressureScheduler<R> {
    inner: Arc<SchedulerInner<R>>,
}

impl<R> Clone for BackpressureScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> BackpressureScheduler<R>
where
    R: Send + 'static,
{
    /// Create an idle scheduler
    pub fn new(config: BackpressureConfig) -> WorkResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                state: Mutex::new(SchedulerState {
                    active: 0,
                    buffer: VecDeque::new(),
                }),
            }),
        })
    }

    /// Executions currently running
    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Calls currently buffered
    pub fn buffered(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Whether the concurrency bound is saturated
    pub fn is_under_pressure(&self) -> bool {
        let state = self.inner.state.lock();
        state.active >= self.inner.config.max_concurrent
    }

    /// Schedule one invocation
    pub async fn submit<F>(&self, job: F) -> WorkResult<R>
    where
        F: FnOnce() -> BoxFuture<'static, WorkResult<R>> + Send + 'static,
    {
        let job: Job<R> = Box::new(job);
        enum Plan<R> {
            RunNow(Job<R>),
            Await(oneshot::Receiver<WorkResult<R>>),
            Reject(WorkError),
        }

        let mut shed = false;
        let mut rejected_by_buffer = false;
        let plan = {
            let mut state = self.inner.state.lock();
            let config = &self.inner.config;
            if state.active < config.max_concurrent {
                state.active += 1;
                Plan::RunNow(job)
            } else {
                match config.strategy {
                    BackpressureStrategy::Drop => {
                        shed = true;
                        Plan::Reject(WorkError::Dropped("shed at concurrency bound"))
                    }
                    BackpressureStrategy::Error => {
                        shed = true;
                        Plan::Reject(WorkError::Dropped("rejected at concurrency bound"))
                    }
                    BackpressureStrategy::Sample => {
                        if fastrand::f64() >= config.sample_rate {
                            shed = true;
                            Plan::Reject(WorkError::Dropped("sampled out"))
                        } else if state.buffer.len() < config.buffer_size {
                            Plan::Await(Self::buffer_job(&mut state, job))
                        } else {
                            rejected_by_buffer = true;
                            Plan::Reject(WorkError::BufferFull)
                        }
                    }
                    BackpressureStrategy::Buffer | BackpressureStrategy::Throttle => {
                        if state.buffer.len() < config.buffer_size {
                            Plan::Await(Self::buffer_job(&mut state, job))
                        } else {
                            rejected_by_buffer = true;
                            Plan::Reject(WorkError::BufferFull)
                        }
                    }
                    BackpressureStrategy::DropOldest => {
                        if state.buffer.len() >= config.buffer_size {
                            if let Some(oldest) = state.buffer.pop_front() {
                                debug!("evicting oldest buffered call");
                                shed = true;
                                let _ = oldest
                                    .tx
                                    .send(Err(WorkError::Dropped("dropped as oldest")));
                            }
                        }
                        Plan::Await(Self::buffer_job(&mut state, job))
                    }
                }
            }
        };
        if shed {
            self.overflow();
        }
        if rejected_by_buffer {
            self.buffer_full();
        }

        match plan {
            Plan::Reject(err) => {
                trace!(error = %err, "backpressure rejection");
                Err(err)
            }
            Plan::Await(rx) => rx.await.map_err(|_| WorkError::Cancelled)?,
            Plan::RunNow(job) => {
                let result = job().await;
                self.finish();
                result
            }
        }
    }

    fn buffer_job(
        state: &mut SchedulerState<R>,
        job: Job<R>,
    ) -> oneshot::Receiver<WorkResult<R>> {
        let (tx, rx) = oneshot::channel();
        state.buffer.push_back(Buffered { job, tx });
        rx
    }

    /// One active slot freed: drain the buffer
    fn finish(&self) {
        let mut state = self.inner.state.lock();
        state.active -= 1;
        Self::drain(&self.inner, &mut state);
    }

    fn drain(inner: &Arc<SchedulerInner<R>>, state: &mut SchedulerState<R>) {
        while state.active < inner.config.max_concurrent {
            let Some(item) = state.buffer.pop_front() else {
                break;
            };
            state.active += 1;
            let scheduler = Self {
                inner: Arc::clone(inner),
            };
            tokio::spawn(async move {
                let result = (item.job)().await;
                let _ = item.tx.send(result);
                scheduler.finish();
            });
        }
    }

    fn overflow(&self) {
        if let Some(cb) = &self.inner.config.on_overflow {
            cb();
        }
    }

    fn buffer_full(&self) {
        if let Some(cb) = &self.inner.config.on_buffer_full {
            cb();
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Schedule invocations under a dedicated backpressure scheduler
    pub fn backpressure(self, config: BackpressureConfig) -> Work<Args, R> {
        match BackpressureScheduler::new(config) {
            Ok(scheduler) => self.backpressure_shared(scheduler),
            Err(err) => Work::config_error(err),
        }
    }

    /// Schedule invocations under a shared backpressure scheduler
    pub fn backpressure_shared(self, scheduler: BackpressureScheduler<R>) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let scheduler = scheduler.clone();
            Box::pin(async move { scheduler.submit(move || inner(args)).await })
        })
    }
}
