//! Call batching
//!
//! Buffers arguments from many calls and hands them to a batch executor as
//! one vector, either when the buffer reaches `max_size` or `max_wait`
//! after the first buffered item. Each caller's future resolves from its
//! item's own outcome: one item failing does not fail the batch.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Batching parameters
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Buffer size that triggers immediate execution
    pub max_size: usize,
    /// Longest a buffered item waits before the batch fires
    pub max_wait: Duration,
}

impl BatchConfig {
    /// Fire at `max_size` items or after `max_wait`, whichever first
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        Self { max_size, max_wait }
    }

    fn validate(&self) -> WorkResult<()> {
        if self.max_size == 0 {
            return Err(WorkError::Config("batch max_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Executes an accumulated batch, reporting per-item outcomes
///
/// The returned vector must have one entry per input item, in order. A
/// top-level error fails every caller in the batch.
#[async_trait]
pub trait BatchExecutor<Args, R>: Send + Sync {
    /// Run the batch
    async fn execute(&self, items: Vec<Args>) -> WorkResult<Vec<WorkResult<R>>>;
}

type ExecutorFn<Args, R> =
    Arc<dyn Fn(Vec<Args>) -> BoxFuture<'static, WorkResult<Vec<WorkResult<R>>>> + Send + Sync>;

struct BatchState<Args, R> {
    buffer: Vec<(Args, oneshot::Sender<WorkResult<R>>)>,
    timer: Option<JoinHandle<()>>,
}

struct BatcherInner<Args, R> {
    config: BatchConfig,
    executor: ExecutorFn<Args, R>,
    state: Mutex<BatchState<Args, R>>,
}

/// Shared batching engine
pub struct Batcher<Args, R> {
    inner: Arc<BatcherInner<Args, R>>,
}

impl<Args, R> Clone for Batcher<Args, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Args, R> Batcher<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Create a batcher from a closure executor
    pub fn new<F>(config: BatchConfig, executor: F) -> WorkResult<Self>
    where
        F: Fn(Vec<Args>) -> BoxFuture<'static, WorkResult<Vec<WorkResult<R>>>>
            + Send
            + Sync
            + 'static,
    {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BatcherInner {
                config,
                executor: Arc::new(executor),
                state: Mutex::new(BatchState {
                    buffer: Vec::new(),
                    timer: None,
                }),
            }),
        })
    }

    /// Create a batcher from a [`BatchExecutor`] implementation
    pub fn with_executor<E>(config: BatchConfig, executor: Arc<E>) -> WorkResult<Self>
    where
        E: BatchExecutor<Args, R> + 'static,
    {
        Self::new(config, move |items| {
            let executor = Arc::clone(&executor);
            async move { executor.execute(items).await }.boxed()
        })
    }

    /// Items currently buffered
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Buffer one item and await its outcome
    pub async fn submit(&self, args: Args) -> WorkResult<R> {
        let rx = {
            let mut state = self.inner.state.lock();
            let (tx, rx) = oneshot::channel();
            state.buffer.push((args, tx));
            if state.buffer.len() >= self.inner.config.max_size {
                let batch = std::mem::take(&mut state.buffer);
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                let inner = Arc::clone(&self.inner);
                trace!(size = batch.len(), "batch full, executing");
                tokio::spawn(async move { BatcherInner::run_batch(&inner, batch).await });
            } else if state.buffer.len() == 1 {
                state.timer = Some(Self::spawn_timer(Arc::downgrade(&self.inner)));
            }
            rx
        };
        rx.await.map_err(|_| WorkError::Cancelled)?
    }

    /// Execute whatever is buffered right now
    pub async fn flush(&self) {
        let batch = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.buffer)
        };
        if !batch.is_empty() {
            BatcherInner::run_batch(&self.inner, batch).await;
        }
    }

    /// Drop the buffer, failing every pending caller with a state error
    pub fn cancel(&self) {
        let batch = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.buffer)
        };
        debug!(dropped = batch.len(), "batch cancelled");
        for (_, tx) in batch {
            let _ = tx.send(Err(WorkError::InvalidState("batch cancelled".into())));
        }
    }

    fn spawn_timer(weak: Weak<BatcherInner<Args, R>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let wait = match weak.upgrade() {
                Some(inner) => inner.config.max_wait,
                None => return,
            };
            tokio::time::sleep(wait).await;
            let Some(inner) = weak.upgrade() else { return };
            let batch = {
                let mut state = inner.state.lock();
                state.timer = None;
                std::mem::take(&mut state.buffer)
            };
            if !batch.is_empty() {
                trace!(size = batch.len(), "batch wait elapsed, executing");
                BatcherInner::run_batch(&inner, batch).await;
            }
        })
    }
}

impl<Args, R> BatcherInner<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    async fn run_batch(
        this: &Arc<Self>,
        batch: Vec<(Args, oneshot::Sender<WorkResult<R>>)>,
    ) {
        let (items, senders): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
        let count = senders.len();
        match (this.executor)(items).await {
            Ok(results) if results.len() == count => {
                for (tx, result) in senders.into_iter().zip(results) {
                    let _ = tx.send(result);
                }
            }
            Ok(results) => {
                let err = WorkError::InvalidState(format!(
                    "batch executor returned {} results for {count} items",
                    results.len()
                ));
                for tx in senders {
                    let _ = tx.send(Err(err.clone()));
                }
            }
            Err(err) => {
                for tx in senders {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Batch calls, running the inner once per item when the batch fires
    pub fn batch(self, config: BatchConfig) -> Work<Args, R> {
        let run = self.runner();
        let executor = move |items: Vec<Args>| {
            let run = Arc::clone(&run);
            async move {
                let results =
                    futures::future::join_all(items.into_iter().map(|args| run(args))).await;
                Ok(results)
            }
            .boxed()
        };
        match Batcher::new(config, executor) {
            Ok(batcher) => Work::wrap(move |args| {
                let batcher = batcher.clone();
                Box::pin(async move { batcher.submit(args).await })
            }),
            Err(err) => Work::config_error(err),
        }
    }

    /// Batch calls through a shared engine
    ///
    /// The engine's executor replaces the inner callable entirely.
    pub fn batch_shared(self, batcher: Batcher<Args, R>) -> Work<Args, R> {
        Work::wrap(move |args| {
            let batcher = batcher.clone();
            Box::pin(async move { batcher.submit(args).await })
        })
    }
}
