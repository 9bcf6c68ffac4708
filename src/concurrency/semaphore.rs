//! Counting semaphore with configurable wakeup order
//!
//! Initialised with a number of permits. Acquire decrements, possibly
//! waiting; release grants the permit to the next waiter chosen per the
//! queue mode (FIFO, LIFO, or priority). New waiters can be notified of
//! their 1-based queue position via `on_waiting`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::concurrency::queue::QueueMode;
use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Semaphore construction parameters
#[derive(Clone)]
pub struct SemaphoreConfig {
    /// Number of permits
    pub max_concurrent: usize,
    /// Wakeup order for queued waiters
    pub mode: QueueMode,
    /// Notified with the 1-based position of each newly queued waiter
    pub on_waiting: Option<Arc<dyn Fn(usize) + Send + Sync>>,
}

impl SemaphoreConfig {
    /// FIFO semaphore with the given permit count
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            mode: QueueMode::Fifo,
            on_waiting: None,
        }
    }
}

struct SemWaiter {
    id: u64,
    priority: i64,
    seq: u64,
    tx: oneshot::Sender<()>,
}

struct SemState {
    permits: usize,
    waiters: VecDeque<SemWaiter>,
    seq: u64,
}

/// Asynchronous counting semaphore
pub struct Semaphore {
    state: Mutex<SemState>,
    next_id: AtomicU64,
    config: SemaphoreConfig,
}

impl Semaphore {
    /// Create a FIFO semaphore with `max_concurrent` permits
    pub fn new(max_concurrent: usize) -> WorkResult<Self> {
        Self::with_config(SemaphoreConfig::new(max_concurrent))
    }

    /// Create a semaphore from full configuration
    pub fn with_config(config: SemaphoreConfig) -> WorkResult<Self> {
        if config.max_concurrent == 0 {
            return Err(WorkError::Config(
                "semaphore max_concurrent must be > 0".into(),
            ));
        }
        Ok(Self {
            state: Mutex::new(SemState {
                permits: config.max_concurrent,
                waiters: VecDeque::new(),
                seq: 0,
            }),
            next_id: AtomicU64::new(0),
            config,
        })
    }

    /// Permits currently available
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Number of queued waiters
    pub fn queue_length(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquire one permit, waiting if none are available
    pub async fn acquire(&self) -> WorkResult<()> {
        self.acquire_inner(0, None).await
    }

    /// Acquire one permit with a deadline
    pub async fn acquire_timeout(&self, timeout: Duration) -> WorkResult<()> {
        self.acquire_inner(0, Some(timeout)).await
    }

    /// Acquire with an explicit priority (used in priority mode)
    pub async fn acquire_priority(&self, priority: i64) -> WorkResult<()> {
        self.acquire_inner(priority, None).await
    }

    async fn acquire_inner(&self, priority: i64, timeout: Option<Duration>) -> WorkResult<()> {
        let (id, mut rx) = {
            let mut state = self.state.lock();
            if state.permits > 0 && state.waiters.is_empty() {
                state.permits -= 1;
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.seq += 1;
            let seq = state.seq;
            state.waiters.push_back(SemWaiter {
                id,
                priority,
                seq,
                tx,
            });
            let position = state.waiters.len();
            drop(state);
            if let Some(cb) = &self.config.on_waiting {
                cb(position);
            }
            (id, rx)
        };

        let Some(deadline) = timeout else {
            return rx.await.map_err(|_| WorkError::Cancelled);
        };
        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(granted) => granted.map_err(|_| WorkError::Cancelled),
            Err(_) => {
                self.abandon(id);
                Err(WorkError::Timeout)
            }
        }
    }

    /// Return one permit, waking the next waiter per queue mode
    pub fn release(&self) {
        let mut state = self.state.lock();
        loop {
            let Some(waiter) = Self::pick_next(&mut state, self.config.mode) else {
                state.permits += 1;
                return;
            };
            if waiter.tx.send(()).is_ok() {
                // permit transferred directly to the waiter
                return;
            }
        }
    }

    fn pick_next(state: &mut SemState, mode: QueueMode) -> Option<SemWaiter> {
        match mode {
            QueueMode::Fifo => state.waiters.pop_front(),
            QueueMode::Lifo => state.waiters.pop_back(),
            QueueMode::Priority => {
                let idx = state
                    .waiters
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| {
                        a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq))
                    })
                    .map(|(i, _)| i)?;
                state.waiters.remove(idx)
            }
        }
    }

    fn abandon(&self, id: u64) {
        let still_queued = {
            let mut state = self.state.lock();
            let before = state.waiters.len();
            state.waiters.retain(|w| w.id != id);
            state.waiters.len() != before
        };
        if !still_queued {
            // permit was granted concurrently with the timeout; hand it back
            self.release();
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Bound concurrent invocations by a shared semaphore
    pub fn with_semaphore(self, semaphore: Arc<Semaphore>) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let semaphore = Arc::clone(&semaphore);
            Box::pin(async move {
                semaphore.acquire().await?;
                let result = inner(args).await;
                semaphore.release();
                result
            })
        })
    }
}
