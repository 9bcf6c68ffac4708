//! Fair asynchronous mutual exclusion
//!
//! Waiters are granted the lock in strict arrival order. Release hands the
//! lock directly to the next live waiter, so the lock is never observably
//! free while a waiter is queued. Re-entry is not supported: a holder that
//! re-acquires its own lock deadlocks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Configuration for lock acquisition
#[derive(Clone)]
pub struct LockConfig {
    /// Default deadline applied by [`Lock::acquire`]; `None` waits forever
    pub timeout: Option<Duration>,
    /// When false, a waiter that reaches its deadline fires `on_timeout`
    /// and keeps waiting instead of failing
    pub fail_on_timeout: bool,
    /// Invoked when a waiter reaches its deadline
    pub on_timeout: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl LockConfig {
    /// Default configuration: no deadline, fail on timeout
    pub fn new() -> Self {
        Self {
            timeout: None,
            fail_on_timeout: true,
            on_timeout: None,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct LockState {
    locked: bool,
    waiters: VecDeque<Waiter>,
}

/// Fair asynchronous mutex
pub struct Lock {
    state: Mutex<LockState>,
    next_id: AtomicU64,
    config: LockConfig,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self::with_config(LockConfig::new())
    }

    /// Create an unlocked lock with acquisition defaults
    pub fn with_config(config: LockConfig) -> Self {
        Self {
            state: Mutex::new(LockState {
                locked: false,
                waiters: VecDeque::new(),
            }),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    /// Whether the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Number of queued waiters
    pub fn queue_length(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquire the lock, waiting per the configured defaults
    pub async fn acquire(&self) -> WorkResult<()> {
        self.acquire_inner(self.config.timeout).await
    }

    /// Acquire the lock with an explicit deadline
    pub async fn acquire_timeout(&self, timeout: Duration) -> WorkResult<()> {
        self.acquire_inner(Some(timeout)).await
    }

    async fn acquire_inner(&self, timeout: Option<Duration>) -> WorkResult<()> {
        let (id, mut rx) = {
            let mut state = self.state.lock();
            if !state.locked && state.waiters.is_empty() {
                state.locked = true;
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        let Some(deadline) = timeout else {
            return rx.await.map_err(|_| WorkError::Cancelled);
        };

        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(granted) => granted.map_err(|_| WorkError::Cancelled),
            Err(_) => {
                if let Some(cb) = &self.config.on_timeout {
                    cb();
                }
                if self.config.fail_on_timeout {
                    self.abandon(id, rx);
                    Err(WorkError::Timeout)
                } else {
                    rx.await.map_err(|_| WorkError::Cancelled)
                }
            }
        }
    }

    /// Release the lock, granting it to the next live waiter
    pub fn release(&self) {
        let mut state = self.state.lock();
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => {
                    if waiter.tx.send(()).is_ok() {
                        // hand-off: locked stays true for the new holder
                        return;
                    }
                    // waiter cancelled between queueing and grant; skip it
                }
                None => {
                    state.locked = false;
                    return;
                }
            }
        }
    }

    /// Run `body` under the lock, releasing on every exit path
    pub async fn synchronized<F, Fut, T>(&self, body: F) -> WorkResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkResult<T>>,
    {
        self.acquire().await?;
        let result = body().await;
        self.release();
        result
    }

    /// Remove a timed-out waiter; if it won the lock in the meantime the
    /// grant is passed on to the next waiter
    fn abandon(&self, id: u64, rx: oneshot::Receiver<()>) {
        let still_queued = {
            let mut state = self.state.lock();
            let before = state.waiters.len();
            state.waiters.retain(|w| w.id != id);
            state.waiters.len() != before
        };
        if !still_queued {
            // grant already sent: this waiter owns the lock, pass it on
            drop(rx);
            self.release();
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Serialise all invocations through a shared lock
    pub fn with_lock(self, lock: Arc<Lock>) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let lock = Arc::clone(&lock);
            Box::pin(async move { lock.synchronized(|| inner(args)).await })
        })
    }
}
