//! Monitor: mutual exclusion plus condition waiting
//!
//! Combines a fair lock with condition-variable semantics. Predicates are
//! evaluated under the lock; a woken waiter re-checks its predicate before
//! returning, so spurious wakeups are harmless.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::concurrency::lock::Lock;
use crate::error::{WorkError, WorkResult};

/// Lock with condition waiting
pub struct Monitor {
    lock: Lock,
    cond_waiters: Mutex<Vec<oneshot::Sender<()>>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Create an idle monitor
    pub fn new() -> Self {
        Self {
            lock: Lock::new(),
            cond_waiters: Mutex::new(Vec::new()),
        }
    }

    /// Whether the monitor lock is currently held
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Run `body` under the monitor lock
    pub async fn synchronized<F, Fut, T>(&self, body: F) -> WorkResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkResult<T>>,
    {
        self.lock.synchronized(body).await
    }

    /// Wait until `predicate` stops holding
    ///
    /// The predicate is evaluated under the monitor lock. The lock is not
    /// held while suspended waiting for a notification.
    pub async fn wait_while<P>(&self, predicate: P, timeout: Option<Duration>) -> WorkResult<()>
    where
        P: Fn() -> bool,
    {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            self.lock.acquire().await?;
            let blocked = predicate();
            if !blocked {
                self.lock.release();
                return Ok(());
            }
            // register before releasing the lock so a notify between release
            // and suspension is not lost
            let (tx, rx) = oneshot::channel();
            self.cond_waiters.lock().push(tx);
            self.lock.release();

            match deadline {
                None => {
                    // a dropped sender also wakes us; the predicate re-check
                    // below decides what it means
                    let _ = rx.await;
                }
                Some(at) => {
                    if tokio::time::timeout_at(at, rx).await.is_err() {
                        self.lock.acquire().await?;
                        let cleared = !predicate();
                        self.lock.release();
                        return if cleared { Ok(()) } else { Err(WorkError::Timeout) };
                    }
                }
            }
        }
    }

    /// Wait until `predicate` holds
    pub async fn wait_until<P>(&self, predicate: P, timeout: Option<Duration>) -> WorkResult<()>
    where
        P: Fn() -> bool,
    {
        self.wait_while(|| !predicate(), timeout).await
    }

    /// Wake one condition waiter
    pub fn notify_one(&self) {
        let mut waiters = self.cond_waiters.lock();
        while let Some(tx) = waiters.pop() {
            if tx.send(()).is_ok() {
                return;
            }
        }
    }

    /// Wake all condition waiters
    pub fn notify_all(&self) {
        for tx in self.cond_waiters.lock().drain(..) {
            let _ = tx.send(());
        }
    }
}
