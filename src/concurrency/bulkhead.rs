//! Bulkhead isolation pools
//!
//! Partitions work across a fixed number of slots chosen round-robin. Each
//! slot admits one execution at a time and keeps a bounded waiting queue,
//! so total in-flight work is bounded by `pool_size` and total backlog by
//! `pool_size * queue_size`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Bulkhead construction parameters
#[derive(Clone)]
pub struct BulkheadConfig {
    /// Number of isolation slots
    pub pool_size: usize,
    /// Waiting queue capacity per slot
    pub queue_size: usize,
    /// Default deadline for waiting on a slot
    pub timeout: Option<Duration>,
    /// Invoked when a submission is rejected or times out waiting
    pub on_isolation_failure: Option<Arc<dyn Fn(&WorkError) + Send + Sync>>,
}

impl BulkheadConfig {
    /// Pool of `pool_size` slots with per-slot queues of `queue_size`
    pub fn new(pool_size: usize, queue_size: usize) -> Self {
        Self {
            pool_size,
            queue_size,
            timeout: None,
            on_isolation_failure: None,
        }
    }
}

/// Point-in-time bulkhead occupancy
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadStats {
    /// Executions currently running
    pub active_count: usize,
    /// Submissions waiting for a slot
    pub queued_count: usize,
}

struct SlotWaiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct SlotState {
    busy: bool,
    queue: VecDeque<SlotWaiter>,
}

/// Round-robin isolation pool
pub struct Bulkhead {
    slots: Mutex<Vec<SlotState>>,
    cursor: AtomicUsize,
    next_id: AtomicU64,
    config: BulkheadConfig,
}

impl Bulkhead {
    /// Create a bulkhead from configuration
    pub fn new(config: BulkheadConfig) -> WorkResult<Self> {
        if config.pool_size == 0 {
            return Err(WorkError::Config("bulkhead pool_size must be > 0".into()));
        }
        let slots = (0..config.pool_size)
            .map(|_| SlotState {
                busy: false,
                queue: VecDeque::new(),
            })
            .collect();
        Ok(Self {
            slots: Mutex::new(slots),
            cursor: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            config,
        })
    }

    /// Current occupancy
    pub fn stats(&self) -> BulkheadStats {
        let slots = self.slots.lock();
        BulkheadStats {
            active_count: slots.iter().filter(|s| s.busy).count(),
            queued_count: slots.iter().map(|s| s.queue.len()).sum(),
        }
    }

    /// Executions currently running
    pub fn active_count(&self) -> usize {
        self.stats().active_count
    }

    /// Run `task` on the next slot, using the configured deadline
    pub async fn execute<F, Fut, T>(&self, task: F) -> WorkResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkResult<T>>,
    {
        self.execute_inner(task, self.config.timeout).await
    }

    /// Run `task` on the next slot with an explicit wait deadline
    pub async fn execute_timeout<F, Fut, T>(&self, task: F, timeout: Duration) -> WorkResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkResult<T>>,
    {
        self.execute_inner(task, Some(timeout)).await
    }

    async fn execute_inner<F, Fut, T>(&self, task: F, timeout: Option<Duration>) -> WorkResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkResult<T>>,
    {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.config.pool_size;

        let admitted = {
            let mut slots = self.slots.lock();
            let s = &mut slots[slot];
            if !s.busy && s.queue.is_empty() {
                s.busy = true;
                Ok(None)
            } else if s.queue.len() < self.config.queue_size {
                let (tx, rx) = oneshot::channel();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                s.queue.push_back(SlotWaiter { id, tx });
                Ok(Some((id, rx)))
            } else {
                Err(WorkError::QueueFull(format!(
                    "bulkhead slot {slot} backlog at capacity {}",
                    self.config.queue_size
                )))
            }
        };
        let waiting = match admitted {
            Ok(waiting) => waiting,
            Err(err) => {
                warn!(slot, "bulkhead rejected submission");
                self.isolation_failure(&err);
                return Err(err);
            }
        };

        if let Some((id, mut rx)) = waiting {
            let granted = match timeout {
                None => rx.await.map_err(|_| WorkError::Cancelled),
                Some(deadline) => match tokio::time::timeout(deadline, &mut rx).await {
                    Ok(granted) => granted.map_err(|_| WorkError::Cancelled),
                    Err(_) => {
                        self.abandon(slot, id);
                        Err(WorkError::Timeout)
                    }
                },
            };
            if let Err(err) = granted {
                self.isolation_failure(&err);
                return Err(err);
            }
        }

        let result = task().await;
        self.release_slot(slot);
        result
    }

    fn release_slot(&self, slot: usize) {
        let mut slots = self.slots.lock();
        let s = &mut slots[slot];
        loop {
            match s.queue.pop_front() {
                Some(waiter) => {
                    if waiter.tx.send(()).is_ok() {
                        // slot handed directly to the next waiter
                        return;
                    }
                }
                None => {
                    s.busy = false;
                    return;
                }
            }
        }
    }

    fn abandon(&self, slot: usize, id: u64) {
        let still_queued = {
            let mut slots = self.slots.lock();
            let s = &mut slots[slot];
            let before = s.queue.len();
            s.queue.retain(|w| w.id != id);
            s.queue.len() != before
        };
        if !still_queued {
            // grant raced the deadline; pass the slot on
            self.release_slot(slot);
        }
    }

    fn isolation_failure(&self, err: &WorkError) {
        if let Some(cb) = &self.config.on_isolation_failure {
            cb(err);
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Isolate invocations through a shared bulkhead
    pub fn with_bulkhead(self, bulkhead: Arc<Bulkhead>) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let bulkhead = Arc::clone(&bulkhead);
            Box::pin(async move { bulkhead.execute(|| inner(args)).await })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::time::{advance, sleep};

    fn long_task(
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> impl Future<Output = WorkResult<()>> {
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(50)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_zero_pool_is_config_error() {
        assert!(matches!(
            Bulkhead::new(BulkheadConfig::new(0, 1)).unwrap_err(),
            WorkError::Config(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_bounded_by_pool_size() {
        let bulkhead = Arc::new(Bulkhead::new(BulkheadConfig::new(2, 8)).unwrap());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let bulkhead = bulkhead.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                bulkhead.execute(|| long_task(active, peak)).await
            }));
            sleep(Duration::from_millis(1)).await;
        }
        sleep(Duration::from_millis(1)).await;
        assert_eq!(bulkhead.active_count(), 2);
        assert_eq!(bulkhead.stats().queued_count, 3);

        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(bulkhead.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_slot_queue_rejects() {
        let failures = Arc::new(AtomicUsize::new(0));
        let f = failures.clone();
        let mut config = BulkheadConfig::new(1, 1);
        config.on_isolation_failure = Some(Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let bulkhead = Arc::new(Bulkhead::new(config).unwrap());

        let mut handles = Vec::new();
        for _ in 0..2 {
            let bulkhead = bulkhead.clone();
            handles.push(tokio::spawn(async move {
                bulkhead
                    .execute(|| async {
                        sleep(Duration::from_millis(50)).await;
                        Ok(())
                    })
                    .await
            }));
            sleep(Duration::from_millis(1)).await;
        }

        let err = bulkhead.execute(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, WorkError::QueueFull(_)));
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_fires_isolation_failure() {
        let failures = Arc::new(AtomicUsize::new(0));
        let f = failures.clone();
        let mut config = BulkheadConfig::new(1, 4);
        config.on_isolation_failure = Some(Arc::new(move |err| {
            assert!(matches!(err, WorkError::Timeout));
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let bulkhead = Arc::new(Bulkhead::new(config).unwrap());

        let holder = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| async {
                        sleep(Duration::from_millis(100)).await;
                        Ok(())
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(1)).await;

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute_timeout(|| async { Ok(()) }, Duration::from_millis(20))
                    .await
            })
        };
        advance(Duration::from_millis(30)).await;
        assert!(matches!(
            waiter.await.unwrap().unwrap_err(),
            WorkError::Timeout
        ));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        holder.await.unwrap().unwrap();
    }
}
