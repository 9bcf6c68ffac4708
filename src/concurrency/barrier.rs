//! Rendezvous barrier
//!
//! Created for a fixed number of parties. Each participant waits until the
//! final party arrives, which trips the barrier and releases everyone. A
//! cyclic barrier then starts a new generation; a single-trip barrier enters
//! the broken state and rejects further waits. A wait deadline breaks the
//! barrier for every current waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{WorkError, WorkResult};

/// Barrier construction parameters
#[derive(Clone)]
pub struct BarrierConfig {
    /// Number of parties required to trip the barrier
    pub parties: usize,
    /// Whether the barrier resets for re-use after each trip
    pub cyclic: bool,
    /// Run once by the tripping party, before waiters are woken
    pub barrier_action: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl BarrierConfig {
    /// Cyclic barrier for `parties` participants
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            cyclic: true,
            barrier_action: None,
        }
    }

    /// Make the barrier single-trip
    pub fn single_trip(mut self) -> Self {
        self.cyclic = false;
        self
    }

    /// Attach an action run by the tripping party
    pub fn with_action(mut self, action: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.barrier_action = Some(action);
        self
    }
}

struct BarrierWaiter {
    id: u64,
    tx: oneshot::Sender<WorkResult<()>>,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
    waiters: Vec<BarrierWaiter>,
}

/// Rendezvous point for a fixed number of parties
pub struct Barrier {
    state: Mutex<BarrierState>,
    next_id: AtomicU64,
    config: BarrierConfig,
}

impl Barrier {
    /// Create a cyclic barrier for `parties` participants
    pub fn new(parties: usize) -> WorkResult<Self> {
        Self::with_config(BarrierConfig::new(parties))
    }

    /// Create a barrier from full configuration
    pub fn with_config(config: BarrierConfig) -> WorkResult<Self> {
        if config.parties == 0 {
            return Err(WorkError::Config("barrier parties must be > 0".into()));
        }
        Ok(Self {
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: false,
                waiters: Vec::new(),
            }),
            next_id: AtomicU64::new(0),
            config,
        })
    }

    /// Current generation; incremented on each trip of a cyclic barrier
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Whether the barrier is broken
    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Parties that have arrived in the current generation
    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }

    /// Arrive and wait for the remaining parties
    pub async fn wait(&self) -> WorkResult<()> {
        self.wait_inner(None).await
    }

    /// Arrive and wait with a deadline; expiry breaks the barrier
    pub async fn wait_timeout(&self, timeout: Duration) -> WorkResult<()> {
        self.wait_inner(Some(timeout)).await
    }

    async fn wait_inner(&self, timeout: Option<Duration>) -> WorkResult<()> {
        let (id, rx) = {
            let mut state = self.state.lock();
            if state.broken {
                return Err(WorkError::BrokenBarrier);
            }
            state.arrived += 1;
            if state.arrived == self.config.parties {
                // final party trips the barrier
                if let Some(action) = &self.config.barrier_action {
                    action();
                }
                for waiter in state.waiters.drain(..) {
                    let _ = waiter.tx.send(Ok(()));
                }
                if self.config.cyclic {
                    state.arrived = 0;
                    state.generation += 1;
                } else {
                    state.broken = true;
                }
                debug!(generation = state.generation, "barrier tripped");
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.waiters.push(BarrierWaiter { id, tx });
            (id, rx)
        };

        let Some(deadline) = timeout else {
            return match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(WorkError::Cancelled),
            };
        };
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WorkError::Cancelled),
            Err(_) => {
                self.break_for_timeout(id);
                Err(WorkError::Timeout)
            }
        }
    }

    /// Deadline expiry: break the barrier and fail every current waiter
    fn break_for_timeout(&self, id: u64) {
        let mut state = self.state.lock();
        let was_queued = state.waiters.iter().any(|w| w.id == id);
        if !was_queued {
            // tripped concurrently with the deadline; nothing to break
            return;
        }
        state.broken = true;
        state.arrived = 0;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.tx.send(Err(WorkError::Timeout));
        }
        debug!("barrier broken by wait timeout");
    }

    /// Restore a broken barrier to an empty generation
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.broken = false;
        state.arrived = 0;
        state.generation += 1;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.tx.send(Err(WorkError::BrokenBarrier));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{advance, sleep};

    #[tokio::test(start_paused = true)]
    async fn test_all_parties_released_on_trip() {
        let barrier = Arc::new(Barrier::new(3).unwrap());
        let released = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let barrier = barrier.clone();
            let released = released.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await.unwrap();
                released.fetch_add(1, Ordering::SeqCst);
            }));
        }
        sleep(Duration::from_millis(1)).await;
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(barrier.arrived(), 2);

        barrier.wait().await.unwrap();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cyclic_barrier_starts_new_generation() {
        let barrier = Arc::new(Barrier::new(2).unwrap());
        for expected_gen in 1..=2 {
            let other = {
                let barrier = barrier.clone();
                tokio::spawn(async move { barrier.wait().await })
            };
            sleep(Duration::from_millis(1)).await;
            barrier.wait().await.unwrap();
            other.await.unwrap().unwrap();
            assert_eq!(barrier.generation(), expected_gen);
            assert_eq!(barrier.arrived(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trip_barrier_breaks_after_use() {
        let barrier = Arc::new(Barrier::with_config(BarrierConfig::new(1).single_trip()).unwrap());
        barrier.wait().await.unwrap();
        assert!(barrier.is_broken());
        assert!(matches!(
            barrier.wait().await.unwrap_err(),
            WorkError::BrokenBarrier
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_runs_before_waiters_wake() {
        let action_done = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let a = action_done.clone();
        let barrier = Arc::new(
            Barrier::with_config(BarrierConfig::new(2).with_action(Arc::new(move || {
                a.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap(),
        );

        let waiter = {
            let barrier = barrier.clone();
            let action_done = action_done.clone();
            let observed = observed.clone();
            tokio::spawn(async move {
                barrier.wait().await.unwrap();
                observed.lock().push(action_done.load(Ordering::SeqCst));
            })
        };
        sleep(Duration::from_millis(1)).await;
        barrier.wait().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(*observed.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_breaks_barrier_for_everyone() {
        let barrier = Arc::new(Barrier::new(3).unwrap());

        let patient = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        sleep(Duration::from_millis(1)).await;

        let impatient = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_timeout(Duration::from_millis(20)).await })
        };
        advance(Duration::from_millis(30)).await;

        assert!(matches!(
            impatient.await.unwrap().unwrap_err(),
            WorkError::Timeout
        ));
        assert!(matches!(
            patient.await.unwrap().unwrap_err(),
            WorkError::Timeout
        ));
        assert!(barrier.is_broken());

        // reset restores the barrier
        barrier.reset();
        assert!(!barrier.is_broken());
    }
}
