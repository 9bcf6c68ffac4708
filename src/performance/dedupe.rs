//! Sliding-window call deduplication
//!
//! The first call for a key executes; callers with the same key arriving
//! inside the window receive the first call's outcome without re-invoking
//! the inner. After the window elapses the next call executes afresh.
//! Expired slots are reaped lazily when their key is next touched.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::{Work, WorkFn};

enum Slot<R> {
    InFlight(Vec<oneshot::Sender<WorkResult<R>>>),
    Done {
        outcome: WorkResult<R>,
        expires_at: Instant,
    },
}

/// Shared deduplication engine
pub struct Deduper<K, R> {
    window: Duration,
    slots: Arc<DashMap<K, Slot<R>>>,
}

impl<K, R> Clone for Deduper<K, R> {
    fn clone(&self) -> Self {
        Self {
            window: self.window,
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, R> Deduper<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Deduplicate per key within `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Forget all keys
    pub fn reset(&self) {
        self.slots.clear();
    }

    /// Forget one key
    pub fn reset_key(&self, key: &K) {
        self.slots.remove(key);
    }

    /// Run, subscribe, or replay for `key` within the window
    pub async fn submit(&self, run: WorkFn<K, R>, key: K) -> WorkResult<R> {
        enum Plan<R> {
            Lead,
            Await(oneshot::Receiver<WorkResult<R>>),
            Replay(WorkResult<R>),
        }

        let plan = {
            let now = Instant::now();
            match self.slots.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    match occupied.get_mut() {
                        Slot::InFlight(waiters) => {
                            let (tx, rx) = oneshot::channel();
                            waiters.push(tx);
                            Plan::Await(rx)
                        }
                        Slot::Done { outcome, expires_at } => {
                            if *expires_at > now {
                                trace!("dedupe window replay");
                                Plan::Replay(outcome.clone())
                            } else {
                                occupied.insert(Slot::InFlight(Vec::new()));
                                Plan::Lead
                            }
                        }
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(Slot::InFlight(Vec::new()));
                    Plan::Lead
                }
            }
        };

        match plan {
            Plan::Replay(outcome) => outcome,
            Plan::Await(rx) => rx.await.map_err(|_| WorkError::Cancelled)?,
            Plan::Lead => {
                let outcome = run(key.clone()).await;
                let waiters = {
                    match self.slots.get_mut(&key) {
                        Some(mut slot) => {
                            let previous = std::mem::replace(
                                &mut *slot,
                                Slot::Done {
                                    outcome: outcome.clone(),
                                    expires_at: Instant::now() + self.window,
                                },
                            );
                            match previous {
                                Slot::InFlight(waiters) => waiters,
                                Slot::Done { .. } => Vec::new(),
                            }
                        }
                        // reset while in flight: nobody is subscribed
                        None => Vec::new(),
                    }
                };
                for tx in waiters {
                    let _ = tx.send(outcome.clone());
                }
                outcome
            }
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Deduplicate calls with equal arguments within a sliding window
    pub fn dedupe(self, window: Duration) -> Work<Args, R> {
        self.dedupe_shared(Deduper::new(window))
    }

    /// Deduplicate through a shared engine
    pub fn dedupe_shared(self, deduper: Deduper<Args, R>) -> Work<Args, R> {
        let run = self.runner();
        Work::wrap(move |args| {
            let run = Arc::clone(&run);
            let deduper = deduper.clone();
            Box::pin(async move { deduper.submit(run, args).await })
        })
    }
}
