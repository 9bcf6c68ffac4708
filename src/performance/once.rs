//! At-most-once execution per key
//!
//! The first call for a key executes and its outcome, success or failure,
//! is stored and replayed to every later caller. A `reset_on` predicate can
//! mark certain stored errors as recoverable: the next call evicts such an
//! outcome and executes afresh.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::{Work, WorkFn};

enum Slot<R> {
    InFlight(Vec<oneshot::Sender<WorkResult<R>>>),
    Done(WorkResult<R>),
}

/// Shared at-most-once engine
pub struct OnceGroup<K, R> {
    slots: Arc<DashMap<K, Slot<R>>>,
    reset_on: Option<Arc<dyn Fn(&WorkError) -> bool + Send + Sync>>,
}

impl<K, R> Clone for OnceGroup<K, R> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            reset_on: self.reset_on.clone(),
        }
    }
}

impl<K, R> Default for OnceGroup<K, R>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, R> OnceGroup<K, R>
where
    K: Eq + Hash,
{
    /// Create an empty group with no error recovery
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            reset_on: None,
        }
    }

    /// Treat stored errors matching `pred` as recoverable
    pub fn reset_on<P>(mut self, pred: P) -> Self
    where
        P: Fn(&WorkError) -> bool + Send + Sync + 'static,
    {
        self.reset_on = Some(Arc::new(pred));
        self
    }

    /// Evict one stored outcome
    pub fn reset_key(&self, key: &K) {
        self.slots.remove(key);
    }

    /// Evict every stored outcome
    pub fn reset(&self) {
        self.slots.clear();
    }
}

impl<K, R> OnceGroup<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Run once for `key`, replaying the stored outcome afterwards
    pub async fn submit(&self, run: WorkFn<K, R>, key: K) -> WorkResult<R> {
        enum Plan<R> {
            Lead,
            Await(oneshot::Receiver<WorkResult<R>>),
            Replay(WorkResult<R>),
        }

        let plan = {
            match self.slots.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    match occupied.get_mut() {
                        Slot::InFlight(waiters) => {
                            let (tx, rx) = oneshot::channel();
                            waiters.push(tx);
                            Plan::Await(rx)
                        }
                        Slot::Done(outcome) => {
                            let recoverable = match (&self.reset_on, &outcome) {
                                (Some(pred), Err(err)) => pred(err),
                                _ => false,
                            };
                            if recoverable {
                                trace!("evicting recoverable error outcome");
                                occupied.insert(Slot::InFlight(Vec::new()));
                                Plan::Lead
                            } else {
                                Plan::Replay(outcome.clone())
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
                            let previous =
                                std::mem::replace(&mut *slot, Slot::Done(outcome.clone()));
                            match previous {
                                Slot::InFlight(waiters) => waiters,
                                Slot::Done(..) => Vec::new(),
                            }
                        }
                        // reset raced the execution: store the fresh outcome
                        None => {
                            self.slots.insert(key, Slot::Done(outcome.clone()));
                            Vec::new()
                        }
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
    /// Execute at most once per argument tuple, caching the outcome
    pub fn once(self) -> Work<Args, R> {
        self.once_grouped(OnceGroup::new())
    }

    /// At-most-once through a shared group
    pub fn once_grouped(self, group: OnceGroup<Args, R>) -> Work<Args, R> {
        let run = self.runner();
        Work::wrap(move |args| {
            let run = Arc::clone(&run);
            let group = group.clone();
            Box::pin(async move { group.submit(run, args).await })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_repeated_calls_execute_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let work = Work::from_fn1(move |n: u32| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .once();

        for _ in 0..5 {
            assert_eq!(work.call(3).await.unwrap(), 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_outcome_is_replayed() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let work = Work::from_fn(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(WorkError::msg("init failed"))
            }
        })
        .once();

        assert_eq!(work.call().await.unwrap_err().to_string(), "init failed");
        assert_eq!(work.call().await.unwrap_err().to_string(), "init failed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_on_retries_matching_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let group = OnceGroup::new().reset_on(|err| matches!(err, WorkError::Timeout));
        let work = Work::from_fn(move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    Err(WorkError::Timeout)
                } else {
                    Ok(n)
                }
            }
        })
        .once_grouped(group);

        assert!(work.call().await.unwrap_err().is_timeout());
        // the stored timeout is recoverable: next call re-executes
        assert_eq!(work.call().await.unwrap(), 2);
        assert_eq!(work.call().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_manual_reset_key() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let group: OnceGroup<(u32,), u32> = OnceGroup::new();
        let work = Work::from_fn1(move |n: u32| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .once_grouped(group.clone());

        work.call(1).await.unwrap();
        group.reset_key(&(1,));
        work.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let work = Work::from_fn1(move |n: u32| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .once();

        work.call(1).await.unwrap();
        work.call(2).await.unwrap();
        work.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
