//! In-flight call coalescing
//!
//! While a call for a key is in flight, concurrent callers with the same key
//! subscribe to its outcome instead of invoking the inner again. Nothing is
//! cached: once the in-flight call settles, the next invocation starts
//! fresh.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::{Work, WorkFn};

struct InFlight<R> {
    waiters: Vec<oneshot::Sender<WorkResult<R>>>,
}

/// Shared coalescing group
pub struct ShareGroup<K, R> {
    inflight: Arc<DashMap<K, InFlight<R>>>,
}

impl<K, R> Clone for ShareGroup<K, R> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<K, R> Default for ShareGroup<K, R>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, R> ShareGroup<K, R>
where
    K: Eq + Hash,
{
    /// Create an empty group
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Keys currently in flight
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

impl<K, R> ShareGroup<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    /// Run or subscribe to the in-flight execution for `key`
    pub async fn submit(&self, run: WorkFn<K, R>, key: K) -> WorkResult<R> {
        let subscription = {
            match self.inflight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    let (tx, rx) = oneshot::channel();
                    occupied.get_mut().waiters.push(tx);
                    Some(rx)
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(InFlight {
                        waiters: Vec::new(),
                    });
                    None
                }
            }
        };

        match subscription {
            Some(rx) => {
                trace!("subscribed to in-flight call");
                rx.await.map_err(|_| WorkError::Cancelled)?
            }
            None => {
                let outcome = run(key.clone()).await;
                if let Some((_, inflight)) = self.inflight.remove(&key) {
                    for tx in inflight.waiters {
                        let _ = tx.send(outcome.clone());
                    }
                }
                outcome
            }
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    /// Coalesce concurrent calls with equal arguments onto one execution
    pub fn share(self) -> Work<Args, R> {
        self.share_grouped(ShareGroup::new())
    }

    /// Coalesce through a shared group
    pub fn share_grouped(self, group: ShareGroup<Args, R>) -> Work<Args, R> {
        let run = self.runner();
        Work::wrap(move |args| {
            let run = Arc::clone(&run);
            let group = group.clone();
            Box::pin(async move { group.submit(run, args).await })
        })
    }
}
