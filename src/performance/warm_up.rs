//! Result warm-up
//!
//! Pre-computes results so callers hit a warm cache. Warming runs at
//! construction, on the first call per key, or on explicit request, and an
//! optional refresh interval re-invokes the inner to keep warmed values
//! fresh. Warm-up failures are swallowed after a log line; the next normal
//! call simply executes the inner again.

use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::WorkResult;
use crate::work::{Work, WorkFn};

/// When warming happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarmUpTrigger {
    /// Invoke the inner once at construction with configured arguments
    OnInit,
    /// The first call per key warms the cache
    #[default]
    OnFirstCall,
    /// Only explicit warm-up requests populate the cache
    Manual,
}

/// Warm-up parameters
#[derive(Debug, Clone)]
pub struct WarmUpConfig<Args> {
    /// When warming happens
    pub trigger: WarmUpTrigger,
    /// Re-warm cached keys at this interval
    pub keep_fresh: Option<Duration>,
    /// Arguments used by the `OnInit` trigger and bare warm-up requests
    pub init_args: Option<Args>,
}

impl<Args> WarmUpConfig<Args> {
    /// Warm on the first call per key
    pub fn on_first_call() -> Self {
        Self {
            trigger: WarmUpTrigger::OnFirstCall,
            keep_fresh: None,
            init_args: None,
        }
    }

    /// Warm once at construction with the given arguments
    pub fn on_init(args: Args) -> Self {
        Self {
            trigger: WarmUpTrigger::OnInit,
            keep_fresh: None,
            init_args: Some(args),
        }
    }

    /// Warm only on explicit request
    pub fn manual() -> Self {
        Self {
            trigger: WarmUpTrigger::Manual,
            keep_fresh: None,
            init_args: None,
        }
    }

    /// Re-warm cached keys every `interval`
    pub fn keep_fresh(mut self, interval: Duration) -> Self {
        self.keep_fresh = Some(interval);
        self
    }
}

struct WarmerInner<Args, R> {
    config: WarmUpConfig<Args>,
    run: WorkFn<Args, R>,
    cache: DashMap<Args, R>,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl<Args, R> Drop for WarmerInner<Args, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh.lock().take() {
            handle.abort();
        }
    }
}

/// Shared warm-up engine
pub struct Warmer<Args, R> {
    inner: Arc<WarmerInner<Args, R>>,
}

impl<Args, R> Clone for Warmer<Args, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Args, R> Warmer<Args, R>
where
    Args: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Create a warmer over `work`, firing init warming and refresh tasks
    pub fn new(work: &Work<Args, R>, config: WarmUpConfig<Args>) -> Self {
        let warmer = Self {
            inner: Arc::new(WarmerInner {
                run: work.runner(),
                cache: DashMap::new(),
                refresh: Mutex::new(None),
                config,
            }),
        };
        if warmer.inner.config.trigger == WarmUpTrigger::OnInit {
            if let Some(args) = warmer.inner.config.init_args.clone() {
                let this = warmer.clone();
                tokio::spawn(async move { this.warm_up_with(args).await });
            }
        }
        if let Some(interval) = warmer.inner.config.keep_fresh {
            let weak = Arc::downgrade(&warmer.inner);
            *warmer.inner.refresh.lock() =
                Some(tokio::spawn(Self::refresh_loop(weak, interval)));
        }
        warmer
    }

    /// Warmed entries currently held
    pub fn warmed_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Warm using the configured init arguments
    pub async fn trigger_warm_up(&self) {
        if let Some(args) = self.inner.config.init_args.clone() {
            self.warm_up_with(args).await;
        }
    }

    /// Warm one key explicitly; failures are swallowed
    pub async fn warm_up_with(&self, args: Args) {
        match (self.inner.run)(args.clone()).await {
            Ok(value) => {
                debug!("warm-up succeeded");
                self.inner.cache.insert(args, value);
            }
            Err(err) => warn!(error = %err, "warm-up failed, will retry on demand"),
        }
    }

    /// Stop the refresh timer
    pub fn dispose(&self) {
        if let Some(handle) = self.inner.refresh.lock().take() {
            handle.abort();
        }
    }

    /// Serve warmed values, falling through to the inner on cold keys
    pub async fn submit(&self, args: Args) -> WorkResult<R> {
        if let Some(hit) = self.inner.cache.get(&args) {
            return Ok(hit.value().clone());
        }
        let value = (self.inner.run)(args.clone()).await?;
        if self.inner.config.trigger == WarmUpTrigger::OnFirstCall {
            self.inner.cache.insert(args, value.clone());
        }
        Ok(value)
    }

    /// Wrap the engine as a callable work
    pub fn into_work(self) -> Work<Args, R> {
        Work::wrap(move |args| {
            let warmer = self.clone();
            Box::pin(async move { warmer.submit(args).await })
        })
    }

    async fn refresh_loop(weak: Weak<WarmerInner<Args, R>>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { return };
            let keys: Vec<Args> = inner.cache.iter().map(|e| e.key().clone()).collect();
            for key in keys {
                match (inner.run)(key.clone()).await {
                    Ok(value) => {
                        inner.cache.insert(key, value);
                    }
                    Err(err) => warn!(error = %err, "keep-fresh refresh failed"),
                }
            }
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Serve warmed results per the configured trigger
    pub fn warm_up(self, config: WarmUpConfig<Args>) -> Work<Args, R> {
        Warmer::new(&self, config).into_work()
    }

    /// Like [`warm_up`](Work::warm_up), also returning the control handle
    pub fn warm_up_handle(self, config: WarmUpConfig<Args>) -> (Work<Args, R>, Warmer<Args, R>) {
        let warmer = Warmer::new(&self, config);
        (warmer.clone().into_work(), warmer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::{advance, sleep};

    fn counting_work(calls: Arc<AtomicU32>) -> Work<(u32,), u32> {
        Work::from_fn1(move |n: u32| {
            let calls = calls.clone();
            async move {
                let c = calls.fetch_add(1, Ordering::SeqCst);
                Ok(n * 10 + c)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_init_precomputes() {
        let calls = Arc::new(AtomicU32::new(0));
        let work = counting_work(calls.clone()).warm_up(WarmUpConfig::on_init((1,)));
        sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a call for the warmed key hits the cache
        assert_eq!(work.call(1).await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_first_call_caches_per_key() {
        let calls = Arc::new(AtomicU32::new(0));
        let work = counting_work(calls.clone()).warm_up(WarmUpConfig::on_first_call());

        let first = work.call(1).await.unwrap();
        assert_eq!(work.call(1).await.unwrap(), first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        work.call(2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_manual_trigger_populates_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let (work, warmer) =
            counting_work(calls.clone()).warm_up_handle(WarmUpConfig::manual());

        // normal calls do not populate the cache in manual mode
        work.call(1).await.unwrap();
        work.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        warmer.warm_up_with((1,)).await;
        assert_eq!(warmer.warmed_count(), 1);
        let warmed = work.call(1).await.unwrap();
        assert_eq!(work.call(1).await.unwrap(), warmed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_warm_up_failure_is_swallowed() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let work = Work::from_fn1(move |n: u32| {
            let c = c.clone();
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt == 1 {
                    Err(crate::error::WorkError::msg("warm-up path down"))
                } else {
                    Ok(n)
                }
            }
        });
        let (work, warmer) = work.warm_up_handle(WarmUpConfig::manual());

        warmer.warm_up_with((5,)).await;
        assert_eq!(warmer.warmed_count(), 0);

        // the next normal call retries and succeeds
        assert_eq!(work.call(5).await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_fresh_refreshes_warmed_keys() {
        let calls = Arc::new(AtomicU32::new(0));
        let (work, warmer) = counting_work(calls.clone()).warm_up_handle(
            WarmUpConfig::on_first_call().keep_fresh(Duration::from_secs(10)),
        );

        let first = work.call(1).await.unwrap();
        advance(Duration::from_secs(11)).await;
        // refresh replaced the cached value with a fresh computation
        let refreshed = work.call(1).await.unwrap();
        assert_ne!(first, refreshed);
        assert!(calls.load(Ordering::SeqCst) >= 2);

        warmer.dispose();
    }
}
