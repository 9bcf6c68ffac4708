//! Memoization with TTL and capacity-bounded eviction
//!
//! Successful results are cached keyed by the argument tuple; failures are
//! never cached. A hit inside the TTL returns the cached value without
//! touching the inner call. At capacity, the eviction policy picks the
//! victim: LRU by last access, LFU by access count (ties broken by oldest
//! insertion), FIFO by insertion order alone.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Which entry is evicted at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Oldest last-access time
    #[default]
    Lru,
    /// Lowest access count, oldest insertion among ties
    Lfu,
    /// Oldest insertion regardless of use
    Fifo,
}

/// Memoization parameters
#[derive(Debug, Clone, Copy)]
pub struct MemoizeConfig {
    /// Per-entry lifetime; `None` never expires
    pub ttl: Option<Duration>,
    /// Entry capacity; `None` is unbounded
    pub max_size: Option<usize>,
    /// Eviction policy applied at capacity
    pub policy: EvictionPolicy,
}

impl Default for MemoizeConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            max_size: None,
            policy: EvictionPolicy::Lru,
        }
    }
}

impl MemoizeConfig {
    /// Unbounded cache without expiry
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire entries `ttl` after creation
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Bound the cache to `max_size` entries
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Select the eviction policy
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Cache occupancy counters
#[derive(Debug, Clone, Serialize)]
pub struct MemoStats {
    /// Entries currently cached
    pub len: usize,
    /// Lookup hits since creation
    pub hits: u64,
    /// Lookup misses since creation
    pub misses: u64,
}

struct Entry<R> {
    value: R,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
    seq: u64,
}

struct CacheState<K, R> {
    entries: HashMap<K, Entry<R>>,
    seq: u64,
    hits: u64,
    misses: u64,
}

/// Shared memoization cache
pub struct MemoCache<K, R> {
    state: Arc<Mutex<CacheState<K, R>>>,
    config: MemoizeConfig,
}

impl<K, R> Clone for MemoCache<K, R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            config: self.config,
        }
    }
}

impl<K, R> MemoCache<K, R>
where
    K: Eq + Hash + Clone,
    R: Clone,
{
    /// Create an empty cache
    pub fn new(config: MemoizeConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                seq: 0,
                hits: 0,
                misses: 0,
            })),
            config,
        }
    }

    /// Occupancy counters
    pub fn stats(&self) -> MemoStats {
        let state = self.state.lock();
        MemoStats {
            len: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        self.purge_if_expired(&mut state, key);
        state.entries.contains_key(key)
    }

    /// Fetch a live entry, updating its access metadata
    pub fn lookup(&self, key: &K) -> Option<R> {
        let mut state = self.state.lock();
        self.purge_if_expired(&mut state, key);
        let state = &mut *state;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                entry.access_count += 1;
                state.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Store a value, evicting per policy at capacity
    pub fn insert(&self, key: K, value: R) {
        if self.config.max_size == Some(0) {
            return;
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        if !state.entries.contains_key(&key) {
            if let Some(max) = self.config.max_size {
                while !state.entries.is_empty() && state.entries.len() >= max {
                    self.evict_one(&mut state);
                }
            }
        }
        state.seq += 1;
        let seq = state.seq;
        state.entries.insert(
            key,
            Entry {
                value,
                created_at: now,
                last_access: now,
                access_count: 0,
                seq,
            },
        );
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Drop the entry for `key`
    pub fn clear_key(&self, key: &K) {
        self.state.lock().entries.remove(key);
    }

    fn purge_if_expired(&self, state: &mut CacheState<K, R>, key: &K) {
        if let Some(ttl) = self.config.ttl {
            let expired = state
                .entries
                .get(key)
                .is_some_and(|e| e.created_at.elapsed() >= ttl);
            if expired {
                state.entries.remove(key);
            }
        }
    }

    fn evict_one(&self, state: &mut CacheState<K, R>) {
        let victim = match self.config.policy {
            EvictionPolicy::Lru => state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => state
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.seq))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Fifo => state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone()),
        };
        if let Some(key) = victim {
            trace!(policy = ?self.config.policy, "memoize eviction");
            state.entries.remove(&key);
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Eq + Hash + Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Cache successful results keyed by the argument tuple
    pub fn memoize(self, config: MemoizeConfig) -> Work<Args, R> {
        self.memoize_shared(MemoCache::new(config))
    }

    /// Memoize through a shared cache
    pub fn memoize_shared(self, cache: MemoCache<Args, R>) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let cache = cache.clone();
            Box::pin(async move {
                if let Some(hit) = cache.lookup(&args) {
                    return Ok(hit);
                }
                let value = inner(args.clone()).await?;
                cache.insert(args, value.clone());
                Ok(value)
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::advance;

    fn counting_work(calls: Arc<AtomicU32>) -> Work<(u32,), u32> {
        Work::from_fn1(move |n: u32| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(n * 2)
            }
        })
    }

    #[tokio::test]
    async fn test_hit_skips_inner_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let work = counting_work(calls.clone()).memoize(MemoizeConfig::new());
        assert_eq!(work.call(5).await.unwrap(), 10);
        assert_eq!(work.call(5).await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(work.call(6).await.unwrap(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let work = Work::from_fn1(move |n: u32| {
            let c = c.clone();
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt == 1 {
                    Err(WorkError::msg("cold start"))
                } else {
                    Ok(n)
                }
            }
        })
        .memoize(MemoizeConfig::new());

        work.call(1).await.unwrap_err();
        assert_eq!(work.call(1).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_reexecutes() {
        let calls = Arc::new(AtomicU32::new(0));
        let work = counting_work(calls.clone())
            .memoize(MemoizeConfig::new().with_ttl(Duration::from_secs(30)));
        work.call(1).await.unwrap();
        advance(Duration::from_secs(10)).await;
        work.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(30)).await;
        work.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let cache: MemoCache<u32, u32> =
            MemoCache::new(MemoizeConfig::new().with_max_size(2));
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.lookup(&1);
        cache.insert(3, 30);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[tokio::test]
    async fn test_lfu_evicts_least_frequent_tie_oldest() {
        let cache: MemoCache<u32, u32> = MemoCache::new(
            MemoizeConfig::new()
                .with_max_size(2)
                .with_policy(EvictionPolicy::Lfu),
        );
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.lookup(&2);
        cache.insert(3, 30);

        // key 1 had zero hits: it is the LFU victim
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[tokio::test]
    async fn test_fifo_evicts_oldest_insertion_despite_use() {
        let cache: MemoCache<u32, u32> = MemoCache::new(
            MemoizeConfig::new()
                .with_max_size(2)
                .with_policy(EvictionPolicy::Fifo),
        );
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.lookup(&1);
        cache.lookup(&1);
        cache.insert(3, 30);

        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[tokio::test]
    async fn test_clear_key_forces_reexecution() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = MemoCache::new(MemoizeConfig::new());
        let work = counting_work(calls.clone()).memoize_shared(cache.clone());

        work.call(1).await.unwrap();
        cache.clear_key(&(1,));
        work.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
