//! Read-through cache with optional background refresh
//!
//! Serves cached values while fresh. On expiry, the inline strategy
//! recomputes before answering; the background strategy answers with the
//! stale value immediately and refreshes in a spawned task, so callers
//! never wait on a recompute once a key is populated.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::error::WorkResult;
use crate::work::{Work, WorkFn};

/// How expired entries are renewed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshStrategy {
    /// Recompute inline on the expired call
    #[default]
    None,
    /// Serve stale and recompute in the background
    BackgroundRefresh,
}

/// Cache-aside parameters
#[derive(Debug, Clone, Copy)]
pub struct CacheAsideConfig {
    /// Entry lifetime
    pub ttl: Duration,
    /// Renewal strategy for expired entries
    pub refresh: RefreshStrategy,
}

impl CacheAsideConfig {
    /// Inline refresh with the given TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            refresh: RefreshStrategy::None,
        }
    }

    /// Serve stale values while refreshing in the background
    pub fn background_refresh(mut self) -> Self {
        self.refresh = RefreshStrategy::BackgroundRefresh;
        self
    }
}

struct AsideEntry<R> {
    value: R,
    fetched_at: Instant,
    refreshing: bool,
}

struct AsideInner<K, R> {
    config: CacheAsideConfig,
    entries: DashMap<K, AsideEntry<R>>,
}

/// Shared read-through cache
pub struct AsideCache<K, R> {
    inner: Arc<AsideInner<K, R>>,
}

impl<K, R> Clone for AsideCache<K, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, R> AsideCache<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Create an empty cache
    pub fn new(config: CacheAsideConfig) -> Self {
        Self {
            inner: Arc::new(AsideInner {
                config,
                entries: DashMap::new(),
            }),
        }
    }

    /// Entries currently held, fresh or stale
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drop one entry
    pub fn invalidate(&self, key: &K) {
        self.inner.entries.remove(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Serve from cache, loading through `run` as the strategy dictates
    pub async fn get_through(&self, run: WorkFn<K, R>, key: K) -> WorkResult<R> {
        enum Plan<R> {
            Fresh(R),
            StaleRefresh(R),
            Load,
        }

        let plan = {
            match self.inner.entries.get_mut(&key) {
                Some(mut entry) => {
                    if entry.fetched_at.elapsed() < self.inner.config.ttl {
                        Plan::Fresh(entry.value.clone())
                    } else {
                        match self.inner.config.refresh {
                            RefreshStrategy::None => Plan::Load,
                            RefreshStrategy::BackgroundRefresh => {
                                if entry.refreshing {
                                    Plan::Fresh(entry.value.clone())
                                } else {
                                    entry.refreshing = true;
                                    Plan::StaleRefresh(entry.value.clone())
                                }
                            }
                        }
                    }
                }
                None => Plan::Load,
            }
        };

        match plan {
            Plan::Fresh(value) => Ok(value),
            Plan::StaleRefresh(value) => {
                trace!("serving stale value, refreshing in background");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    match run(key.clone()).await {
                        Ok(fresh) => {
                            inner.entries.insert(
                                key,
                                AsideEntry {
                                    value: fresh,
                                    fetched_at: Instant::now(),
                                    refreshing: false,
                                },
                            );
                        }
                        Err(err) => {
                            warn!(error = %err, "background refresh failed");
                            if let Some(mut entry) = inner.entries.get_mut(&key) {
                                entry.refreshing = false;
                            }
                        }
                    }
                });
                Ok(value)
            }
            Plan::Load => {
                let value = run(key.clone()).await?;
                self.inner.entries.insert(
                    key,
                    AsideEntry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                        refreshing: false,
                    },
                );
                Ok(value)
            }
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Cache results with TTL renewal per the configured strategy
    pub fn cache_aside(self, config: CacheAsideConfig) -> Work<Args, R> {
        self.cache_aside_shared(AsideCache::new(config))
    }

    /// Cache through a shared read-through cache
    pub fn cache_aside_shared(self, cache: AsideCache<Args, R>) -> Work<Args, R> {
        let run = self.runner();
        Work::wrap(move |args| {
            let run = Arc::clone(&run);
            let cache = cache.clone();
            Box::pin(async move { cache.get_through(run, args).await })
        })
    }
}
