//! Performance decorators
//!
//! Call elision and shaping:
//! - [`memoize`](crate::work::Work::memoize): cache successful results with
//!   TTL and LRU/LFU/FIFO eviction
//! - [`dedupe`](crate::work::Work::dedupe): share one execution per key per
//!   sliding window
//! - [`share`](crate::work::Work::share): coalesce concurrent in-flight
//!   calls per key
//! - [`once`](crate::work::Work::once): execute at most once per key,
//!   caching the outcome including errors
//! - [`lazy`](crate::work::Work::lazy): defer construction of the inner
//!   callable until first use
//! - [`Batcher`]: accumulate calls and execute them together
//! - [`RateLimiter`]: bound call rate by token bucket, fixed, sliding
//!   window, or leaky bucket
//! - [`Warmer`]: pre-compute and keep results fresh
//! - [`compress_output`](crate::work::Work::compress_output): shrink large
//!   payloads
//! - [`AsideCache`]: read-through cache with optional background refresh

pub mod batch;
pub mod cache_aside;
pub mod compress;
pub mod dedupe;
pub mod lazy;
pub mod memoize;
pub mod once;
pub mod rate_limit;
pub mod share;
pub mod warm_up;

pub use batch::{BatchConfig, BatchExecutor, Batcher};
pub use cache_aside::{AsideCache, CacheAsideConfig, RefreshStrategy};
pub use compress::{CompressConfig, CompressiblePayload, CompressionAlgorithm, CompressionLevel};
pub use dedupe::Deduper;
pub use memoize::{EvictionPolicy, MemoCache, MemoStats, MemoizeConfig};
pub use once::OnceGroup;
pub use rate_limit::{RateLimitConfig, RateLimitStrategy, RateLimiter};
pub use share::ShareGroup;
pub use warm_up::{WarmUpConfig, WarmUpTrigger, Warmer};
