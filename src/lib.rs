//! Composable execution-control decorators for async unit-of-work functions
//!
//! This crate wraps async functions of arity 0, 1, or 2 in a [`Work`]
//! value and layers behaviour onto them by method chaining:
//! - concurrency primitives (lock, rwlock, semaphore, barrier, latch,
//!   monitor, bulkhead, worker queue)
//! - timing (debounce, throttle, delay, timeout)
//! - reliability (retry with backoff, circuit breaker, fallback, recover)
//! - performance (memoize, dedupe, share, once, lazy, batch, rate limit,
//!   warm-up, compression, cache-aside)
//! - flow control (backpressure, guards, validation, proxy, switch, repeat,
//!   taps)
//!
//! Every decorator returns a new [`Work`] of the same arity and result
//! type, so layers nest in construction order: the last decorator applied
//! runs first on the way in and last on the way out.
//!
//! ```no_run
//! use std::time::Duration;
//! use workforge::resilience::{CircuitBreakerConfig, RetryConfig};
//! use workforge::{Work, WorkResult};
//!
//! # async fn example() -> WorkResult<String> {
//! let fetch = Work::from_fn1(|region: String| async move {
//!     Ok(format!("inventory for {region}"))
//! })
//! .retry(RetryConfig::default())
//! .circuit_breaker(CircuitBreakerConfig::default())
//! .timeout(Duration::from_secs(5));
//!
//! fetch.call("eu-west".to_string()).await
//! # }
//! ```
//!
//! All state is instance-scoped: primitives shared across several works are
//! shared by explicit `Arc` or engine handle, never by global lookup.
//! Dropping the owning handle releases timers and fails pending waiters
//! with [`WorkError::Cancelled`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod backoff;
pub mod concurrency;
pub mod error;
pub mod flow;
pub mod performance;
pub mod resilience;
pub mod timing;
pub mod work;

pub use backoff::{
    Backoff, ConstantBackoff, DecorrelatedJitterBackoff, ExponentialBackoff, FibonacciBackoff,
    LinearBackoff,
};
pub use error::{WorkError, WorkResult};
pub use work::{Work, Work0, Work1, Work2};
