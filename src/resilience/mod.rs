//! Reliability decorators
//!
//! Failure handling for decorated work:
//! - [`retry`](crate::work::Work::retry): re-attempt with a backoff strategy
//! - [`CircuitBreaker`]: reject calls while a dependency is unhealthy
//! - [`fallback`](crate::work::Work::fallback): substitute a value or
//!   function result on failure
//! - [`recover`](crate::work::Work::recover): run cleanup on failure
//!   without substituting a value

pub mod circuit_breaker;
pub mod fallback;
pub mod recover;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use fallback::Fallback;
pub use recover::RecoverConfig;
pub use retry::RetryConfig;
