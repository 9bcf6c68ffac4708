//! Error types for decorated work execution

use std::sync::Arc;
use thiserror::Error;

/// Result type for decorated work
pub type WorkResult<T> = Result<T, WorkError>;

/// Errors produced by the execution-control runtime
///
/// Every decorator fails with a specific variant so callers can match on the
/// kind (`retry_if`, `fallback_if`, `catch_if` predicates all receive a
/// `&WorkError`). Errors raised by user code are carried in [`WorkError::User`]
/// and propagated unchanged through all decorator layers.
#[derive(Error, Debug, Clone)]
pub enum WorkError {
    /// A waited-for event did not occur in time
    #[error("operation timed out")]
    Timeout,

    /// Call rejected because a circuit breaker is open
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Call rejected by a throttle window
    #[error("call throttled")]
    Throttled,

    /// Call rejected by a rate limiter with a bounded queue
    #[error("rate limit queue overflowed")]
    RateLimited,

    /// A bounded queue rejected a submission
    #[error("queue full: {0}")]
    QueueFull(String),

    /// A backpressure buffer rejected a submission
    #[error("buffer full")]
    BufferFull,

    /// Call shed by a backpressure strategy
    #[error("call dropped: {0}")]
    Dropped(&'static str),

    /// A waiter was cancelled or its owning structure was dropped
    #[error("operation cancelled")]
    Cancelled,

    /// Barrier broken by timeout or re-use of a tripped non-cyclic barrier
    #[error("barrier is broken")]
    BrokenBarrier,

    /// A guard, validator, or switch predicate rejected the call
    #[error("predicate failed: {0}")]
    PredicateFailed(String),

    /// An operation was attempted in a state that cannot serve it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Construction-time configuration validation failure
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Error produced by the inner callable, propagated unchanged
    #[error("{0}")]
    User(Arc<anyhow::Error>),
}

impl WorkError {
    /// Wrap an arbitrary user error, preserving its context chain
    pub fn user(err: impl Into<anyhow::Error>) -> Self {
        WorkError::User(Arc::new(err.into()))
    }

    /// Build a user error from a message
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        WorkError::User(Arc::new(anyhow::anyhow!("{msg}")))
    }

    /// Whether this error originated in user code rather than the runtime
    pub fn is_user(&self) -> bool {
        matches!(self, WorkError::User(_))
    }

    /// Whether this is a runtime timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkError::Timeout)
    }

    /// Whether this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkError::Cancelled)
    }
}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        WorkError::User(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_preserves_message() {
        let err = WorkError::msg("backend unavailable");
        assert!(err.is_user());
        assert_eq!(err.to_string(), "backend unavailable");
    }

    #[test]
    fn test_user_error_clone_shares_source() {
        let err = WorkError::user(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_kind_predicates() {
        assert!(WorkError::Timeout.is_timeout());
        assert!(WorkError::Cancelled.is_cancelled());
        assert!(!WorkError::CircuitOpen.is_user());
    }
}
