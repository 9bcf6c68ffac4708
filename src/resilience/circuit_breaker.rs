//! Circuit breaker
//!
//! Tracks consecutive failures of a dependency and rejects calls while it is
//! considered unhealthy, giving it time to recover. The Open state lapses
//! into HalfOpen lazily: the first observation after the open timeout
//! performs the transition.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation; failures are counted
    Closed,
    /// Calls are rejected outright
    Open,
    /// Trial traffic is admitted to probe recovery
    HalfOpen,
}

/// Circuit breaker parameters
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that trip the breaker
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen that close the breaker
    pub success_threshold: u32,
    /// How long Open lasts before probing is allowed
    pub timeout: Duration,
    /// Invoked with (old, new) on every transition
    pub on_state_change: Option<Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
            on_state_change: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Breaker tripping after `failure_threshold` failures, probing after `timeout`
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            timeout,
            ..Self::default()
        }
    }

    /// Require `success_threshold` probe successes before closing
    pub fn with_success_threshold(mut self, success_threshold: u32) -> Self {
        self.success_threshold = success_threshold;
        self
    }

    /// Observe state transitions
    pub fn on_state_change<C>(mut self, callback: C) -> Self
    where
        C: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    fn validate(&self) -> WorkResult<()> {
        if self.failure_threshold < 1 {
            return Err(WorkError::Config(
                "circuit breaker failure_threshold must be >= 1".into(),
            ));
        }
        if self.success_threshold < 1 {
            return Err(WorkError::Config(
                "circuit breaker success_threshold must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

/// Consecutive-failure circuit breaker
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(config: CircuitBreakerConfig) -> WorkResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                consecutive_failures: 0,
                consecutive_successes: 0,
            }),
            config,
        })
    }

    /// Current state, applying the lazy Open to HalfOpen transition
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.maybe_probe(&mut state);
        state.state
    }

    /// Force Closed and clear all counters
    pub fn reset(&self) {
        let transition = {
            let mut state = self.state.lock();
            let old = state.state;
            state.state = CircuitState::Closed;
            state.opened_at = None;
            state.consecutive_failures = 0;
            state.consecutive_successes = 0;
            (old != CircuitState::Closed).then_some((old, CircuitState::Closed))
        };
        self.notify(transition);
    }

    /// Run `operation` under breaker protection
    pub async fn execute<F, Fut, T>(&self, operation: F) -> WorkResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkResult<T>>,
    {
        let admission = {
            let mut state = self.state.lock();
            let transition = self.maybe_probe(&mut state);
            (state.state, transition)
        };
        self.notify(admission.1);
        if admission.0 == CircuitState::Open {
            return Err(WorkError::CircuitOpen);
        }

        match operation().await {
            Ok(value) => {
                self.notify(self.record_success());
                Ok(value)
            }
            Err(err) => {
                self.notify(self.record_failure());
                Err(err)
            }
        }
    }

    /// Open has lapsed: admit probe traffic
    fn maybe_probe(&self, state: &mut BreakerState) -> Option<(CircuitState, CircuitState)> {
        if state.state == CircuitState::Open {
            let lapsed = state
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.timeout);
            if lapsed {
                state.state = CircuitState::HalfOpen;
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                return Some((CircuitState::Open, CircuitState::HalfOpen));
            }
        }
        None
    }

    fn record_success(&self) -> Option<(CircuitState, CircuitState)> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.opened_at = None;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    fn record_failure(&self) -> Option<(CircuitState, CircuitState)> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    Some((CircuitState::Closed, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // a probe failure re-opens immediately
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.consecutive_successes = 0;
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            CircuitState::Open => None,
        }
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((old, new)) = transition {
            debug!(?old, ?new, "circuit breaker transition");
            if let Some(cb) = &self.config.on_state_change {
                cb(old, new);
            }
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Guard invocations with a dedicated circuit breaker
    pub fn circuit_breaker(self, config: CircuitBreakerConfig) -> Work<Args, R> {
        match CircuitBreaker::new(config) {
            Ok(breaker) => self.with_circuit_breaker(Arc::new(breaker)),
            Err(err) => Work::config_error(err),
        }
    }

    /// Guard invocations with a shared circuit breaker
    pub fn with_circuit_breaker(self, breaker: Arc<CircuitBreaker>) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let breaker = Arc::clone(&breaker);
            Box::pin(async move { breaker.execute(|| inner(args)).await })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::time::advance;

    async fn fail(breaker: &CircuitBreaker) -> WorkResult<u32> {
        breaker
            .execute(|| async { Err(WorkError::msg("backend down")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> WorkResult<u32> {
        breaker.execute(|| async { Ok(1) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_open_after_failure_threshold() {
        let breaker =
            CircuitBreaker::new(CircuitBreakerConfig::new(5, Duration::from_secs(60))).unwrap();
        for _ in 0..5 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            succeed(&breaker).await.unwrap_err(),
            WorkError::CircuitOpen
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_then_closes() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new(5, Duration::from_secs(60)).with_success_threshold(2),
        )
        .unwrap();
        for _ in 0..5 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_secs(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let breaker =
            CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(10))).unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        // opened_at restarted: still open just before the new deadline
        advance(Duration::from_secs(9)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_streak() {
        let breaker =
            CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(10))).unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_change_callback_and_reset() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let t = transitions.clone();
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new(1, Duration::from_secs(60))
                .on_state_change(move |old, new| t.lock().push((old, new))),
        )
        .unwrap();

        fail(&breaker).await.unwrap_err();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(
            *transitions.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_thresholds_rejected() {
        assert!(matches!(
            CircuitBreaker::new(CircuitBreakerConfig::new(0, Duration::from_secs(1))).unwrap_err(),
            WorkError::Config(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_integration_rejects_while_open() {
        let work = Work::from_fn(|| async { Err::<u32, _>(WorkError::msg("down")) })
            .circuit_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        work.call().await.unwrap_err();
        assert!(matches!(
            work.call().await.unwrap_err(),
            WorkError::CircuitOpen
        ));
    }
}
