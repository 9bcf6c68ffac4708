//! Rate limiting
//!
//! All strategies delay rather than drop: a call that exceeds the budget
//! waits for capacity. The one exception is the leaky bucket, whose bounded
//! queue rejects overflow with [`WorkError::RateLimited`]. The limiter is
//! shared across all argument values.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Admission algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitStrategy {
    /// Continuous refill with burst capacity of `max_calls`
    #[default]
    TokenBucket,
    /// Counter resetting at fixed window boundaries
    FixedWindow,
    /// Ring of recent admissions over a trailing window
    SlidingWindow,
    /// Bounded queue drained at a steady rate
    LeakyBucket,
}

/// Rate limiter parameters
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Admissions per window
    pub max_calls: u32,
    /// Window length
    pub window: Duration,
    /// Admission algorithm
    pub strategy: RateLimitStrategy,
    /// Leaky-bucket queue bound; defaults to `4 * max_calls`
    pub max_queue: Option<usize>,
}

impl RateLimitConfig {
    /// Token bucket admitting `max_calls` per `window`
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            strategy: RateLimitStrategy::TokenBucket,
            max_queue: None,
        }
    }

    /// Select the admission algorithm
    pub fn with_strategy(mut self, strategy: RateLimitStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Bound the leaky-bucket queue
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = Some(max_queue);
        self
    }

    fn validate(&self) -> WorkResult<()> {
        if self.max_calls == 0 {
            return Err(WorkError::Config("rate limit max_calls must be > 0".into()));
        }
        if self.window.is_zero() {
            return Err(WorkError::Config("rate limit window must be > 0".into()));
        }
        if self.max_queue == Some(0) {
            return Err(WorkError::Config("rate limit max_queue must be > 0".into()));
        }
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.window / self.max_calls
    }
}

enum LimiterState {
    TokenBucket {
        tokens: f64,
        last_refill: Instant,
    },
    FixedWindow {
        window_start: Instant,
        count: u32,
    },
    SlidingWindow {
        admissions: VecDeque<Instant>,
    },
    LeakyBucket {
        next_release: Instant,
        queued: usize,
    },
}

impl LimiterState {
    fn fresh(config: &RateLimitConfig) -> Self {
        let now = Instant::now();
        match config.strategy {
            RateLimitStrategy::TokenBucket => LimiterState::TokenBucket {
                tokens: f64::from(config.max_calls),
                last_refill: now,
            },
            RateLimitStrategy::FixedWindow => LimiterState::FixedWindow {
                window_start: now,
                count: 0,
            },
            RateLimitStrategy::SlidingWindow => LimiterState::SlidingWindow {
                admissions: VecDeque::new(),
            },
            RateLimitStrategy::LeakyBucket => LimiterState::LeakyBucket {
                next_release: now,
                queued: 0,
            },
        }
    }
}

/// Shared rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create an idle limiter
    pub fn new(config: RateLimitConfig) -> WorkResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(LimiterState::fresh(&config)),
            config,
        })
    }

    /// Forget all admission history
    pub fn reset(&self) {
        *self.state.lock() = LimiterState::fresh(&self.config);
    }

    /// Tear down; equivalent to [`reset`](RateLimiter::reset) since waiting
    /// happens caller-side and no periodic timers exist
    pub fn dispose(&self) {
        self.reset();
    }

    /// Wait until one call is admitted
    pub async fn acquire(&self) -> WorkResult<()> {
        match self.config.strategy {
            RateLimitStrategy::TokenBucket => self.acquire_token_bucket().await,
            RateLimitStrategy::FixedWindow => self.acquire_fixed_window().await,
            RateLimitStrategy::SlidingWindow => self.acquire_sliding_window().await,
            RateLimitStrategy::LeakyBucket => self.acquire_leaky_bucket().await,
        }
    }

    async fn acquire_token_bucket(&self) -> WorkResult<()> {
        let rate = f64::from(self.config.max_calls) / self.config.window.as_secs_f64();
        loop {
            let wait = {
                let mut state = self.state.lock();
                let LimiterState::TokenBucket {
                    tokens,
                    last_refill,
                } = &mut *state
                else {
                    return Err(WorkError::InvalidState("limiter strategy changed".into()));
                };
                let now = Instant::now();
                let refilled = *tokens + now.duration_since(*last_refill).as_secs_f64() * rate;
                *tokens = refilled.min(f64::from(self.config.max_calls));
                *last_refill = now;
                // tolerance absorbs float drift from repeated refills
                if *tokens >= 1.0 - 1e-9 {
                    *tokens = (*tokens - 1.0).max(0.0);
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - *tokens) / rate).max(Duration::from_micros(100))
            };
            trace!(?wait, "token bucket depleted");
            tokio::time::sleep(wait).await;
        }
    }

    async fn acquire_fixed_window(&self) -> WorkResult<()> {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let LimiterState::FixedWindow {
                    window_start,
                    count,
                } = &mut *state
                else {
                    return Err(WorkError::InvalidState("limiter strategy changed".into()));
                };
                let now = Instant::now();
                while now.duration_since(*window_start) >= self.config.window {
                    *window_start += self.config.window;
                    *count = 0;
                }
                if *count < self.config.max_calls {
                    *count += 1;
                    return Ok(());
                }
                (*window_start + self.config.window).duration_since(now)
            };
            trace!(?wait, "fixed window exhausted");
            tokio::time::sleep(wait).await;
        }
    }

    async fn acquire_sliding_window(&self) -> WorkResult<()> {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let LimiterState::SlidingWindow { admissions } = &mut *state else {
                    return Err(WorkError::InvalidState("limiter strategy changed".into()));
                };
                let now = Instant::now();
                while admissions
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.config.window)
                {
                    admissions.pop_front();
                }
                if admissions.len() < self.config.max_calls as usize {
                    admissions.push_back(now);
                    return Ok(());
                }
                match admissions.front() {
                    Some(oldest) => (*oldest + self.config.window).duration_since(now),
                    None => Duration::ZERO,
                }
            };
            trace!(?wait, "sliding window full");
            tokio::time::sleep(wait).await;
        }
    }

    async fn acquire_leaky_bucket(&self) -> WorkResult<()> {
        let release_at = {
            let mut state = self.state.lock();
            let LimiterState::LeakyBucket {
                next_release,
                queued,
            } = &mut *state
            else {
                return Err(WorkError::InvalidState("limiter strategy changed".into()));
            };
            let max_queue = self
                .config
                .max_queue
                .unwrap_or(self.config.max_calls as usize * 4);
            if *queued >= max_queue {
                trace!(max_queue, "leaky bucket overflow");
                return Err(WorkError::RateLimited);
            }
            let now = Instant::now();
            let at = (*next_release).max(now);
            *next_release = at + self.config.interval();
            *queued += 1;
            at
        };
        tokio::time::sleep_until(release_at).await;
        if let LimiterState::LeakyBucket { queued, .. } = &mut *self.state.lock() {
            *queued = queued.saturating_sub(1);
        }
        Ok(())
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Rate-limit invocations with a dedicated limiter
    pub fn rate_limit(self, config: RateLimitConfig) -> Work<Args, R> {
        match RateLimiter::new(config) {
            Ok(limiter) => self.with_rate_limiter(Arc::new(limiter)),
            Err(err) => Work::config_error(err),
        }
    }

    /// Rate-limit invocations through a shared limiter
    pub fn with_rate_limiter(self, limiter: Arc<RateLimiter>) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let limiter = Arc::clone(&limiter);
            Box::pin(async move {
                limiter.acquire().await?;
                inner(args).await
            })
        })
    }
}
