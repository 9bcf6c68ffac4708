//! Backoff strategies: attempt number to delay
//!
//! Strategies are consulted by the retry decorator between attempts. Attempt
//! numbers are 1-based: `delay(1)` is the sleep after the first failed
//! attempt. All strategies except [`DecorrelatedJitterBackoff`] are pure;
//! the jitter strategy carries the previously produced delay and offers
//! [`Backoff::reset`] to clear it.

use std::time::Duration;

use parking_lot::Mutex;

/// Maps a 1-based attempt number to the delay before the next attempt
pub trait Backoff: Send + Sync {
    /// Delay to sleep after the given failed attempt
    fn delay(&self, attempt: u32) -> Duration;

    /// Clear any carried state; a no-op for stateless strategies
    fn reset(&self) {}
}

/// Closures work directly as stateless custom strategies
impl<F> Backoff for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

fn cap(delay: Duration, max_delay: Option<Duration>) -> Duration {
    match max_delay {
        Some(max) => delay.min(max),
        None => delay,
    }
}

/// Same delay every attempt
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff {
    /// Delay between attempts
    pub delay: Duration,
}

impl ConstantBackoff {
    /// Create a constant backoff
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ConstantBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Delay grows by a fixed increment per attempt
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    /// Delay after the first failed attempt
    pub initial: Duration,
    /// Added per subsequent attempt
    pub increment: Duration,
    /// Upper bound on the computed delay
    pub max_delay: Option<Duration>,
}

impl LinearBackoff {
    /// Create a linear backoff with no cap
    pub fn new(initial: Duration, increment: Duration) -> Self {
        Self {
            initial,
            increment,
            max_delay: None,
        }
    }

    /// Cap the computed delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        let grown = self
            .initial
            .saturating_add(self.increment.saturating_mul(steps));
        cap(grown, self.max_delay)
    }
}

/// Delay multiplies per attempt: `initial * multiplier^(attempt - 1)`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Delay after the first failed attempt
    pub initial: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Upper bound on the computed delay
    pub max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    /// Create an exponential backoff with the default multiplier of 2.0
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max_delay: None,
        }
    }

    /// Override the growth factor
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Cap the computed delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100)).with_max_delay(Duration::from_secs(5))
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exp as i32);
        let grown = if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        };
        cap(grown, self.max_delay)
    }
}

/// Delay follows the Fibonacci sequence scaled by a base: `base * F(attempt)`
/// with `F(1) = F(2) = 1`
#[derive(Debug, Clone, Copy)]
pub struct FibonacciBackoff {
    /// Scaling unit
    pub base: Duration,
    /// Upper bound on the computed delay
    pub max_delay: Option<Duration>,
}

impl FibonacciBackoff {
    /// Create a Fibonacci backoff with no cap
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max_delay: None,
        }
    }

    /// Cap the computed delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl Backoff for FibonacciBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let mut prev: u64 = 1;
        let mut curr: u64 = 1;
        for _ in 2..attempt.max(1) {
            let next = prev.saturating_add(curr);
            prev = curr;
            curr = next;
        }
        cap(self.base.saturating_mul(curr.min(u32::MAX as u64) as u32), self.max_delay)
    }
}

/// Decorrelated jitter: `uniform(base, max(base + 1ms, 3 * previous))`
///
/// Each produced delay feeds the next range, which decorrelates retry storms
/// across callers. State-carrying; `reset()` forgets the previous delay.
pub struct DecorrelatedJitterBackoff {
    /// Lower bound of every draw
    pub base: Duration,
    /// Upper bound on the computed delay
    pub max_delay: Option<Duration>,
    previous: Mutex<Option<Duration>>,
}

impl DecorrelatedJitterBackoff {
    /// Create a decorrelated jitter backoff with no cap
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max_delay: None,
            previous: Mutex::new(None),
        }
    }

    /// Cap the computed delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl Backoff for DecorrelatedJitterBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        let mut previous = self.previous.lock();
        let prev = previous.unwrap_or(self.base);
        let lo = self.base.as_secs_f64();
        let hi = (prev.as_secs_f64() * 3.0).max(lo + 0.001);
        let drawn = lo + fastrand::f64() * (hi - lo);
        let delay = cap(
            Duration::try_from_secs_f64(drawn).unwrap_or(Duration::MAX),
            self.max_delay,
        );
        *previous = Some(delay);
        delay
    }

    fn reset(&self) {
        *self.previous.lock() = None;
    }
}
