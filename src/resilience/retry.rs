//! Retry with pluggable backoff
//!
//! Re-invokes the inner call up to `max_attempts` times, sleeping between
//! attempts per the configured [`Backoff`] strategy. Attempts are 1-based;
//! `max_attempts = 1` disables retrying. After the attempts are exhausted
//! the last error propagates unchanged.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Retry parameters
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first (must be at least 1)
    pub max_attempts: u32,
    /// Strategy mapping a failed attempt to the sleep before the next
    pub backoff: Arc<dyn Backoff>,
    /// Gates which errors are retried; `None` retries everything
    pub retry_if: Option<Arc<dyn Fn(&WorkError) -> bool + Send + Sync>>,
    /// Invoked with the 1-based failed attempt and its error, before the sleep
    pub on_retry: Option<Arc<dyn Fn(u32, &WorkError) + Send + Sync>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Arc::new(ExponentialBackoff::default()),
            retry_if: None,
            on_retry: None,
        }
    }
}

impl RetryConfig {
    /// Retry up to `max_attempts` with a fixed delay between attempts
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Arc::new(crate::backoff::ConstantBackoff::new(delay)),
            ..Self::default()
        }
    }

    /// Replace the backoff strategy
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Only retry errors matching `pred`
    pub fn retry_if<P>(mut self, pred: P) -> Self
    where
        P: Fn(&WorkError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(pred));
        self
    }

    /// Observe each retry before its backoff sleep
    pub fn on_retry<C>(mut self, callback: C) -> Self
    where
        C: Fn(u32, &WorkError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    fn validate(&self) -> WorkResult<()> {
        if self.max_attempts < 1 {
            return Err(WorkError::Config("retry max_attempts must be >= 1".into()));
        }
        Ok(())
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Re-attempt failed invocations per `config`
    pub fn retry(self, config: RetryConfig) -> Work<Args, R> {
        if let Err(err) = config.validate() {
            return Work::config_error(err);
        }
        let inner = self.runner();
        Work::wrap(move |args: Args| {
            let inner = Arc::clone(&inner);
            let config = config.clone();
            Box::pin(async move {
                let mut attempt: u32 = 1;
                loop {
                    match inner(args.clone()).await {
                        Ok(value) => return Ok(value),
                        Err(err) => {
                            let retryable =
                                config.retry_if.as_ref().map_or(true, |pred| pred(&err));
                            if !retryable || attempt >= config.max_attempts {
                                return Err(err);
                            }
                            if let Some(cb) = &config.on_retry {
                                cb(attempt, &err);
                            }
                            let delay = config.backoff.delay(attempt);
                            debug!(attempt, ?delay, error = %err, "retrying after failure");
                            sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
            })
        })
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// A work that fails every call with the given construction error
    pub(crate) fn config_error(err: WorkError) -> Work<Args, R> {
        Work::wrap(move |_args| {
            let err = err.clone();
            Box::pin(async move { Err(err) })
        })
    }
}
