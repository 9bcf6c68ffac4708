//! Bounded re-invocation
//!
//! Runs the inner up to `times` iterations, optionally sleeping between
//! them and stopping early when an `until` predicate accepts a result. Any
//! iteration error propagates immediately; the final iteration's result is
//! returned.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Repeat parameters
pub struct RepeatConfig<R> {
    /// Iteration bound (must be at least 1)
    pub times: u32,
    /// Sleep between iterations
    pub interval: Option<Duration>,
    /// Stop early once a result satisfies the predicate
    pub until: Option<Arc<dyn Fn(&R) -> bool + Send + Sync>>,
    /// Invoked with the 1-based iteration and its result
    pub on_iteration: Option<Arc<dyn Fn(u32, &R) + Send + Sync>>,
}

impl<R> Clone for RepeatConfig<R> {
    fn clone(&self) -> Self {
        Self {
            times: self.times,
            interval: self.interval,
            until: self.until.clone(),
            on_iteration: self.on_iteration.clone(),
        }
    }
}

impl<R> RepeatConfig<R> {
    /// Repeat `times` iterations back to back
    pub fn new(times: u32) -> Self {
        Self {
            times,
            interval: None,
            until: None,
            on_iteration: None,
        }
    }

    /// Sleep `interval` between iterations
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Stop once `pred` accepts a result
    pub fn until<P>(mut self, pred: P) -> Self
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.until = Some(Arc::new(pred));
        self
    }

    /// Observe each iteration
    pub fn on_iteration<C>(mut self, callback: C) -> Self
    where
        C: Fn(u32, &R) + Send + Sync + 'static,
    {
        self.on_iteration = Some(Arc::new(callback));
        self
    }

    fn validate(&self) -> WorkResult<()> {
        if self.times < 1 {
            return Err(WorkError::Config("repeat times must be >= 1".into()));
        }
        Ok(())
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Re-invoke the inner per `config`, returning the last result
    pub fn repeat(self, config: RepeatConfig<R>) -> Work<Args, R> {
        if let Err(err) = config.validate() {
            return Work::config_error(err);
        }
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let config = config.clone();
            Box::pin(async move {
                let mut last = None;
                for iteration in 1..=config.times {
                    let result = inner(args.clone()).await?;
                    if let Some(cb) = &config.on_iteration {
                        cb(iteration, &result);
                    }
                    let satisfied = config.until.as_ref().is_some_and(|pred| pred(&result));
                    last = Some(result);
                    if satisfied {
                        break;
                    }
                    if iteration < config.times {
                        if let Some(interval) = config.interval {
                            sleep(interval).await;
                        }
                    }
                }
                last.ok_or_else(|| WorkError::InvalidState("repeat ran zero iterations".into()))
            })
        })
    }
}
