//! Opt-in error handling
//!
//! Decorators never swallow errors implicitly; these wrappers opt in.
//! `catch_if` maps matching errors through a handler that may substitute a
//! result or rethrow; the default-value wrappers substitute a configured or
//! `Default`-provided value.

use std::sync::Arc;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Map every error through `handler`
    pub fn catch<H>(self, handler: H) -> Work<Args, R>
    where
        H: Fn(WorkError) -> WorkResult<R> + Send + Sync + 'static,
    {
        self.catch_if(|_| true, handler)
    }

    /// Map errors matching `pred` through `handler`; others propagate
    pub fn catch_if<P, H>(self, pred: P, handler: H) -> Work<Args, R>
    where
        P: Fn(&WorkError) -> bool + Send + Sync + 'static,
        H: Fn(WorkError) -> WorkResult<R> + Send + Sync + 'static,
    {
        let inner = self.runner();
        let pred = Arc::new(pred);
        let handler = Arc::new(handler);
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let pred = Arc::clone(&pred);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                match inner(args).await {
                    Ok(value) => Ok(value),
                    Err(err) if pred(&err) => handler(err),
                    Err(err) => Err(err),
                }
            })
        })
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Substitute `value` for any failure
    pub fn default_value(self, value: R) -> Work<Args, R> {
        self.default_value_if(value, |_| true)
    }

    /// Substitute `value` for failures matching `pred`; others propagate
    pub fn default_value_if<P>(self, value: R, pred: P) -> Work<Args, R>
    where
        P: Fn(&WorkError) -> bool + Send + Sync + 'static,
    {
        self.catch_if(pred, move |_err| Ok(value.clone()))
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Default + Send + 'static,
{
    /// Substitute `R::default()` for any failure
    pub fn or_default(self) -> Work<Args, R> {
        self.catch(|_err| Ok(R::default()))
    }
}
