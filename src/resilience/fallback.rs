//! Fallback on failure
//!
//! Substitutes a configured constant or a fallback function's result when
//! the inner call fails. Exactly one source is configured; the constructors
//! make the choice. A `when` predicate gates which errors trigger the
//! fallback, and non-matching errors propagate untouched.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

type FallbackFn<Args, R> =
    Arc<dyn Fn(Args) -> BoxFuture<'static, WorkResult<R>> + Send + Sync>;

enum Source<Args, R> {
    Value(R),
    Function(FallbackFn<Args, R>),
}

impl<Args, R: Clone> Clone for Source<Args, R> {
    fn clone(&self) -> Self {
        match self {
            Source::Value(v) => Source::Value(v.clone()),
            Source::Function(f) => Source::Function(Arc::clone(f)),
        }
    }
}

/// Fallback source plus gating configuration
pub struct Fallback<Args, R> {
    source: Source<Args, R>,
    fallback_if: Option<Arc<dyn Fn(&WorkError) -> bool + Send + Sync>>,
    on_fallback: Option<Arc<dyn Fn(&WorkError) + Send + Sync>>,
}

impl<Args, R: Clone> Clone for Fallback<Args, R> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            fallback_if: self.fallback_if.clone(),
            on_fallback: self.on_fallback.clone(),
        }
    }
}

impl<Args, R> Fallback<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Fall back to a constant value
    pub fn value(value: R) -> Self {
        Self {
            source: Source::Value(value),
            fallback_if: None,
            on_fallback: None,
        }
    }

    /// Fall back to a function receiving the original arguments
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        Self {
            source: Source::Function(Arc::new(move |args| f(args).boxed())),
            fallback_if: None,
            on_fallback: None,
        }
    }

    /// Only fall back for errors matching `pred`
    pub fn when<P>(mut self, pred: P) -> Self
    where
        P: Fn(&WorkError) -> bool + Send + Sync + 'static,
    {
        self.fallback_if = Some(Arc::new(pred));
        self
    }

    /// Observe the error just before the fallback is produced
    pub fn on_fallback<C>(mut self, callback: C) -> Self
    where
        C: Fn(&WorkError) + Send + Sync + 'static,
    {
        self.on_fallback = Some(Arc::new(callback));
        self
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Substitute `fallback` when the inner call fails
    pub fn fallback(self, fallback: Fallback<Args, R>) -> Work<Args, R> {
        let inner = self.runner();
        let fallback = Arc::new(fallback);
        Work::wrap(move |args: Args| {
            let inner = Arc::clone(&inner);
            let fallback = Arc::clone(&fallback);
            Box::pin(async move {
                match inner(args.clone()).await {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        let applies =
                            fallback.fallback_if.as_ref().map_or(true, |pred| pred(&err));
                        if !applies {
                            return Err(err);
                        }
                        if let Some(cb) = &fallback.on_fallback {
                            cb(&err);
                        }
                        match &fallback.source {
                            Source::Value(v) => Ok(v.clone()),
                            Source::Function(f) => f(args).await,
                        }
                    }
                }
            })
        })
    }
}
