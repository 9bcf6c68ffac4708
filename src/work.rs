//! The `Work` wrapper: a callable, decoratable unit of async work
//!
//! A [`Work`] wraps an async function of arity 0, 1, or 2 producing a
//! [`WorkResult`]. Decorators are methods that consume the wrapper and return
//! a new one of the same arity and result type, so behaviour is layered by
//! plain method chaining:
//!
//! ```no_run
//! use std::time::Duration;
//! use workforge::{Work, WorkError};
//! use workforge::resilience::RetryConfig;
//!
//! # async fn example() {
//! let fetch = Work::from_fn1(|url: String| async move {
//!     Err::<String, _>(WorkError::msg(format!("unreachable: {url}")))
//! })
//! .retry(RetryConfig::default())
//! .timeout(Duration::from_secs(5));
//!
//! let _ = fetch.call("https://example.com".to_string()).await;
//! # }
//! ```
//!
//! Call nesting follows construction order: the decorator applied last runs
//! first on the way in and last on the way out.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::WorkResult;

/// Shared runner behind a [`Work`]
pub(crate) type WorkFn<Args, R> =
    Arc<dyn Fn(Args) -> BoxFuture<'static, WorkResult<R>> + Send + Sync>;

/// A callable wrapper around an async computation
///
/// `Args` is the argument tuple: `()`, `(A,)`, or `(A, B)`. Each invocation is
/// an independent attempt unless an enclosing decorator shares or caches.
/// Cloning is cheap and both clones dispatch to the same inner callable and
/// decorator state.
pub struct Work<Args, R> {
    run: WorkFn<Args, R>,
}

/// Arity-0 work
pub type Work0<R> = Work<(), R>;
/// Arity-1 work
pub type Work1<A, R> = Work<(A,), R>;
/// Arity-2 work
pub type Work2<A, B, R> = Work<(A, B), R>;

impl<Args, R> Clone for Work<Args, R> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<Args, R> std::fmt::Debug for Work<Args, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Work").finish_non_exhaustive()
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Wrap a raw runner closure
    pub(crate) fn wrap<F>(f: F) -> Self
    where
        F: Fn(Args) -> BoxFuture<'static, WorkResult<R>> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }

    /// Invoke with the full argument tuple
    pub async fn invoke(&self, args: Args) -> WorkResult<R> {
        (self.run)(args).await
    }

    /// Hand out the shared runner, for decorators that re-dispatch
    pub(crate) fn runner(&self) -> WorkFn<Args, R> {
        Arc::clone(&self.run)
    }
}

impl<R> Work<(), R>
where
    R: Send + 'static,
{
    /// Create an arity-0 work from an async closure
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        Self::wrap(move |()| f().boxed())
    }

    /// Invoke the work
    pub async fn call(&self) -> WorkResult<R> {
        self.invoke(()).await
    }
}

impl<A, R> Work<(A,), R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Create an arity-1 work from an async closure
    pub fn from_fn1<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        Self::wrap(move |(a,)| f(a).boxed())
    }

    /// Invoke the work with its argument
    pub async fn call(&self, a: A) -> WorkResult<R> {
        self.invoke((a,)).await
    }
}

impl<A, B, R> Work<(A, B), R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    /// Create an arity-2 work from an async closure
    pub fn from_fn2<F, Fut>(f: F) -> Self
    where
        F: Fn(A, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        Self::wrap(move |(a, b)| f(a, b).boxed())
    }

    /// Invoke the work with its arguments
    pub async fn call(&self, a: A, b: B) -> WorkResult<R> {
        self.invoke((a, b)).await
    }
}
