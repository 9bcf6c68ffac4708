//! Bounded waiting on the inner call
//!
//! Races the inner computation against a timer. The runtime never preempts
//! user code: when the timer wins, the inner future is dropped and stops at
//! its next suspension point.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Fail with [`WorkError::Timeout`] if the call outlasts `duration`
    pub fn timeout(self, duration: Duration) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                match tokio::time::timeout(duration, inner(args)).await {
                    Ok(result) => result,
                    Err(_) => {
                        trace!(?duration, "call timed out");
                        Err(WorkError::Timeout)
                    }
                }
            })
        })
    }

    /// Resolve via `on_timeout` if the call outlasts `duration`
    ///
    /// The handler may substitute a result or rethrow its own error.
    pub fn timeout_with<H>(self, duration: Duration, on_timeout: H) -> Work<Args, R>
    where
        H: Fn() -> WorkResult<R> + Send + Sync + 'static,
    {
        let inner = self.runner();
        let on_timeout = Arc::new(on_timeout);
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let on_timeout = Arc::clone(&on_timeout);
            Box::pin(async move {
                match tokio::time::timeout(duration, inner(args)).await {
                    Ok(result) => result,
                    Err(_) => on_timeout(),
                }
            })
        })
    }
}
