//! Fixed delays around the inner call

use std::time::Duration;

use tokio::time::sleep;

use crate::work::Work;

/// Where the delay is applied relative to the inner call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayMode {
    /// Sleep, then run
    #[default]
    Before,
    /// Run, then sleep before resolving
    After,
    /// Sleep on both sides
    Both,
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Sleep for `duration` before each invocation
    pub fn delay(self, duration: Duration) -> Work<Args, R> {
        self.delay_with(duration, DelayMode::Before)
    }

    /// Sleep for `duration` per `mode` around each invocation
    ///
    /// The delay is a single suspension point: cancelling the caller
    /// abandons both the sleep and the wrapped call.
    pub fn delay_with(self, duration: Duration, mode: DelayMode) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = std::sync::Arc::clone(&inner);
            Box::pin(async move {
                if matches!(mode, DelayMode::Before | DelayMode::Both) {
                    sleep(duration).await;
                }
                let result = inner(args).await;
                if matches!(mode, DelayMode::After | DelayMode::Both) {
                    sleep(duration).await;
                }
                result
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_delay_before() {
        let work = Work::from_fn(|| async { Ok(1) }).delay(Duration::from_millis(100));
        let start = Instant::now();
        work.call().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_both_doubles_wait() {
        let work = Work::from_fn(|| async { Ok(1) })
            .delay_with(Duration::from_millis(50), DelayMode::Both);
        let start = Instant::now();
        work.call().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_after_runs_inner_first() {
        let work = Work::from_fn(|| async { Ok(Instant::now()) })
            .delay_with(Duration::from_millis(80), DelayMode::After);
        let start = Instant::now();
        let ran_at = work.call().await.unwrap();
        assert!(ran_at.duration_since(start) < Duration::from_millis(1));
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
