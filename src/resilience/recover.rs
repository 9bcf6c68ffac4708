//! Recovery actions on failure
//!
//! Runs an async cleanup action (reconnect, reset external state) when the
//! inner call fails. Recovery restores the world, it does not substitute a
//! value: with `rethrow_after_recovery` (the default) the original error
//! still propagates, and without it the call fails with a state error
//! because there is nothing to return. Use fallback for substitution.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

type RecoveryAction =
    Arc<dyn Fn(WorkError) -> BoxFuture<'static, WorkResult<()>> + Send + Sync>;

/// Recovery parameters
#[derive(Clone)]
pub struct RecoverConfig {
    action: RecoveryAction,
    should_recover: Option<Arc<dyn Fn(&WorkError) -> bool + Send + Sync>>,
    rethrow_after_recovery: bool,
}

impl RecoverConfig {
    /// Recover with `action`, rethrowing the original error afterwards
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn(WorkError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<()>> + Send + 'static,
    {
        Self {
            action: Arc::new(move |err| action(err).boxed()),
            should_recover: None,
            rethrow_after_recovery: true,
        }
    }

    /// Only run recovery for errors matching `pred`
    pub fn when<P>(mut self, pred: P) -> Self
    where
        P: Fn(&WorkError) -> bool + Send + Sync + 'static,
    {
        self.should_recover = Some(Arc::new(pred));
        self
    }

    /// Suppress the rethrow; the call then fails with a state error
    pub fn swallow_error(mut self) -> Self {
        self.rethrow_after_recovery = false;
        self
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Run a recovery action when the inner call fails
    pub fn recover(self, config: RecoverConfig) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let config = config.clone();
            Box::pin(async move {
                match inner(args).await {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        let applies = config
                            .should_recover
                            .as_ref()
                            .map_or(true, |pred| pred(&err));
                        if !applies {
                            return Err(err);
                        }
                        if let Err(recovery_err) = (config.action)(err.clone()).await {
                            warn!(error = %recovery_err, "recovery action failed");
                        }
                        if config.rethrow_after_recovery {
                            Err(err)
                        } else {
                            Err(WorkError::InvalidState(
                                "recovery completed but produced no value".into(),
                            ))
                        }
                    }
                }
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_recovery_runs_and_rethrows_original() {
        let recoveries = Arc::new(AtomicU32::new(0));
        let r = recoveries.clone();
        let work = Work::from_fn(|| async { Err::<u32, _>(WorkError::msg("broken pipe")) })
            .recover(RecoverConfig::new(move |_err| {
                let r = r.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        let err = work.call().await.unwrap_err();
        assert_eq!(err.to_string(), "broken pipe");
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_skips_recovery() {
        let recoveries = Arc::new(AtomicU32::new(0));
        let r = recoveries.clone();
        let work = Work::from_fn(|| async { Ok(1) }).recover(RecoverConfig::new(move |_err| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        work.call().await.unwrap();
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_predicate_gates_recovery() {
        let recoveries = Arc::new(AtomicU32::new(0));
        let r = recoveries.clone();
        let work = Work::from_fn(|| async { Err::<u32, _>(WorkError::msg("user error")) })
            .recover(
                RecoverConfig::new(move |_err| {
                    let r = r.clone();
                    async move {
                        r.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .when(|err| matches!(err, WorkError::Timeout)),
            );
        work.call().await.unwrap_err();
        assert_eq!(recoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_swallowed_error_becomes_state_error() {
        let work = Work::from_fn(|| async { Err::<u32, _>(WorkError::msg("gone")) })
            .recover(RecoverConfig::new(|_err| async { Ok(()) }).swallow_error());
        assert!(matches!(
            work.call().await.unwrap_err(),
            WorkError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_recovery_still_rethrows_original() {
        let work = Work::from_fn(|| async { Err::<u32, _>(WorkError::msg("original")) })
            .recover(RecoverConfig::new(|_err| async {
                Err(WorkError::msg("recovery broke too"))
            }));
        assert_eq!(work.call().await.unwrap_err().to_string(), "original");
    }
}
