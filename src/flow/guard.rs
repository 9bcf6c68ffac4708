//! Guard predicates around the call
//!
//! A pre-condition inspects the arguments before the inner runs; a
//! post-condition inspects the result before it is returned. A failing
//! predicate fails the call with [`WorkError::PredicateFailed`] carrying
//! the configured message.

use std::sync::Arc;

use crate::error::WorkError;
use crate::work::Work;

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Reject calls whose arguments fail `pred`
    pub fn pre_condition<P>(self, pred: P, message: impl Into<String>) -> Work<Args, R>
    where
        P: Fn(&Args) -> bool + Send + Sync + 'static,
    {
        let inner = self.runner();
        let pred = Arc::new(pred);
        let message = message.into();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let pred = Arc::clone(&pred);
            let message = message.clone();
            Box::pin(async move {
                if !pred(&args) {
                    return Err(WorkError::PredicateFailed(message));
                }
                inner(args).await
            })
        })
    }

    /// Reject results that fail `pred`
    pub fn post_condition<P>(self, pred: P, message: impl Into<String>) -> Work<Args, R>
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let inner = self.runner();
        let pred = Arc::new(pred);
        let message = message.into();
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let pred = Arc::clone(&pred);
            let message = message.clone();
            Box::pin(async move {
                let result = inner(args).await?;
                if !pred(&result) {
                    return Err(WorkError::PredicateFailed(message));
                }
                Ok(result)
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn divide() -> Work<(u32, u32), u32> {
        Work::from_fn2(|a: u32, b: u32| async move { Ok(a / b) })
    }

    #[tokio::test]
    async fn test_pre_condition_blocks_bad_args() {
        let work = divide().pre_condition(|(_, b)| *b != 0, "divisor must be non-zero");
        assert_eq!(work.call(10, 2).await.unwrap(), 5);

        let err = work.call(10, 0).await.unwrap_err();
        assert!(matches!(err, WorkError::PredicateFailed(ref m) if m.contains("divisor")));
    }

    #[tokio::test]
    async fn test_post_condition_blocks_bad_results() {
        let work = divide().post_condition(|q| *q > 0, "quotient must be positive");
        assert_eq!(work.call(10, 2).await.unwrap(), 5);
        assert!(matches!(
            work.call(1, 2).await.unwrap_err(),
            WorkError::PredicateFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_inner_error_skips_post_condition() {
        let work: Work<(), u32> = Work::from_fn(|| async { Err(WorkError::msg("inner")) })
            .post_condition(|_| true, "unused");
        assert!(work.call().await.unwrap_err().is_user());
    }
}
