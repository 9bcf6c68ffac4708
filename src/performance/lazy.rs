//! Deferred construction of the inner callable
//!
//! The builder runs on first invocation, not at wrap time. Results are not
//! cached: every call after construction dispatches to the built work
//! normally. Useful when assembling the inner callable is itself expensive.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::work::{Work, WorkFn};

struct LazyCell<Args, R> {
    build: Option<Box<dyn FnOnce() -> Work<Args, R> + Send>>,
    built: Option<WorkFn<Args, R>>,
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Build the inner work on first call
    pub fn lazy<F>(build: F) -> Work<Args, R>
    where
        F: FnOnce() -> Work<Args, R> + Send + 'static,
    {
        let cell = Arc::new(Mutex::new(LazyCell {
            build: Some(Box::new(build)),
            built: None,
        }));
        Work::wrap(move |args| {
            let run = {
                let mut cell = cell.lock();
                if cell.built.is_none() {
                    if let Some(build) = cell.build.take() {
                        cell.built = Some(build().runner());
                    }
                }
                cell.built.clone()
            };
            match run {
                Some(run) => run(args),
                None => Box::pin(async {
                    Err(crate::error::WorkError::InvalidState(
                        "lazy builder produced no work".into(),
                    ))
                }),
            }
        })
    }
}
