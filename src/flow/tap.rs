//! Observability taps
//!
//! Callbacks observing the call stream without ever altering it: the
//! arguments going in, and the success or failure coming out. Sinks for
//! metrics and audit logs hang off these hooks.

use std::sync::Arc;

use crate::error::WorkError;
use crate::work::Work;

/// Observation hooks
#[derive(Clone)]
pub struct Tap<Args, R> {
    on_call: Option<Arc<dyn Fn(&Args) + Send + Sync>>,
    on_success: Option<Arc<dyn Fn(&R) + Send + Sync>>,
    on_failure: Option<Arc<dyn Fn(&WorkError) + Send + Sync>>,
}

impl<Args, R> Default for Tap<Args, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args, R> Tap<Args, R> {
    /// No hooks
    pub fn new() -> Self {
        Self {
            on_call: None,
            on_success: None,
            on_failure: None,
        }
    }

    /// Observe the arguments of every invocation
    pub fn on_call<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.on_call = Some(Arc::new(hook));
        self
    }

    /// Observe every successful result
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&R) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Observe every failure
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Attach observation hooks; the outcome is never changed
    pub fn tap(self, tap: Tap<Args, R>) -> Work<Args, R> {
        let inner = self.runner();
        let tap = Arc::new(tap);
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let tap = Arc::clone(&tap);
            Box::pin(async move {
                if let Some(hook) = &tap.on_call {
                    hook(&args);
                }
                let result = inner(args).await;
                match &result {
                    Ok(value) => {
                        if let Some(hook) = &tap.on_success {
                            hook(value);
                        }
                    }
                    Err(err) => {
                        if let Some(hook) = &tap.on_failure {
                            hook(err);
                        }
                    }
                }
                result
            })
        })
    }
}
