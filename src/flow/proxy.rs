//! Call interception
//!
//! Hooks around the inner call without changing its semantics: observe the
//! arguments, rewrite them, rewrite the result, and observe errors. Hooks
//! that are not configured cost nothing.

use std::sync::Arc;

use crate::error::WorkError;
use crate::work::Work;

/// Interception hooks
#[derive(Clone)]
pub struct ProxyConfig<Args, R> {
    before_call: Option<Arc<dyn Fn(&Args) + Send + Sync>>,
    transform_args: Option<Arc<dyn Fn(Args) -> Args + Send + Sync>>,
    after_call: Option<Arc<dyn Fn(R) -> R + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&WorkError) + Send + Sync>>,
}

impl<Args, R> Default for ProxyConfig<Args, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args, R> ProxyConfig<Args, R> {
    /// No hooks
    pub fn new() -> Self {
        Self {
            before_call: None,
            transform_args: None,
            after_call: None,
            on_error: None,
        }
    }

    /// Observe arguments before the call
    pub fn before_call<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.before_call = Some(Arc::new(hook));
        self
    }

    /// Rewrite arguments before the call
    pub fn transform_args<F>(mut self, hook: F) -> Self
    where
        F: Fn(Args) -> Args + Send + Sync + 'static,
    {
        self.transform_args = Some(Arc::new(hook));
        self
    }

    /// Rewrite the successful result
    pub fn after_call<F>(mut self, hook: F) -> Self
    where
        F: Fn(R) -> R + Send + Sync + 'static,
    {
        self.after_call = Some(Arc::new(hook));
        self
    }

    /// Observe errors
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Intercept calls with the configured hooks
    pub fn proxy(self, config: ProxyConfig<Args, R>) -> Work<Args, R> {
        let inner = self.runner();
        let config = Arc::new(config);
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let config = Arc::clone(&config);
            Box::pin(async move {
                if let Some(hook) = &config.before_call {
                    hook(&args);
                }
                let args = match &config.transform_args {
                    Some(hook) => hook(args),
                    None => args,
                };
                match inner(args).await {
                    Ok(result) => Ok(match &config.after_call {
                        Some(hook) => hook(result),
                        None => result,
                    }),
                    Err(err) => {
                        if let Some(hook) = &config.on_error {
                            hook(&err);
                        }
                        Err(err)
                    }
                }
            })
        })
    }
}
