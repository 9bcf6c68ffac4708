//! Selector-based dispatch among several works
//!
//! A selector maps the arguments to an arm key; the matching arm handles
//! the call. With no matching arm and no default, the call fails with a
//! predicate error naming the selector value.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::WorkError;
use crate::work::{Work, WorkFn};

/// Builder for a dispatching work
pub struct SwitchBuilder<Args, R, K> {
    selector: Arc<dyn Fn(&Args) -> K + Send + Sync>,
    arms: HashMap<K, WorkFn<Args, R>>,
    default: Option<WorkFn<Args, R>>,
}

impl<Args, R, K> SwitchBuilder<Args, R, K>
where
    Args: Send + 'static,
    R: Send + 'static,
    K: Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Start a switch over the given selector
    pub fn new<S>(selector: S) -> Self
    where
        S: Fn(&Args) -> K + Send + Sync + 'static,
    {
        Self {
            selector: Arc::new(selector),
            arms: HashMap::new(),
            default: None,
        }
    }

    /// Route selector value `key` to `work`
    pub fn arm(mut self, key: K, work: Work<Args, R>) -> Self {
        self.arms.insert(key, work.runner());
        self
    }

    /// Route unmatched selector values to `work`
    pub fn default(mut self, work: Work<Args, R>) -> Self {
        self.default = Some(work.runner());
        self
    }

    /// Produce the dispatching work
    pub fn build(self) -> Work<Args, R> {
        let selector = self.selector;
        let arms = Arc::new(self.arms);
        let default = self.default;
        Work::wrap(move |args| {
            let key = selector(&args);
            match arms.get(&key).or(default.as_ref()) {
                Some(run) => run(args),
                None => Box::pin(async move {
                    Err(WorkError::PredicateFailed(format!(
                        "no switch arm for selector value {key:?}"
                    )))
                }),
            }
        })
    }
}
