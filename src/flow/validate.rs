//! Argument validation
//!
//! Runs a list of validators over the arguments before the inner call. In
//! fail-fast mode the first error stops evaluation; in accumulate mode all
//! validators run and their errors are aggregated into one failure.

use std::sync::Arc;

use crate::error::WorkError;
use crate::work::Work;

/// How validator errors are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Stop at the first error
    #[default]
    FailFast,
    /// Run every validator and aggregate all errors
    Accumulate,
}

type Validator<Args> = Arc<dyn Fn(&Args) -> Option<String> + Send + Sync>;
type ValidationErrorCallback = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Validation parameters
#[derive(Clone)]
pub struct ValidateConfig<Args> {
    validators: Vec<Validator<Args>>,
    mode: ValidationMode,
    on_validation_error: Option<ValidationErrorCallback>,
}

impl<Args> Default for ValidateConfig<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args> ValidateConfig<Args> {
    /// Empty fail-fast configuration
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
            mode: ValidationMode::FailFast,
            on_validation_error: None,
        }
    }

    /// Append a validator returning `Some(message)` on rejection
    pub fn with<V>(mut self, validator: V) -> Self
    where
        V: Fn(&Args) -> Option<String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Select the collection mode
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Observe the collected errors just before the call fails
    pub fn on_validation_error<C>(mut self, callback: C) -> Self
    where
        C: Fn(&[String]) + Send + Sync + 'static,
    {
        self.on_validation_error = Some(Arc::new(callback));
        self
    }

    fn run(&self, args: &Args) -> Vec<String> {
        let mut errors = Vec::new();
        for validator in &self.validators {
            if let Some(message) = validator(args) {
                errors.push(message);
                if self.mode == ValidationMode::FailFast {
                    break;
                }
            }
        }
        errors
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Send + 'static,
{
    /// Validate arguments before the inner call
    pub fn validate(self, config: ValidateConfig<Args>) -> Work<Args, R> {
        let inner = self.runner();
        let config = Arc::new(config);
        Work::wrap(move |args| {
            let inner = Arc::clone(&inner);
            let config = Arc::clone(&config);
            Box::pin(async move {
                let errors = config.run(&args);
                if !errors.is_empty() {
                    if let Some(cb) = &config.on_validation_error {
                        cb(&errors);
                    }
                    return Err(WorkError::PredicateFailed(errors.join("; ")));
                }
                inner(args).await
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn register() -> Work<(String, u32), String> {
        Work::from_fn2(|name: String, age: u32| async move { Ok(format!("{name}:{age}")) })
    }

    fn name_and_age_rules() -> ValidateConfig<(String, u32)> {
        ValidateConfig::new()
            .with(|(name, _): &(String, u32)| {
                name.is_empty().then(|| "name must not be empty".to_string())
            })
            .with(|(_, age): &(String, u32)| (*age > 150).then(|| "age is implausible".to_string()))
    }

    #[tokio::test]
    async fn test_valid_args_pass_through() {
        let work = register().validate(name_and_age_rules());
        assert_eq!(work.call("ada".into(), 36).await.unwrap(), "ada:36");
    }

    #[tokio::test]
    async fn test_fail_fast_reports_first_error_only() {
        let work = register().validate(name_and_age_rules());
        let err = work.call(String::new(), 200).await.unwrap_err();
        match err {
            WorkError::PredicateFailed(message) => {
                assert!(message.contains("name"));
                assert!(!message.contains("age"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accumulate_reports_all_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let work = register().validate(
            name_and_age_rules()
                .with_mode(ValidationMode::Accumulate)
                .on_validation_error(move |errors| s.lock().extend(errors.to_vec())),
        );
        let err = work.call(String::new(), 200).await.unwrap_err();
        match err {
            WorkError::PredicateFailed(message) => {
                assert!(message.contains("name"));
                assert!(message.contains("age"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(seen.lock().len(), 2);
    }
}
