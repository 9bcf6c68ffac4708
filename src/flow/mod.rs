//! Flow-control decorators
//!
//! Admission and interception around decorated work:
//! - [`BackpressureScheduler`]: bound concurrency with configurable
//!   shedding strategies
//! - [`pre_condition`](crate::work::Work::pre_condition) /
//!   [`post_condition`](crate::work::Work::post_condition): guard
//!   predicates around the call
//! - [`validate`](crate::work::Work::validate): argument validators with
//!   fail-fast or accumulating evaluation
//! - [`proxy`](crate::work::Work::proxy): before/transform/after/error
//!   interception hooks
//! - [`SwitchBuilder`]: dispatch among several works by a selector
//! - [`repeat`](crate::work::Work::repeat): bounded re-invocation with an
//!   optional stop predicate
//! - [`tap`](crate::work::Work::tap): observability callbacks that never
//!   change the outcome
//! - [`catch_if`](crate::work::Work::catch_if) /
//!   [`or_default`](crate::work::Work::or_default): opt-in error handling

pub mod backpressure;
pub mod catch;
pub mod guard;
pub mod proxy;
pub mod repeat;
pub mod switch;
pub mod tap;
pub mod validate;

pub use backpressure::{BackpressureConfig, BackpressureScheduler, BackpressureStrategy};
pub use proxy::ProxyConfig;
pub use repeat::RepeatConfig;
pub use switch::SwitchBuilder;
pub use tap::Tap;
pub use validate::{ValidateConfig, ValidationMode};
