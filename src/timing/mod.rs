//! Timing decorators
//!
//! Temporal reshaping of call streams:
//! - [`debounce`](crate::work::Work::debounce): coalesce bursts, firing once
//!   per quiet period
//! - [`throttle`](crate::work::Work::throttle): admit at most one execution
//!   per window
//! - [`delay`](crate::work::Work::delay): pause before and/or after the call
//! - [`timeout`](crate::work::Work::timeout): bound how long a call is
//!   awaited

pub mod debounce;
pub mod delay;
pub mod throttle;
pub mod timeout;

pub use debounce::{DebounceConfig, DebounceMode, Debouncer};
pub use delay::DelayMode;
pub use throttle::{ThrottleConfig, ThrottleMode, Throttler};
