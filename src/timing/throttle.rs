//! Throttle: at most one execution per window
//!
//! Unlike debounce, the window is anchored to the first admission and is not
//! extended by later calls. Leading mode runs the first call of a window
//! immediately and fails the rest with [`WorkError::Throttled`]. Trailing
//! mode defers to the window end and runs the most recent call. Both mode
//! runs the leading call immediately and a trailing call at window end when
//! the window saw more than one invocation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::{Work, WorkFn};

/// Which calls in a window execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleMode {
    /// First call runs immediately; later calls in the window are rejected
    #[default]
    Leading,
    /// Only the last call of each window runs, at window end
    Trailing,
    /// Leading call runs immediately, trailing call at window end if any
    Both,
}

/// Throttle parameters
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Window length
    pub duration: Duration,
    /// Admission mode
    pub mode: ThrottleMode,
}

impl ThrottleConfig {
    /// Leading throttle with the given window
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            mode: ThrottleMode::Leading,
        }
    }

    /// Override the admission mode
    pub fn with_mode(mut self, mode: ThrottleMode) -> Self {
        self.mode = mode;
        self
    }
}

struct Window<Args, R> {
    ends_at: Instant,
    trailing_args: Option<Args>,
    run: WorkFn<Args, R>,
    trailing_waiters: Vec<oneshot::Sender<WorkResult<R>>>,
    timer: Option<JoinHandle<()>>,
}

struct ThrottlerInner<Args, R> {
    config: ThrottleConfig,
    state: Mutex<Option<Window<Args, R>>>,
}

/// Shared throttle engine
pub struct Throttler<Args, R> {
    inner: Arc<ThrottlerInner<Args, R>>,
}

impl<Args, R> Clone for Throttler<Args, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Plan<Args, R> {
    RunLeading(Args),
    Await(oneshot::Receiver<WorkResult<R>>),
    Rejected,
}

impl<Args, R> Throttler<Args, R>
where
    Args: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Create an idle throttler
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            inner: Arc::new(ThrottlerInner {
                config,
                state: Mutex::new(None),
            }),
        }
    }

    /// Whether a window is currently open
    pub fn is_open(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .as_ref()
            .is_some_and(|w| w.ends_at > Instant::now())
    }

    /// Clear window state; pending trailing callers are cancelled
    pub fn reset(&self) {
        if let Some(window) = self.inner.state.lock().take() {
            if let Some(timer) = window.timer {
                timer.abort();
            }
            trace!("throttle window reset");
        }
    }

    /// Route one invocation through the throttle window
    pub async fn submit(&self, run: WorkFn<Args, R>, args: Args) -> WorkResult<R> {
        let plan = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();
            let window_open = state.as_ref().is_some_and(|w| w.ends_at > now);

            if !window_open {
                let ends_at = now + self.inner.config.duration;
                match self.inner.config.mode {
                    ThrottleMode::Leading => {
                        *state = Some(Window {
                            ends_at,
                            trailing_args: None,
                            run: Arc::clone(&run),
                            trailing_waiters: Vec::new(),
                            timer: None,
                        });
                        Plan::RunLeading(args)
                    }
                    ThrottleMode::Both => {
                        *state = Some(Window {
                            ends_at,
                            trailing_args: None,
                            run: Arc::clone(&run),
                            trailing_waiters: Vec::new(),
                            timer: Some(Self::spawn_timer(
                                Arc::downgrade(&self.inner),
                                ends_at,
                            )),
                        });
                        Plan::RunLeading(args)
                    }
                    ThrottleMode::Trailing => {
                        let (tx, rx) = oneshot::channel();
                        *state = Some(Window {
                            ends_at,
                            trailing_args: Some(args),
                            run: Arc::clone(&run),
                            trailing_waiters: vec![tx],
                            timer: Some(Self::spawn_timer(
                                Arc::downgrade(&self.inner),
                                ends_at,
                            )),
                        });
                        Plan::Await(rx)
                    }
                }
            } else {
                match self.inner.config.mode {
                    ThrottleMode::Leading => Plan::Rejected,
                    ThrottleMode::Trailing | ThrottleMode::Both => {
                        // guarded by window_open above
                        if let Some(window) = state.as_mut() {
                            window.trailing_args = Some(args);
                            window.run = Arc::clone(&run);
                            let (tx, rx) = oneshot::channel();
                            window.trailing_waiters.push(tx);
                            Plan::Await(rx)
                        } else {
                            Plan::Rejected
                        }
                    }
                }
            }
        };

        match plan {
            Plan::RunLeading(args) => run(args).await,
            Plan::Await(rx) => rx.await.map_err(|_| WorkError::Cancelled)?,
            Plan::Rejected => {
                trace!("call rejected by throttle window");
                Err(WorkError::Throttled)
            }
        }
    }

    fn spawn_timer(weak: Weak<ThrottlerInner<Args, R>>, ends_at: Instant) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep_until(ends_at).await;
            let Some(inner) = weak.upgrade() else { return };
            let window = {
                let mut state = inner.state.lock();
                match state.as_ref() {
                    Some(w) if w.ends_at <= Instant::now() => state.take(),
                    _ => None,
                }
            };
            let Some(window) = window else { return };
            if let Some(args) = window.trailing_args {
                trace!("throttle trailing fire");
                let outcome = (window.run)(args).await;
                for tx in window.trailing_waiters {
                    let _ = tx.send(outcome.clone());
                }
            }
        })
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Leading throttle: one execution per `duration`, extra calls rejected
    pub fn throttle(self, duration: Duration) -> Work<Args, R> {
        self.throttle_with(ThrottleConfig::new(duration))
    }

    /// Throttle with explicit mode selection
    pub fn throttle_with(self, config: ThrottleConfig) -> Work<Args, R> {
        self.throttle_shared(Throttler::new(config))
    }

    /// Throttle through a shared engine
    pub fn throttle_shared(self, throttler: Throttler<Args, R>) -> Work<Args, R> {
        let run = self.runner();
        Work::wrap(move |args| {
            let run = Arc::clone(&run);
            let throttler = throttler.clone();
            Box::pin(async move { throttler.submit(run, args).await })
        })
    }
}
