//! Debounce: coalesce bursts of calls into one execution
//!
//! Every invocation returns a future for the burst's outcome. In trailing
//! mode the inner runs once, `duration` after the burst goes quiet, with the
//! most recent arguments. In leading mode the first invocation of a burst
//! runs immediately and later invocations inside the window share its
//! outcome. Both mode fires the leading call and, when the burst saw two or
//! more invocations, a trailing call as well.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::{Work, WorkFn};

/// Which edge of a burst triggers execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebounceMode {
    /// Fire once after the burst goes quiet, with the latest arguments
    #[default]
    Trailing,
    /// Fire on the first invocation; coalesce the rest of the burst
    Leading,
    /// Fire on the first invocation and again at burst end if re-invoked
    Both,
}

/// Debounce parameters
#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    /// Quiet period that ends a burst
    pub duration: Duration,
    /// Edge selection
    pub mode: DebounceMode,
}

impl DebounceConfig {
    /// Trailing debounce with the given quiet period
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            mode: DebounceMode::Trailing,
        }
    }

    /// Override the edge selection
    pub fn with_mode(mut self, mode: DebounceMode) -> Self {
        self.mode = mode;
        self
    }
}

struct LeadingShare<R> {
    outcome: Option<WorkResult<R>>,
    waiters: Vec<oneshot::Sender<WorkResult<R>>>,
}

struct Burst<Args, R> {
    deadline: Instant,
    count: usize,
    last_args: Option<Args>,
    run: WorkFn<Args, R>,
    trailing_waiters: Vec<oneshot::Sender<WorkResult<R>>>,
    leading: Option<Arc<Mutex<LeadingShare<R>>>>,
    timer: JoinHandle<()>,
}

struct DebouncerInner<Args, R> {
    config: DebounceConfig,
    state: Mutex<Option<Burst<Args, R>>>,
}

/// Shared debounce engine
///
/// Usually created implicitly by [`Work::debounce`]; create one explicitly
/// to share a burst window across several works or to call [`reset`].
///
/// [`reset`]: Debouncer::reset
pub struct Debouncer<Args, R> {
    inner: Arc<DebouncerInner<Args, R>>,
}

impl<Args, R> Clone for Debouncer<Args, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Plan<Args, R> {
    RunLeading(Arc<Mutex<LeadingShare<R>>>, Args),
    Await(oneshot::Receiver<WorkResult<R>>),
    Immediate(WorkResult<R>),
}

impl<Args, R> Debouncer<Args, R>
where
    Args: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Create an idle debouncer
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                config,
                state: Mutex::new(None),
            }),
        }
    }

    /// Whether a burst window is currently open
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    /// Cancel any pending timer and clear burst state
    ///
    /// Futures waiting on the burst fail with [`WorkError::Cancelled`].
    pub fn reset(&self) {
        if let Some(burst) = self.inner.state.lock().take() {
            burst.timer.abort();
            trace!("debounce burst reset");
        }
    }

    /// Route one invocation through the debounce window
    pub async fn submit(&self, run: WorkFn<Args, R>, args: Args) -> WorkResult<R> {
        let plan = {
            let mut state = self.inner.state.lock();
            let deadline = Instant::now() + self.inner.config.duration;
            match state.as_mut() {
                None => match self.inner.config.mode {
                    DebounceMode::Trailing => {
                        let (tx, rx) = oneshot::channel();
                        *state = Some(Burst {
                            deadline,
                            count: 1,
                            last_args: Some(args),
                            run: Arc::clone(&run),
                            trailing_waiters: vec![tx],
                            leading: None,
                            timer: Self::spawn_timer(Arc::downgrade(&self.inner)),
                        });
                        Plan::Await(rx)
                    }
                    DebounceMode::Leading | DebounceMode::Both => {
                        let share = Arc::new(Mutex::new(LeadingShare {
                            outcome: None,
                            waiters: Vec::new(),
                        }));
                        *state = Some(Burst {
                            deadline,
                            count: 1,
                            last_args: None,
                            run: Arc::clone(&run),
                            trailing_waiters: Vec::new(),
                            leading: Some(Arc::clone(&share)),
                            timer: Self::spawn_timer(Arc::downgrade(&self.inner)),
                        });
                        Plan::RunLeading(share, args)
                    }
                },
                Some(burst) => {
                    // reschedule the quiet-period timer
                    burst.deadline = deadline;
                    burst.count += 1;
                    burst.run = Arc::clone(&run);
                    match self.inner.config.mode {
                        DebounceMode::Trailing | DebounceMode::Both => {
                            burst.last_args = Some(args);
                            let (tx, rx) = oneshot::channel();
                            burst.trailing_waiters.push(tx);
                            Plan::Await(rx)
                        }
                        DebounceMode::Leading => match &burst.leading {
                            Some(share) => {
                                let mut share = share.lock();
                                match &share.outcome {
                                    Some(outcome) => Plan::Immediate(outcome.clone()),
                                    None => {
                                        let (tx, rx) = oneshot::channel();
                                        share.waiters.push(tx);
                                        Plan::Await(rx)
                                    }
                                }
                            }
                            None => Plan::Immediate(Err(WorkError::InvalidState(
                                "leading burst without a shared outcome".into(),
                            ))),
                        },
                    }
                }
            }
        };

        match plan {
            Plan::RunLeading(share, args) => {
                let outcome = run(args).await;
                let waiters = {
                    let mut share = share.lock();
                    share.outcome = Some(outcome.clone());
                    std::mem::take(&mut share.waiters)
                };
                for tx in waiters {
                    let _ = tx.send(outcome.clone());
                }
                outcome
            }
            Plan::Await(rx) => rx.await.map_err(|_| WorkError::Cancelled)?,
            Plan::Immediate(outcome) => outcome,
        }
    }

    fn spawn_timer(weak: Weak<DebouncerInner<Args, R>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(inner) = weak.upgrade() else { return };
                    let state = inner.state.lock();
                    match state.as_ref() {
                        Some(burst) => burst.deadline,
                        None => return,
                    }
                };
                tokio::time::sleep_until(deadline).await;

                let Some(inner) = weak.upgrade() else { return };
                let fired = {
                    let mut state = inner.state.lock();
                    match state.as_ref() {
                        Some(burst) if burst.deadline <= Instant::now() => state.take(),
                        // rescheduled while sleeping: go around
                        _ => None,
                    }
                };
                let Some(burst) = fired else { continue };

                let fire_trailing = match inner.config.mode {
                    DebounceMode::Trailing => true,
                    DebounceMode::Both => burst.count >= 2,
                    DebounceMode::Leading => false,
                };
                if fire_trailing {
                    if let Some(args) = burst.last_args {
                        trace!(calls = burst.count, "debounce trailing fire");
                        let outcome = (burst.run)(args).await;
                        for tx in burst.trailing_waiters {
                            let _ = tx.send(outcome.clone());
                        }
                    }
                }
                return;
            }
        })
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Trailing debounce: coalesce bursts, firing `duration` after quiet
    pub fn debounce(self, duration: Duration) -> Work<Args, R> {
        self.debounce_with(DebounceConfig::new(duration))
    }

    /// Debounce with explicit mode selection
    pub fn debounce_with(self, config: DebounceConfig) -> Work<Args, R> {
        self.debounce_shared(Debouncer::new(config))
    }

    /// Debounce through a shared engine
    pub fn debounce_shared(self, debouncer: Debouncer<Args, R>) -> Work<Args, R> {
        let run = self.runner();
        Work::wrap(move |args| {
            let run = Arc::clone(&run);
            let debouncer = debouncer.clone();
            Box::pin(async move { debouncer.submit(run, args).await })
        })
    }
}
