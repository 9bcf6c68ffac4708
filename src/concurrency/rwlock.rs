//! Readers-writer lock with writer preference
//!
//! Any number of readers may hold the lock together; a writer is exclusive
//! against readers and other writers. A queued writer blocks newly arriving
//! readers so writers cannot starve. The wait queue is a single FIFO: a
//! batch of consecutive queued readers is granted together.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{WorkError, WorkResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Read,
    Write,
}

struct Waiter {
    id: u64,
    side: Side,
    tx: oneshot::Sender<()>,
}

struct RwState {
    readers: usize,
    writing: bool,
    waiters: VecDeque<Waiter>,
}

impl RwState {
    fn has_queued_writer(&self) -> bool {
        self.waiters.iter().any(|w| w.side == Side::Write)
    }
}

/// Asynchronous readers-writer lock
pub struct RwLock {
    state: Mutex<RwState>,
    next_id: AtomicU64,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    /// Create an uncontended lock
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RwState {
                readers: 0,
                writing: false,
                waiters: VecDeque::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Current number of read holders
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    /// Whether a writer currently holds the lock
    pub fn is_writing(&self) -> bool {
        self.state.lock().writing
    }

    /// Acquire shared read access
    pub async fn acquire_read(&self) -> WorkResult<()> {
        self.acquire_side(Side::Read, None).await
    }

    /// Acquire shared read access with a deadline
    pub async fn acquire_read_timeout(&self, timeout: Duration) -> WorkResult<()> {
        self.acquire_side(Side::Read, Some(timeout)).await
    }

    /// Acquire exclusive write access
    pub async fn acquire_write(&self) -> WorkResult<()> {
        self.acquire_side(Side::Write, None).await
    }

    /// Acquire exclusive write access with a deadline
    pub async fn acquire_write_timeout(&self, timeout: Duration) -> WorkResult<()> {
        self.acquire_side(Side::Write, Some(timeout)).await
    }

    /// Release one read hold
    pub fn release_read(&self) {
        let mut state = self.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            Self::wake_next(&mut state);
        }
    }

    /// Release the write hold
    pub fn release_write(&self) {
        let mut state = self.state.lock();
        state.writing = false;
        Self::wake_next(&mut state);
    }

    async fn acquire_side(&self, side: Side, timeout: Option<Duration>) -> WorkResult<()> {
        let (id, mut rx) = {
            let mut state = self.state.lock();
            let admissible = match side {
                // pending writers block new readers
                Side::Read => !state.writing && !state.has_queued_writer(),
                Side::Write => !state.writing && state.readers == 0 && state.waiters.is_empty(),
            };
            if admissible {
                match side {
                    Side::Read => state.readers += 1,
                    Side::Write => state.writing = true,
                }
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.waiters.push_back(Waiter { id, side, tx });
            (id, rx)
        };

        let Some(deadline) = timeout else {
            return rx.await.map_err(|_| WorkError::Cancelled);
        };
        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(granted) => granted.map_err(|_| WorkError::Cancelled),
            Err(_) => {
                self.abandon(id, side);
                Err(WorkError::Timeout)
            }
        }
    }

    /// Grant the queue head: either one writer, or every leading reader
    fn wake_next(state: &mut RwState) {
        while let Some(side) = state.waiters.front().map(|w| w.side) {
            match side {
                Side::Write => {
                    if state.writing || state.readers > 0 {
                        return;
                    }
                    if let Some(waiter) = state.waiters.pop_front() {
                        if waiter.tx.send(()).is_ok() {
                            state.writing = true;
                            return;
                        }
                        // cancelled writer: fall through to the next waiter
                    }
                }
                Side::Read => {
                    if state.writing {
                        return;
                    }
                    if let Some(waiter) = state.waiters.pop_front() {
                        if waiter.tx.send(()).is_ok() {
                            state.readers += 1;
                        }
                        // keep draining consecutive readers
                    }
                }
            }
        }
    }

    fn abandon(&self, id: u64, side: Side) {
        let mut state = self.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|w| w.id != id);
        if state.waiters.len() != before {
            // removing a queued writer may unblock readers behind it
            Self::wake_next(&mut state);
            return;
        }
        // grant raced the timeout: this waiter holds the lock, give it back
        match side {
            Side::Read => {
                state.readers = state.readers.saturating_sub(1);
                if state.readers == 0 {
                    Self::wake_next(&mut state);
                }
            }
            Side::Write => {
                state.writing = false;
                Self::wake_next(&mut state);
            }
        }
    }
}
