//! Countdown latch
//!
//! A one-shot gate initialised with a count. `count_down` decrements;
//! reaching zero permanently opens the gate and wakes all waiters. The
//! latch is not reusable.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{WorkError, WorkResult};

struct LatchState {
    count: usize,
    waiters: Vec<oneshot::Sender<()>>,
}

/// One-shot completion gate
pub struct CountdownLatch {
    state: Mutex<LatchState>,
}

impl CountdownLatch {
    /// Create a latch requiring `count` decrements
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(LatchState {
                count,
                waiters: Vec::new(),
            }),
        }
    }

    /// Remaining count
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Whether the count has reached zero
    pub fn is_complete(&self) -> bool {
        self.state.lock().count == 0
    }

    /// Decrement the count; decrementing past zero is a state error
    pub fn count_down(&self) -> WorkResult<()> {
        let mut state = self.state.lock();
        if state.count == 0 {
            return Err(WorkError::InvalidState(
                "countdown latch already complete".into(),
            ));
        }
        state.count -= 1;
        if state.count == 0 {
            for tx in state.waiters.drain(..) {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    /// Wait until the count reaches zero
    pub async fn wait(&self) -> WorkResult<()> {
        let rx = {
            let mut state = self.state.lock();
            if state.count == 0 {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };
        rx.await.map_err(|_| WorkError::Cancelled)
    }

    /// Wait with a deadline; returns whether the latch completed in time
    ///
    /// A timeout does not consume or alter the latch.
    pub async fn wait_timeout(&self, timeout: Duration) -> WorkResult<bool> {
        let rx = {
            let mut state = self.state.lock();
            if state.count == 0 {
                return Ok(true);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(WorkError::Cancelled),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{advance, sleep};

    #[tokio::test(start_paused = true)]
    async fn test_latch_wakes_all_waiters_at_zero() {
        let latch = Arc::new(CountdownLatch::new(2));
        let released = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let latch = latch.clone();
            let released = released.clone();
            handles.push(tokio::spawn(async move {
                latch.wait().await.unwrap();
                released.fetch_add(1, Ordering::SeqCst);
            }));
        }
        sleep(Duration::from_millis(1)).await;

        latch.count_down().unwrap();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(!latch.is_complete());

        latch.count_down().unwrap();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert!(latch.is_complete());
    }

    #[tokio::test]
    async fn test_wait_on_complete_latch_returns_immediately() {
        let latch = CountdownLatch::new(0);
        assert!(latch.is_complete());
        latch.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_count_down_below_zero_is_state_error() {
        let latch = CountdownLatch::new(1);
        latch.count_down().unwrap();
        assert!(matches!(
            latch.count_down().unwrap_err(),
            WorkError::InvalidState(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_returns_false_without_consuming() {
        let latch = Arc::new(CountdownLatch::new(1));
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait_timeout(Duration::from_millis(20)).await })
        };
        advance(Duration::from_millis(30)).await;
        assert!(!waiter.await.unwrap().unwrap());
        assert_eq!(latch.count(), 1);

        latch.count_down().unwrap();
        assert!(latch.wait_timeout(Duration::from_millis(1)).await.unwrap());
    }
}
