//! Concurrency primitives
//!
//! Shared coordination structures for decorated work:
//! - [`Lock`]: fair asynchronous mutual exclusion
//! - [`RwLock`]: readers-writer lock with writer preference
//! - [`Semaphore`]: counting permits with FIFO, LIFO, or priority wakeup
//! - [`Barrier`]: cyclic or single-trip rendezvous point
//! - [`CountdownLatch`]: one-shot completion gate
//! - [`Monitor`]: mutual exclusion plus condition waiting
//! - [`Bulkhead`]: round-robin isolation pools with bounded backlog
//! - [`WorkQueue`]: bounded worker pool with overflow policies and
//!   starvation prevention
//!
//! Every primitive is instance-scoped. A primitive shared across several
//! works (by `Arc`) serialises across all of them; dropping the owning
//! handle fails outstanding waiters with [`WorkError::Cancelled`].
//!
//! [`WorkError::Cancelled`]: crate::error::WorkError::Cancelled

pub mod barrier;
pub mod bulkhead;
pub mod latch;
pub mod lock;
pub mod monitor;
pub mod queue;
pub mod rwlock;
pub mod semaphore;

pub use barrier::{Barrier, BarrierConfig};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats};
pub use latch::CountdownLatch;
pub use lock::{Lock, LockConfig};
pub use monitor::Monitor;
pub use queue::{
    QueueFullPolicy, QueueMode, QueueStats, StarvationConfig, WorkQueue, WorkQueueConfig,
};
pub use rwlock::RwLock;
pub use semaphore::{Semaphore, SemaphoreConfig};
