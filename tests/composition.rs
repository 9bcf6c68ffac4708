//! Cross-decorator composition laws

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use workforge::concurrency::Lock;
use workforge::flow::{BackpressureConfig, ProxyConfig, Tap};
use workforge::performance::{CompressConfig, MemoizeConfig};
use workforge::resilience::{Fallback, RetryConfig};
use workforge::{Work, WorkError};

/// A stack of non-modifying decorators preserves the success value
#[tokio::test]
async fn pass_through_stack_preserves_success_value() {
    let work = Work::from_fn1(|n: u32| async move { Ok(n * 3) })
        .tap(Tap::new())
        .proxy(ProxyConfig::new())
        .pre_condition(|_| true, "always admissible")
        .retry(RetryConfig::default())
        .timeout(Duration::from_secs(60))
        .backpressure(BackpressureConfig::new(8));

    assert_eq!(work.call(14).await.unwrap(), 42);
}

/// The decorator applied last runs first on the way in
#[tokio::test]
async fn nesting_follows_construction_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (o1, o2, o3) = (order.clone(), order.clone(), order.clone());

    let work = Work::from_fn(move || {
        let o1 = o1.clone();
        async move {
            o1.lock().push("inner");
            Ok(())
        }
    })
    .tap(Tap::new().on_call(move |_| o2.lock().push("first-applied")))
    .tap(Tap::new().on_call(move |_| o3.lock().push("last-applied")));

    work.call().await.unwrap();
    assert_eq!(*order.lock(), vec!["last-applied", "first-applied", "inner"]);
}

/// Retrying inside a shared-execution layer still invokes the inner once
/// per distinct failure, and memoization on top serves repeats
#[tokio::test]
async fn retry_then_memoize_caches_the_recovered_value() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let work = Work::from_fn1(move |n: u32| {
        let c = c.clone();
        async move {
            let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Err(WorkError::msg("warming up"))
            } else {
                Ok(n)
            }
        }
    })
    .retry(RetryConfig::constant(5, Duration::from_millis(1)))
    .memoize(MemoizeConfig::new());

    assert_eq!(work.call(7).await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // the memo layer absorbs the repeat without another attempt
    assert_eq!(work.call(7).await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Fallback outside a timeout translates the timeout into a substitute
#[tokio::test(start_paused = true)]
async fn timeout_then_fallback_substitutes_on_deadline() {
    let work = Work::from_fn(|| async {
        sleep(Duration::from_secs(10)).await;
        Ok("slow answer".to_string())
    })
    .timeout(Duration::from_millis(50))
    .fallback(Fallback::value("cached answer".to_string()).when(WorkError::is_timeout));

    assert_eq!(work.call().await.unwrap(), "cached answer");
}

/// Compress and decompress layers cancel out
#[tokio::test]
async fn compress_decompress_round_trip() {
    let payload = "a payload that is long enough to clear the threshold ".repeat(50);
    let expected = payload.clone();
    let config = CompressConfig::new(128);

    let work = Work::from_fn(move || {
        let payload = payload.clone();
        async move { Ok(payload) }
    })
    .compress_output(config)
    .decompress_output(config);

    assert_eq!(work.call().await.unwrap(), expected);
}

/// Share: concurrent same-key callers observe one execution and one outcome
#[tokio::test(start_paused = true)]
async fn share_coalesces_concurrent_callers() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let work = Work::from_fn1(move |n: u32| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(30)).await;
            Ok(n + 1)
        }
    })
    .share();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let w = work.clone();
            tokio::spawn(async move { w.call(41).await })
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Once: K calls, one execution, stored outcome replayed
#[tokio::test]
async fn once_invokes_inner_exactly_once_per_key() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let work = Work::from_fn1(move |n: u32| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(n)
        }
    })
    .once();

    for _ in 0..10 {
        work.call(1).await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Shutting down a worker pool cancels its pending callers
#[tokio::test(start_paused = true)]
async fn queue_shutdown_cancels_pending_callers() {
    use workforge::concurrency::{WorkQueue, WorkQueueConfig};

    let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new(1)).unwrap());
    let work = Work::from_fn1(|n: u32| async move {
        sleep(Duration::from_millis(100)).await;
        Ok(n)
    })
    .queued(queue.clone());

    let running = {
        let w = work.clone();
        tokio::spawn(async move { w.call(1).await })
    };
    sleep(Duration::from_millis(1)).await;

    let pending = {
        let w = work.clone();
        tokio::spawn(async move { w.call(2).await })
    };
    sleep(Duration::from_millis(1)).await;

    queue.shutdown();
    assert!(matches!(
        pending.await.unwrap().unwrap_err(),
        WorkError::Cancelled
    ));
    running.await.unwrap().unwrap();
}

/// A shared lock across two works serialises both
#[tokio::test(start_paused = true)]
async fn shared_lock_serialises_across_works() {
    let lock = Arc::new(Lock::new());
    let active = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let make_work = |label: &'static str| {
        let active = active.clone();
        let peak = peak.clone();
        Work::from_fn(move || {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(label)
            }
        })
        .with_lock(lock.clone())
    };

    let a = make_work("a");
    let b = make_work("b");
    let ha = tokio::spawn(async move { a.call().await });
    let hb = tokio::spawn(async move { b.call().await });
    ha.await.unwrap().unwrap();
    hb.await.unwrap().unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
