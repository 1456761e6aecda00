//! Smoke tests for the afina-core library.
//!
//! These cover the basic end-to-end shape of both primitives:
//! 1. an `Executor` accepts and runs a task
//! 2. an `Executor` rejects work once stopped
//! 3. an `LruCache` stores and returns a value
//! 4. an `LruCache` evicts the least-recently-used entry under pressure
//!
//! Run with: `cargo test -p afina-core --test smoke_test`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use afina_core::{Executor, LruCache};

/// Routes `tracing` output from worker spawn/retire and cache eviction
/// events to the test harness's captured output. Safe to call from every
/// test; only the first call actually installs the subscriber.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_executor_runs_submitted_task() {
    init_tracing();
    let executor = Executor::new(1, 2, 8, Duration::from_millis(200));
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = Arc::clone(&ran);

    assert!(executor.submit(move || {
        ran_clone.fetch_add(1, Ordering::SeqCst);
    }));

    executor.stop(true);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_executor_rejects_after_stop() {
    let executor = Executor::new(1, 2, 8, Duration::from_millis(200));
    executor.stop(true);
    assert!(!executor.submit(|| {}));
}

#[test]
fn test_cache_put_then_get() {
    let mut cache = LruCache::new(1024);
    assert!(cache.put(b"hi", b"there"));
    assert_eq!(cache.get(b"hi"), Some(b"there".to_vec()));
}

#[test]
fn test_cache_evicts_least_recently_used() {
    let mut cache = LruCache::new(4);
    assert!(cache.put(b"aa", b"11"));
    assert!(cache.put(b"bb", b"22")); // evicts "aa"
    assert_eq!(cache.get(b"aa"), None);
    assert_eq!(cache.get(b"bb"), Some(b"22".to_vec()));
}
