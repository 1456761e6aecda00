//! An elastic worker-thread executor for `afina-core`.
//!
//! ## Design
//!
//! The pool keeps `low_watermark` threads alive at all times and grows up to
//! `high_watermark` under load. Every worker is a dedicated OS thread that:
//!
//! 1. Blocks on the shared `work_available` condition variable until a task is
//!    queued or the pool is asked to stop.
//! 2. Pops one task (FIFO) and releases the pool mutex before running it.
//! 3. Runs the task inside `catch_unwind` so a panicking task cannot take the
//!    worker down with it.
//! 4. Above `low_watermark`, a worker that finds nothing to do within
//!    `idle_time` retires instead of waiting forever.
//!
//! ## Thread safety
//!
//! All pool bookkeeping (`tasks`, `worker_count`, `state`) lives behind a
//! single `Mutex`, signalled by two condition variables: `work_available`
//! (workers wait on it; `submit`/`stop` notify it) and `shutdown_done`
//! (`stop(await = true)` waits on it; the last retiring worker notifies it).
//!
//! ## Zero unsafe blocks
//!
//! This file contains no `unsafe` code. All concurrency uses safe Rust APIs
//! (`Mutex`, `Condvar`, `std::thread`, `std::panic::catch_unwind`).

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// An opaque, owned, no-argument unit of deferred work.
///
/// Parameter binding happens at submission time: callers form a closure over
/// whatever arguments they need before calling [`Executor::submit`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle state of an [`Executor`]. Transitions only move forward:
/// `Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Running,
    Stopping,
    Stopped,
}

struct Shared {
    tasks: VecDeque<Task>,
    worker_count: usize,
    /// Workers currently executing a task (lock released, task running).
    busy_count: usize,
    state: ExecutorState,
    next_worker_id: usize,
}

struct Pool {
    mutex: Mutex<Shared>,
    work_available: Condvar,
    shutdown_done: Condvar,
    low_watermark: usize,
    high_watermark: usize,
    max_queue_size: usize,
    idle_time: Duration,
}

/// A dynamically sized executor: a bounded task queue dispatched to a pool of
/// worker threads whose count floats between `low_watermark` and
/// `high_watermark` based on load.
///
/// See the module documentation for the concurrency design.
pub struct Executor {
    pool: Arc<Pool>,
}

impl Executor {
    /// Construct an executor and spawn exactly `low_watermark` workers.
    ///
    /// # Panics
    ///
    /// Panics if `low_watermark == 0`, `low_watermark > high_watermark`,
    /// `max_queue_size == 0`, or `idle_time.is_zero()`. These are
    /// misconfigurations a caller controls at compile time, not runtime
    /// conditions — see the error handling design in the crate docs.
    pub fn new(
        low_watermark: usize,
        high_watermark: usize,
        max_queue_size: usize,
        idle_time: Duration,
    ) -> Self {
        assert!(low_watermark > 0, "low_watermark must be > 0");
        assert!(
            low_watermark <= high_watermark,
            "low_watermark ({low_watermark}) must be <= high_watermark ({high_watermark})"
        );
        assert!(max_queue_size > 0, "max_queue_size must be > 0");
        assert!(!idle_time.is_zero(), "idle_time must be > 0");

        let pool = Arc::new(Pool {
            mutex: Mutex::new(Shared {
                tasks: VecDeque::new(),
                worker_count: 0,
                busy_count: 0,
                state: ExecutorState::Running,
                next_worker_id: 0,
            }),
            work_available: Condvar::new(),
            shutdown_done: Condvar::new(),
            low_watermark,
            high_watermark,
            max_queue_size,
            idle_time,
        });

        {
            let mut shared = pool.mutex.lock().expect("executor mutex poisoned");
            for _ in 0..low_watermark {
                spawn_worker(&pool, &mut shared);
            }
        }

        Executor { pool }
    }

    /// Convenience constructor reading pool sizing from the environment.
    ///
    /// - `AFINA_EXECUTOR_LOW_WATERMARK` (default `2`)
    /// - `AFINA_EXECUTOR_HIGH_WATERMARK` (default `8`)
    /// - `AFINA_EXECUTOR_MAX_QUEUE_SIZE` (default `128`)
    /// - `AFINA_EXECUTOR_IDLE_MS` (default `5000`)
    ///
    /// Missing or unparsable values fall back to their defaults; this never
    /// fails, it only ever panics on the same constructor invariants as
    /// [`Executor::new`] (e.g. an env var setting `low > high`).
    pub fn from_env() -> Self {
        fn env_usize(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let low = env_usize("AFINA_EXECUTOR_LOW_WATERMARK", 2);
        let high = env_usize("AFINA_EXECUTOR_HIGH_WATERMARK", 8);
        let qmax = env_usize("AFINA_EXECUTOR_MAX_QUEUE_SIZE", 128);
        let idle_ms = env_usize("AFINA_EXECUTOR_IDLE_MS", 5000) as u64;

        Executor::new(low, high, qmax, Duration::from_millis(idle_ms))
    }

    /// Submit a task for deferred execution.
    ///
    /// Returns `false` (and drops `task` unexecuted) if the pool is not
    /// `Running` or the queue is already at `max_queue_size`. Never blocks.
    ///
    /// On success, may spawn one additional worker (never exceeding
    /// `high_watermark`) if the queue was already non-empty before this call,
    /// or every current worker is busy running a task.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self.pool.mutex.lock().expect("executor mutex poisoned");

        if shared.state != ExecutorState::Running {
            return false;
        }
        if shared.tasks.len() >= self.pool.max_queue_size {
            return false;
        }

        let queue_was_non_empty = !shared.tasks.is_empty();
        let all_workers_busy = shared.worker_count == 0 || shared.busy_count == shared.worker_count;
        shared.tasks.push_back(Box::new(task));

        if shared.worker_count < self.pool.high_watermark && (queue_was_non_empty || all_workers_busy)
        {
            spawn_worker(&self.pool, &mut shared);
        }

        drop(shared);
        self.pool.work_available.notify_one();
        true
    }

    /// Begin (or continue) shutting down the pool.
    ///
    /// Idempotent: calling this on an already-`Stopping`/`Stopped` pool is a
    /// no-op. Always wakes every waiting worker so they can observe the new
    /// state.
    ///
    /// If `await_shutdown` is `true`, blocks the caller until every worker has
    /// retired (`state == Stopped`). If `false`, returns immediately; queued
    /// tasks still drain in the background.
    pub fn stop(&self, await_shutdown: bool) {
        {
            let mut shared = self.pool.mutex.lock().expect("executor mutex poisoned");
            if shared.state == ExecutorState::Running {
                shared.state = ExecutorState::Stopping;
            }
        }
        self.pool.work_available.notify_all();

        if await_shutdown {
            let shared = self.pool.mutex.lock().expect("executor mutex poisoned");
            let _guard = self
                .pool
                .shutdown_done
                .wait_while(shared, |s| s.state != ExecutorState::Stopped)
                .expect("executor mutex poisoned");
        }
    }

    /// Current number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.pool.mutex.lock().expect("executor mutex poisoned").worker_count
    }

    /// Current number of tasks waiting in the queue (not counting one
    /// currently being executed by a worker).
    pub fn queue_len(&self) -> usize {
        self.pool.mutex.lock().expect("executor mutex poisoned").tasks.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutorState {
        self.pool.mutex.lock().expect("executor mutex poisoned").state
    }
}

impl Drop for Executor {
    /// Tears the pool down gracefully: `Drop` implies `stop(await = true)`.
    ///
    /// The reference C++ draft called the non-blocking `Stop(false)` from its
    /// destructor, which could free the pool's shared state while worker
    /// threads still referenced it. Blocking here until every worker has
    /// retired is the corrected, sound behavior.
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// Spawn one worker thread and register it in `shared`.
///
/// Must be called with `shared`'s mutex already held (the caller passes the
/// guard in) so the new worker's registration is atomic with whatever event
/// triggered the spawn (construction or a `submit` under load).
fn spawn_worker(pool: &Arc<Pool>, shared: &mut Shared) {
    let worker_id = shared.next_worker_id;
    shared.next_worker_id += 1;
    shared.worker_count += 1;

    let pool_for_thread = Arc::clone(pool);
    let spawn_result = std::thread::Builder::new()
        .name(format!("afina-executor-worker-{worker_id}"))
        .spawn(move || worker_loop(pool_for_thread, worker_id));

    if spawn_result.is_err() {
        // Could not spawn the OS thread (resource exhaustion). Roll back the
        // registration so the pool's bookkeeping stays accurate.
        shared.worker_count -= 1;
    } else {
        tracing::debug!(worker_id, worker_count = shared.worker_count, "worker spawned");
    }
}

/// The body run by every worker thread. See the module documentation for the
/// step-by-step design.
fn worker_loop(pool: Arc<Pool>, worker_id: usize) {
    loop {
        let task = {
            let mut shared = pool.mutex.lock().expect("executor mutex poisoned");

            loop {
                if shared.state != ExecutorState::Running && shared.tasks.is_empty() {
                    retire(&pool, shared, worker_id);
                    return;
                }
                if !shared.tasks.is_empty() {
                    break;
                }

                if shared.worker_count > pool.low_watermark {
                    let (guard, timeout_result) = pool
                        .work_available
                        .wait_timeout_while(shared, pool.idle_time, |s| {
                            s.state == ExecutorState::Running && s.tasks.is_empty()
                        })
                        .expect("executor mutex poisoned");
                    shared = guard;
                    if timeout_result.timed_out()
                        && shared.state == ExecutorState::Running
                        && shared.tasks.is_empty()
                    {
                        retire(&pool, shared, worker_id);
                        return;
                    }
                } else {
                    shared = pool
                        .work_available
                        .wait_while(shared, |s| {
                            s.state == ExecutorState::Running && s.tasks.is_empty()
                        })
                        .expect("executor mutex poisoned");
                }
            }

            let task = shared.tasks.pop_front().expect("queue non-empty under lock");
            shared.busy_count += 1;
            task
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::warn!(worker_id, "task panicked; worker continues");
        }

        pool.mutex.lock().expect("executor mutex poisoned").busy_count -= 1;
    }
}

/// Remove `worker_id` from the live worker count and, if this was the last
/// worker during a `Stopping` shutdown, transition to `Stopped` and wake
/// anyone waiting in `stop(await = true)`.
fn retire(pool: &Arc<Pool>, mut shared: std::sync::MutexGuard<'_, Shared>, worker_id: usize) {
    shared.worker_count -= 1;
    let worker_count = shared.worker_count;
    tracing::debug!(worker_id, worker_count, "worker retired");

    if shared.state == ExecutorState::Stopping && shared.worker_count == 0 {
        shared.state = ExecutorState::Stopped;
        drop(shared);
        pool.shutdown_done.notify_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
