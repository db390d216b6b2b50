//! Process-wide parallel runtime: partitioning, NUMA placement, barrier and
//! the pinned worker pool.
//!
//! The pool is process-wide state with an explicit lifecycle: it is created
//! lazily by the first tune (or by [`init`]) and torn down by [`shutdown`].
//! Re-initializing with a different thread count replaces the pool.

pub mod barrier;
pub mod numa;
pub mod partition;
pub mod pool;

use std::sync::Mutex;

use crate::config::CsxConfig;
use pool::ThreadPool;

static POOL: Mutex<Option<ThreadPool>> = Mutex::new(None);

/// Creates the worker pool for `config` if it does not exist yet.
pub fn init(config: &CsxConfig) {
    with_pool(config.nr_threads.max(1), &config.cpu_affinity(), |_| {});
}

/// Tears the worker pool down and joins every worker. The next tune or
/// kernel call re-initializes it.
pub fn shutdown() {
    let mut guard = POOL.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(mut pool) = guard.take() {
        pool.shutdown();
    }
}

/// Runs `f` with the process pool, creating or resizing it first so that it
/// matches `nr_threads`. Dispatches are serialized by the pool lock.
pub(crate) fn with_pool<R>(
    nr_threads: usize,
    affinity: &[usize],
    f: impl FnOnce(&mut ThreadPool) -> R,
) -> R {
    let mut guard = POOL.lock().unwrap_or_else(|e| e.into_inner());
    let rebuild = match guard.as_ref() {
        Some(pool) => pool.nr_threads() != nr_threads,
        None => true,
    };
    if rebuild {
        if let Some(mut old) = guard.take() {
            log::debug!(
                "resizing worker pool from {} to {} threads",
                old.nr_threads(),
                nr_threads
            );
            old.shutdown();
        }
        *guard = Some(ThreadPool::new(nr_threads, affinity));
    }
    f(guard.as_mut().unwrap())
}
