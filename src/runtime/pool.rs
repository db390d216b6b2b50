//! Long-lived worker pool with pinned threads and barrier-paced dispatch.
//!
//! The pool spawns `nr_threads - 1` workers (the dispatching thread executes
//! partition 0 itself) and parks them on the barrier. A call publishes a
//! work descriptor, crosses the barrier to release the workers, runs its own
//! share, and crosses again to join. Shutdown raises the terminate flag and
//! performs one final crossing.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::runtime::barrier::Barrier;
use crate::runtime::numa;

/// The work descriptor: a per-thread entry point shared by every worker for
/// the duration of one dispatch.
type Job<'a> = dyn Fn(usize) + Sync + 'a;

/// Published-descriptor slot. The dispatching thread writes it before the
/// opening barrier and clears it after the closing one; workers only read
/// between the two crossings, inheriting the happens-before relation from
/// the barrier atomics.
struct JobSlot(UnsafeCell<Option<&'static Job<'static>>>);

unsafe impl Sync for JobSlot {}
unsafe impl Send for JobSlot {}

pub struct ThreadPool {
    barrier: Arc<Barrier>,
    slot: Arc<JobSlot>,
    terminate: Arc<AtomicBool>,
    completed: Arc<Vec<AtomicU64>>,
    workers: Vec<JoinHandle<()>>,
    nr_threads: usize,
    main_sense: i32,
}

impl ThreadPool {
    /// Spawns the pool and pins every participant, including the calling
    /// thread, which acts as worker 0.
    pub fn new(nr_threads: usize, affinity: &[usize]) -> Self {
        assert!(nr_threads >= 1);
        assert!(affinity.len() >= nr_threads);

        let barrier = Arc::new(Barrier::new(nr_threads));
        let slot = Arc::new(JobSlot(UnsafeCell::new(None)));
        let terminate = Arc::new(AtomicBool::new(false));
        let completed: Arc<Vec<AtomicU64>> =
            Arc::new((0..nr_threads).map(|_| AtomicU64::new(0)).collect());

        numa::pin_current_thread(affinity[0]);

        let workers = (1..nr_threads)
            .map(|tid| {
                let barrier = Arc::clone(&barrier);
                let slot = Arc::clone(&slot);
                let terminate = Arc::clone(&terminate);
                let completed = Arc::clone(&completed);
                let cpu = affinity[tid];
                std::thread::Builder::new()
                    .name(format!("csx-worker-{}", tid))
                    .spawn(move || {
                        numa::pin_current_thread(cpu);
                        let mut sense = 0;
                        loop {
                            barrier.wait(&mut sense);
                            if terminate.load(Ordering::SeqCst) {
                                break;
                            }
                            if let Some(job) = unsafe { *slot.0.get() } {
                                job(tid);
                            }
                            completed[tid].fetch_add(1, Ordering::SeqCst);
                            barrier.wait(&mut sense);
                        }
                    })
                    .expect("spawning worker thread failed")
            })
            .collect();

        Self {
            barrier,
            slot,
            terminate,
            completed,
            workers,
            nr_threads,
            main_sense: 0,
        }
    }

    pub fn nr_threads(&self) -> usize {
        self.nr_threads
    }

    /// Jobs completed by worker `tid` so far.
    pub fn completed_jobs(&self, tid: usize) -> u64 {
        self.completed[tid].load(Ordering::SeqCst)
    }

    /// Runs `job` on every thread. Blocks until all threads are done; the
    /// caller executes `job(0)` between the two barrier crossings.
    pub fn dispatch<'a>(&mut self, job: &'a Job<'a>) {
        // The descriptor lives on the caller's stack; it stays borrowed
        // until the closing barrier below, after which no worker reads it.
        let published: &'static Job<'static> = unsafe { std::mem::transmute(job) };
        unsafe {
            *self.slot.0.get() = Some(published);
        }

        self.barrier.wait(&mut self.main_sense);
        job(0);
        self.completed[0].fetch_add(1, Ordering::SeqCst);
        self.barrier.wait(&mut self.main_sense);

        unsafe {
            *self.slot.0.get() = None;
        }
    }

    /// Stops and joins every worker. The pool is unusable afterwards.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.terminate.store(true, Ordering::SeqCst);
        self.barrier.wait(&mut self.main_sense);
        for w in self.workers.drain(..) {
            if w.join().is_err() {
                log::error!("csx worker panicked during shutdown");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_runs_all_threads() {
        let mut pool = ThreadPool::new(4, &[0, 1, 2, 3]);
        let hits: Vec<AtomicUsize> = (0..4).map(|_| AtomicUsize::new(0)).collect();
        let job = |tid: usize| {
            hits[tid].fetch_add(1, Ordering::SeqCst);
        };
        pool.dispatch(&job);
        pool.dispatch(&job);
        for h in &hits {
            assert_eq!(h.load(Ordering::SeqCst), 2);
        }
        pool.shutdown();
    }

    #[test]
    fn test_completed_jobs_accounting() {
        const CALLS: u64 = 25;
        let mut pool = ThreadPool::new(3, &[0, 1, 2]);
        let job = |_tid: usize| {};
        for _ in 0..CALLS {
            pool.dispatch(&job);
        }
        // Every thread completes exactly one job per dispatch pair.
        for tid in 0..3 {
            assert_eq!(pool.completed_jobs(tid), CALLS);
        }
        pool.shutdown();
    }

    #[test]
    fn test_single_thread_pool() {
        let mut pool = ThreadPool::new(1, &[0]);
        let ran = AtomicUsize::new(0);
        pool.dispatch(&|tid| {
            assert_eq!(tid, 0);
            ran.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let mut pool = ThreadPool::new(2, &[0, 1]);
        pool.dispatch(&|_| {});
        pool.shutdown();
        assert!(pool.workers.is_empty());
    }
}
