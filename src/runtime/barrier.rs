//! A centralized sense-reversing barrier with a futex-assisted backoff.
//!
//! Waiters spin comparing their local sense against the shared global sense
//! for a bounded number of iterations, then park on a futex keyed to the
//! global sense word. The last arrival resets the counter, flips the global
//! sense and wakes every parked waiter. Wakeups are level-triggered: a late
//! arrival observes the already-flipped sense and returns immediately.

use std::sync::atomic::{AtomicI32, Ordering};

/// Spin iterations before falling back to a futex wait. Purely an energy
/// trade-off; correctness does not depend on it.
pub const BARRIER_TIMEOUT: usize = 50_000;

#[derive(Debug)]
pub struct Barrier {
    count: AtomicI32,
    global_sense: AtomicI32,
    nr_threads: i32,
}

impl Barrier {
    pub fn new(nr_threads: usize) -> Self {
        Self {
            count: AtomicI32::new(nr_threads as i32),
            global_sense: AtomicI32::new(0),
            nr_threads: nr_threads as i32,
        }
    }

    /// Crosses the barrier. `local_sense` is the caller's per-thread sense
    /// bit and must be 0-initialized before the first crossing.
    pub fn wait(&self, local_sense: &mut i32) {
        // Each thread toggles its own sense.
        *local_sense = 1 - *local_sense;
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.count.store(self.nr_threads, Ordering::SeqCst);
            // Last arrival flips the global sense and wakes the waiters.
            self.global_sense.store(*local_sense, Ordering::SeqCst);
            futex_wake_all(&self.global_sense);
        } else {
            while self.global_sense.load(Ordering::SeqCst) != *local_sense {
                if self.spin(*local_sense) {
                    futex_wait(&self.global_sense, 1 - *local_sense);
                }
            }
        }
    }

    /// Returns `true` on timeout with the sense still unflipped.
    fn spin(&self, local_sense: i32) -> bool {
        for _ in 0..BARRIER_TIMEOUT {
            if self.global_sense.load(Ordering::SeqCst) == local_sense {
                return false;
            }
            std::hint::spin_loop();
        }
        true
    }
}

#[cfg(target_os = "linux")]
fn futex_wait(atom: &AtomicI32, expected: i32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atom.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            std::ptr::null::<libc::timespec>(),
        );
    }
}

#[cfg(target_os = "linux")]
fn futex_wake_all(atom: &AtomicI32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atom.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn futex_wait(_atom: &AtomicI32, _expected: i32) {
    std::thread::yield_now();
}

#[cfg(not(target_os = "linux"))]
fn futex_wake_all(_atom: &AtomicI32) {}
