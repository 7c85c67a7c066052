//! Monitors: one exclusive lock paired with one condition variable.
//!
//! The runtime's scheduler and internal services coordinate through these.
//! Two substrates implement the same contract:
//! - [`PthreadMonitor`]: a host `pthread_mutex_t` + `pthread_cond_t` pair
//! - [`PortableMonitor`]: a composite monitor built from `parking_lot`
//!   primitives, for hosts (or builds) that prefer not to use pthreads
//!   directly
//!
//! Caller obligations, inherited from the host primitives and not checked:
//! - `enter` is not reentrant; entering twice from one thread deadlocks
//! - `wait`, `wait_until` and `broadcast` require the lock to be held
//! - a monitor must not be destroyed while any thread is blocked on it

use std::io;

use tracing::trace;

pub mod portable;
pub mod pthread;

pub use portable::PortableMonitor;
pub use pthread::PthreadMonitor;

/// Operations every monitor substrate provides.
pub trait RawMonitor: Send + Sync {
    fn enter(&self);
    fn exit(&self);
    /// Release the lock, block until a broadcast, reacquire the lock.
    fn wait(&self);
    /// As [`RawMonitor::wait`], but give up at the absolute wall-clock
    /// deadline `deadline_nanos` (see [`crate::sys::nano_time`]). Returns
    /// without blocking if the deadline has already passed.
    fn wait_until(&self, deadline_nanos: i64);
    /// Wake every thread currently waiting.
    fn broadcast(&self);
}

/// Which implementation backs newly created monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substrate {
    Pthread,
    Portable,
}

impl Default for Substrate {
    fn default() -> Self {
        if cfg!(feature = "portable-monitors") {
            Substrate::Portable
        } else {
            Substrate::Pthread
        }
    }
}

/// A monitor backed by whichever substrate it was created with.
pub struct Monitor {
    raw: Box<dyn RawMonitor>,
    substrate: Substrate,
}

impl Monitor {
    pub fn new(substrate: Substrate) -> io::Result<Self> {
        trace!(?substrate, "monitor create");
        let raw: Box<dyn RawMonitor> = match substrate {
            Substrate::Pthread => Box::new(PthreadMonitor::new()?),
            Substrate::Portable => Box::new(PortableMonitor::new()),
        };
        Ok(Self { raw, substrate })
    }

    pub fn substrate(&self) -> Substrate {
        self.substrate
    }

    #[inline]
    pub fn enter(&self) {
        self.raw.enter();
    }

    #[inline]
    pub fn exit(&self) {
        self.raw.exit();
    }

    #[inline]
    pub fn wait(&self) {
        self.raw.wait();
    }

    #[inline]
    pub fn wait_until(&self, deadline_nanos: i64) {
        self.raw.wait_until(deadline_nanos);
    }

    #[inline]
    pub fn broadcast(&self) {
        self.raw.broadcast();
    }

    /// Leak the monitor into an opaque machine word for the C surface.
    pub fn into_handle(self) -> usize {
        Box::into_raw(Box::new(self)) as usize
    }

    /// Borrow the monitor behind a handle from [`Monitor::into_handle`].
    ///
    /// # Safety
    /// `handle` must come from `into_handle` and must not have been passed to
    /// [`Monitor::destroy_handle`].
    pub unsafe fn from_handle<'a>(handle: usize) -> &'a Monitor {
        unsafe { &*(handle as *const Monitor) }
    }

    /// Drop the monitor behind a handle.
    ///
    /// # Safety
    /// Same as [`Monitor::from_handle`]; additionally no thread may be
    /// blocked on the monitor and the handle must not be used afterwards.
    pub unsafe fn destroy_handle(handle: usize) {
        trace!(handle, "monitor destroy");
        drop(unsafe { Box::from_raw(handle as *mut Monitor) });
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("substrate", &self.substrate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::nano_time;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    const SUBSTRATES: [Substrate; 2] = [Substrate::Pthread, Substrate::Portable];

    #[test]
    fn test_broadcast_wakes_waiter_holding_lock() {
        for substrate in SUBSTRATES {
            let monitor = Arc::new(Monitor::new(substrate).unwrap());
            let ready = Arc::new(AtomicBool::new(false));
            let woken = Arc::new(AtomicBool::new(false));

            let waiter = {
                let monitor = monitor.clone();
                let ready = ready.clone();
                let woken = woken.clone();
                thread::spawn(move || {
                    monitor.enter();
                    ready.store(true, Ordering::Release);
                    while !woken.load(Ordering::Acquire) {
                        monitor.wait();
                    }
                    monitor.exit();
                })
            };

            while !ready.load(Ordering::Acquire) {
                thread::yield_now();
            }
            monitor.enter();
            woken.store(true, Ordering::Release);
            monitor.broadcast();
            monitor.exit();

            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_wait_reacquires_before_return() {
        for substrate in SUBSTRATES {
            let monitor = Arc::new(Monitor::new(substrate).unwrap());
            let inside = Arc::new(AtomicUsize::new(0));
            let done = Arc::new(AtomicBool::new(false));
            let mut handles = Vec::new();

            for _ in 0..4 {
                let monitor = monitor.clone();
                let inside = inside.clone();
                let done = done.clone();
                handles.push(thread::spawn(move || {
                    monitor.enter();
                    while !done.load(Ordering::Acquire) {
                        monitor.wait_until(nano_time() + 5_000_000);
                    }
                    assert_eq!(inside.fetch_add(1, Ordering::AcqRel), 0);
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::AcqRel);
                    monitor.exit();
                }));
            }

            thread::sleep(Duration::from_millis(10));
            monitor.enter();
            done.store(true, Ordering::Release);
            monitor.broadcast();
            monitor.exit();

            for h in handles {
                h.join().unwrap();
            }
        }
    }

    #[test]
    fn test_wait_until_past_deadline_returns_immediately() {
        for substrate in SUBSTRATES {
            let monitor = Monitor::new(substrate).unwrap();
            monitor.enter();
            let start = Instant::now();
            monitor.wait_until(nano_time() - 1_000_000_000);
            monitor.wait_until(0);
            monitor.wait_until(i64::MIN);
            assert!(start.elapsed() < Duration::from_millis(500));
            monitor.exit();
        }
    }

    #[test]
    fn test_wait_until_times_out_without_broadcast() {
        for substrate in SUBSTRATES {
            let monitor = Monitor::new(substrate).unwrap();
            monitor.enter();
            let start = Instant::now();
            let deadline = nano_time() + 20_000_000;
            // Spurious wakeups are allowed; the deadline still bounds the loop.
            while nano_time() < deadline {
                monitor.wait_until(deadline);
            }
            assert!(start.elapsed() >= Duration::from_millis(19));
            monitor.exit();
        }
    }

    #[test]
    fn test_handle_round_trip() {
        let handle = Monitor::new(Substrate::Portable).unwrap().into_handle();
        unsafe {
            let monitor = Monitor::from_handle(handle);
            assert_eq!(monitor.substrate(), Substrate::Portable);
            monitor.enter();
            monitor.broadcast();
            monitor.exit();
            Monitor::destroy_handle(handle);
        }
    }
}
