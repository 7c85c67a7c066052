//! Host pthread substrate.

use std::cell::UnsafeCell;
use std::io;

use tracing::trace;

use super::RawMonitor;
use crate::sys::{nano_time, to_timespec};

struct Inner {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
}

/// `pthread_mutex_t` + `pthread_cond_t`, boxed so their addresses never
/// change after initialization.
pub struct PthreadMonitor {
    inner: Box<UnsafeCell<Inner>>,
}

// The pthread objects are designed for concurrent use through raw pointers.
unsafe impl Send for PthreadMonitor {}
unsafe impl Sync for PthreadMonitor {}

impl PthreadMonitor {
    pub fn new() -> io::Result<Self> {
        let inner = Box::new(UnsafeCell::new(Inner {
            mutex: libc::PTHREAD_MUTEX_INITIALIZER,
            cond: libc::PTHREAD_COND_INITIALIZER,
        }));
        let raw = inner.get();
        unsafe {
            let rc = libc::pthread_mutex_init(&raw mut (*raw).mutex, std::ptr::null());
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            let rc = libc::pthread_cond_init(&raw mut (*raw).cond, std::ptr::null());
            if rc != 0 {
                libc::pthread_mutex_destroy(&raw mut (*raw).mutex);
                return Err(io::Error::from_raw_os_error(rc));
            }
        }
        Ok(Self { inner })
    }

    #[inline]
    fn mutex(&self) -> *mut libc::pthread_mutex_t {
        unsafe { &raw mut (*self.inner.get()).mutex }
    }

    #[inline]
    fn cond(&self) -> *mut libc::pthread_cond_t {
        unsafe { &raw mut (*self.inner.get()).cond }
    }
}

impl RawMonitor for PthreadMonitor {
    fn enter(&self) {
        unsafe {
            libc::pthread_mutex_lock(self.mutex());
        }
    }

    fn exit(&self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex());
        }
    }

    fn wait(&self) {
        unsafe {
            libc::pthread_cond_wait(self.cond(), self.mutex());
        }
    }

    fn wait_until(&self, deadline_nanos: i64) {
        if deadline_nanos <= nano_time() {
            return;
        }
        // The default condition variable clock is CLOCK_REALTIME, the same
        // clock nano_time() reads.
        let ts = to_timespec(deadline_nanos);
        let rc = unsafe { libc::pthread_cond_timedwait(self.cond(), self.mutex(), &ts) };
        if rc != 0 && rc != libc::ETIMEDOUT {
            trace!(rc, "pthread_cond_timedwait returned an error");
        }
    }

    fn broadcast(&self) {
        unsafe {
            libc::pthread_cond_broadcast(self.cond());
        }
    }
}

impl Drop for PthreadMonitor {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_cond_destroy(self.cond());
            libc::pthread_mutex_destroy(self.mutex());
        }
    }
}
