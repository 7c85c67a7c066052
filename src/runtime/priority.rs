//! Thread priority mapping.
//!
//! The runtime thinks of priorities as signed offsets from a default. For a
//! scheduling policy with a real priority range the default is the midpoint
//! of that range and the offset is applied through
//! `pthread_setschedparam`. Time-sharing policies on Linux have a degenerate
//! range (min == max == 0), so there we fall back to the kernel thread's
//! niceness, where a lower nice value means a higher priority.
//!
//! Requests outside what the host can represent are clamped or refused by
//! the host; no attempt is made to correct that here.

use std::io;

use tracing::trace;

/// Opaque word identifying the target of niceness calls: the kernel thread
/// id where the host has one, otherwise the pthread handle itself.
pub type PriorityHandle = usize;

fn priority_range(policy: libc::c_int) -> (libc::c_int, libc::c_int) {
    unsafe {
        (
            libc::sched_get_priority_min(policy),
            libc::sched_get_priority_max(policy),
        )
    }
}

/// Midpoint of `[min, max]`, the priority the runtime calls offset zero.
pub fn midpoint(min: libc::c_int, max: libc::c_int) -> libc::c_int {
    min + (max - min) / 2
}

fn default_priority(policy: libc::c_int) -> libc::c_int {
    let (min, max) = priority_range(policy);
    midpoint(min, max)
}

fn sched_param_of(thread: libc::pthread_t) -> io::Result<(libc::c_int, libc::sched_param)> {
    let mut policy: libc::c_int = 0;
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::pthread_getschedparam(thread, &mut policy, &mut param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok((policy, param))
}

/// Whether `thread`'s scheduling policy has a meaningful priority spread.
pub fn has_sched_priority(thread: libc::pthread_t) -> bool {
    match sched_param_of(thread) {
        Ok((policy, _)) => {
            let (min, max) = priority_range(policy);
            min != 0 || max != 0
        }
        Err(_) => false,
    }
}

/// Handle to pass as the second argument of [`get_priority`] and
/// [`set_priority`] for the calling thread.
pub fn priority_handle() -> PriorityHandle {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        if tid != -1 {
            return tid as PriorityHandle;
        }
    }
    unsafe { libc::pthread_self() as PriorityHandle }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn clear_errno() {
    unsafe {
        *libc::__errno_location() = 0;
    }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn clear_errno() {
    unsafe {
        *libc::__error() = 0;
    }
}

/// Current priority of `thread` as an offset from the default. Returns 0 when
/// neither mechanism can answer.
pub fn get_priority(thread: libc::pthread_t, handle: PriorityHandle) -> i32 {
    trace!(thread = thread as usize, handle, "get thread priority");
    if has_sched_priority(thread) {
        if let Ok((policy, param)) = sched_param_of(thread) {
            return param.sched_priority - default_priority(policy);
        }
    } else if thread as usize != handle {
        // -1 is a legal niceness, so errno is the only failure signal.
        clear_errno();
        let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, handle as libc::id_t) };
        if io::Error::last_os_error().raw_os_error() == Some(0) {
            return -nice;
        }
    }
    0
}

/// Set `thread`'s priority to `priority` offset from the default. A no-op
/// when the thread is already there.
pub fn set_priority(thread: libc::pthread_t, handle: PriorityHandle, priority: i32) -> io::Result<()> {
    trace!(thread = thread as usize, handle, priority, "set thread priority");
    if get_priority(thread, handle) == priority {
        return Ok(());
    }

    if has_sched_priority(thread) {
        let (policy, mut param) = sched_param_of(thread)?;
        param.sched_priority = default_priority(policy) + priority;
        let rc = unsafe { libc::pthread_setschedparam(thread, policy, &param) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    } else if thread as usize != handle {
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, handle as libc::id_t, -priority) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no priority mechanism for this thread",
        ))
    }
}
