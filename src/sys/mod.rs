//! Host capability queries
//!
//! Thin, memoized answers to questions about the machine we are running on:
//! page size, online processors, minimum signal-stack size and the wall clock
//! used for absolute monitor deadlines.

use std::io;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{trace, warn};

pub mod exit;
pub mod io_ops;

pub use exit::{BootArguments, ExitStatus, Process, ResourceLedger, exit, fatal};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Ask the host for its virtual memory page size.
pub fn determine_page_size() -> io::Result<u64> {
    trace!("determine page size");
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("invalid page size {size}"),
        ));
    }
    Ok(size as u64)
}

/// Memoized page size. Falls back to 4 KiB if the host cannot answer, which
/// is only reachable on hosts where [`determine_page_size`] already failed at
/// startup.
pub fn page_size() -> u64 {
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        determine_page_size().unwrap_or_else(|e| {
            warn!(error = %e, "can not determine page size; assuming 4096");
            4096
        })
    })
}

/// Number of processors currently online. Never fails; assumes 1 when the
/// host gives no usable answer.
pub fn num_processors() -> usize {
    static PROCESSORS: OnceLock<usize> = OnceLock::new();
    *PROCESSORS.get_or_init(|| {
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online > 0 {
            return online as usize;
        }
        warn!(result = online, "sysconf(_SC_NPROCESSORS_ONLN) failed");
        match std::thread::available_parallelism() {
            Ok(n) => n.get(),
            Err(e) => {
                warn!(error = %e, "can not figure out how many CPUs are online; assuming 1");
                1
            }
        }
    })
}

/// Smallest signal stack the host accepts for `sigaltstack`.
pub fn min_signal_stack_size() -> usize {
    libc::SIGSTKSZ
}

/// Wall-clock time in nanoseconds since the epoch. Monitor deadlines are
/// expressed on this clock.
pub fn nano_time() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64 * NANOS_PER_SEC + d.subsec_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Current wall-clock time in milliseconds.
pub fn current_time_millis() -> i64 {
    nano_time() / 1_000_000
}

/// Sleep for `nanos` nanoseconds. Non-positive durations return immediately.
pub fn nano_sleep(nanos: i64) {
    if nanos > 0 {
        std::thread::sleep(Duration::from_nanos(nanos as u64));
    }
}

/// Split an absolute nanosecond timestamp into a `timespec`.
pub(crate) fn to_timespec(nanos: i64) -> libc::timespec {
    libc::timespec {
        tv_sec: nanos.div_euclid(NANOS_PER_SEC) as libc::time_t,
        tv_nsec: nanos.rem_euclid(NANOS_PER_SEC) as _,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = page_size();
        assert!(size >= 1024);
        assert!(size.is_power_of_two());
        assert_eq!(determine_page_size().unwrap(), size);
    }

    #[test]
    fn test_at_least_one_processor() {
        assert!(num_processors() >= 1);
    }

    #[test]
    fn test_nano_time_advances() {
        let a = nano_time();
        nano_sleep(1_000_000);
        let b = nano_time();
        assert!(b > a);
        assert!(a > 0);
    }

    #[test]
    fn test_timespec_split() {
        let ts = to_timespec(3 * NANOS_PER_SEC + 7);
        assert_eq!(ts.tv_sec, 3);
        assert_eq!(ts.tv_nsec, 7);
    }

    #[test]
    fn test_signal_stack_size_is_usable() {
        assert!(min_signal_stack_size() >= 2048);
    }
}
