//! Process lifecycle: exit codes, the orderly exit path, and the counters
//! that track per-thread resource ownership.
//!
//! Everything the bootstrap layer needs to remember process-wide lives in one
//! [`Process`] value. The binary installs a single instance with
//! [`Process::install`]; the C-callable surface reaches it through
//! [`Process::global`]. Tests build private instances so their counters do
//! not interfere with each other.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{error, trace};

use crate::runtime::monitor::{Monitor, Substrate};

/// Distinguished process exit codes understood by launch scripts and test
/// harnesses.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal termination, including the informational `-help`/`-version` paths.
    Success = 0,
    /// A boot argument was malformed, inconsistent or missing.
    BadCommandLineArg = 100,
    /// A host call needed to create or run a thread failed.
    SyscallTrouble = 121,
    /// Anything else: a library function that cannot fail did, or the
    /// runtime could not be started.
    MiscTrouble = 122,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Allocation/release pair for one kind of per-thread resource.
#[derive(Debug, Default)]
pub struct Counter {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl Counter {
    pub fn allocate(&self) {
        self.allocated.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    /// Resources currently owned by some thread.
    pub fn live(&self) -> usize {
        self.allocated().saturating_sub(self.released())
    }
}

/// Counters for every resource a runtime thread owns between start and
/// termination.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    pub signal_stacks: Counter,
    pub termination_contexts: Counter,
    pub start_arguments: Counter,
}

impl ResourceLedger {
    /// True when every allocation has been matched by exactly one release.
    pub fn is_balanced(&self) -> bool {
        self.signal_stacks.live() == 0
            && self.termination_contexts.live() == 0
            && self.start_arguments.live() == 0
    }
}

/// What the loader hands on to the runtime once the command line has been
/// accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootArguments {
    pub initial_heap_size: u64,
    pub maximum_heap_size: u64,
    /// Forwarded directives followed by the application arguments.
    pub residual: Vec<String>,
}

/// Process-wide state of the bootstrap layer.
pub struct Process {
    substrate: Substrate,
    verbose: u32,
    death_lock: Monitor,
    ledger: Arc<ResourceLedger>,
    next_thread_serial: AtomicU64,
    boot_arguments: OnceLock<BootArguments>,
}

static PROCESS: OnceLock<Arc<Process>> = OnceLock::new();

impl Process {
    /// Create the lifecycle object. Fails only if the host refuses to
    /// create the death lock.
    pub fn new(substrate: Substrate, verbose: u32) -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            substrate,
            verbose,
            death_lock: Monitor::new(substrate)?,
            ledger: Arc::new(ResourceLedger::default()),
            next_thread_serial: AtomicU64::new(1),
            boot_arguments: OnceLock::new(),
        }))
    }

    /// Make `process` the one reached by [`Process::global`]. The first
    /// installation wins; later calls return the already installed value.
    pub fn install(process: Arc<Process>) -> Arc<Process> {
        PROCESS.get_or_init(|| process).clone()
    }

    pub fn global() -> Option<&'static Arc<Process>> {
        PROCESS.get()
    }

    pub fn substrate(&self) -> Substrate {
        self.substrate
    }

    pub fn verbose(&self) -> u32 {
        self.verbose
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    /// Publish the accepted boot arguments. Only the first call has an
    /// effect; returns whether this one did.
    pub fn set_boot_arguments(&self, arguments: BootArguments) -> bool {
        trace!(count = arguments.residual.len(), "boot arguments published");
        self.boot_arguments.set(arguments).is_ok()
    }

    pub fn boot_arguments(&self) -> Option<&BootArguments> {
        self.boot_arguments.get()
    }

    pub(crate) fn next_thread_serial(&self) -> u64 {
        self.next_thread_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Flush diagnostics and terminate the process.
    ///
    /// The death lock is taken and never released, so a second thread racing
    /// into `exit` blocks here instead of running exit handlers concurrently.
    pub fn exit(&self, status: ExitStatus) -> ! {
        self.exit_with_code(status.code())
    }

    /// As [`Process::exit`], with a code chosen by the runtime.
    pub fn exit_with_code(&self, code: i32) -> ! {
        trace!(code, "process exit");
        if self.verbose > 0 && code != ExitStatus::Success.code() {
            error!(code, "exiting");
        }
        flush_console();
        self.death_lock.enter();
        std::process::exit(code)
    }
}

fn flush_console() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// Leave the process with `status`.
///
/// Goes through the installed [`Process`] when there is one so the death
/// lock is honoured.
pub fn exit(status: ExitStatus) -> ! {
    match Process::global() {
        Some(process) => process.exit(status),
        None => {
            flush_console();
            std::process::exit(status.code())
        }
    }
}

/// Terminate on an unrecoverable host failure.
pub fn fatal(status: ExitStatus) -> ! {
    error!(code = status.code(), "unrecoverable failure");
    exit(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::BadCommandLineArg.code(), 100);
        assert_eq!(ExitStatus::SyscallTrouble.code(), 121);
        assert_eq!(ExitStatus::MiscTrouble.code(), 122);
    }

    #[test]
    fn test_ledger_balances_after_matching_releases() {
        let ledger = ResourceLedger::default();
        assert!(ledger.is_balanced());

        ledger.signal_stacks.allocate();
        ledger.start_arguments.allocate();
        assert!(!ledger.is_balanced());
        assert_eq!(ledger.signal_stacks.live(), 1);

        ledger.signal_stacks.release();
        ledger.start_arguments.release();
        assert!(ledger.is_balanced());
        assert_eq!(ledger.signal_stacks.allocated(), 1);
        assert_eq!(ledger.signal_stacks.released(), 1);
    }

    #[test]
    fn test_thread_serials_are_not_reused() {
        let process = Process::new(Substrate::default(), 0).unwrap();
        let a = process.next_thread_serial();
        let b = process.next_thread_serial();
        assert!(b > a);
    }

    #[test]
    fn test_boot_arguments_published_once() {
        let process = Process::new(Substrate::Portable, 0).unwrap();
        assert!(process.boot_arguments().is_none());

        let first = BootArguments {
            initial_heap_size: 64 << 20,
            maximum_heap_size: 256 << 20,
            residual: vec!["-Dfoo=bar".into(), "MyApp".into()],
        };
        assert!(process.set_boot_arguments(first.clone()));
        assert!(!process.set_boot_arguments(BootArguments::default()));
        assert_eq!(process.boot_arguments(), Some(&first));
    }
}
