//! Per-thread signal infrastructure.
//!
//! Every runtime thread runs hardware-trap handlers on a private alternate
//! stack, so a fault caused by stack exhaustion can still be delivered. The
//! resume signal (`SIGCONT`) is blocked in each runtime thread and only
//! observed through an explicit [`await_resume_signal`].

use std::io;
use std::mem::MaybeUninit;
use std::sync::Arc;

use libc::{c_int, c_void};
use tracing::{debug, error, trace};

use crate::sys::{self, ExitStatus, ResourceLedger};

/// Signal the runtime uses to request a cooperative pause/resume.
pub const RESUME_SIGNAL: c_int = libc::SIGCONT;

/// Synchronous hardware faults delivered to the runtime's trap handler.
pub const TRAP_SIGNALS: [c_int; 5] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGTRAP,
];

/// Signature of the runtime's hardware-trap handler.
pub type TrapHandler = extern "C" fn(signo: c_int, info: *mut libc::siginfo_t, context: *mut c_void);

/// Query the alternate signal stack currently registered for this thread.
pub fn current_stack() -> io::Result<libc::stack_t> {
    let mut current = MaybeUninit::<libc::stack_t>::zeroed();
    let rc = unsafe { libc::sigaltstack(std::ptr::null(), current.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { current.assume_init() })
}

/// A signal-delivery stack registered with the host for the calling thread.
///
/// Owned by the thread that installed it. Dropping it disables signal
/// delivery on the alternate stack first and only then frees the memory.
pub struct SignalStack {
    memory: Box<[u8]>,
    ledger: Arc<ResourceLedger>,
}

impl SignalStack {
    /// Allocate a stack of the host's minimum size and register it.
    pub fn install(ledger: Arc<ResourceLedger>) -> io::Result<Self> {
        let size = sys::min_signal_stack_size();
        let mut memory = vec![0u8; size].into_boxed_slice();
        let stack = libc::stack_t {
            ss_sp: memory.as_mut_ptr().cast(),
            ss_flags: 0,
            ss_size: size,
        };
        if unsafe { libc::sigaltstack(&stack, std::ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        ledger.signal_stacks.allocate();
        trace!(base = ?stack.ss_sp, size, "signal stack installed");
        Ok(Self { memory, ledger })
    }

    pub fn base(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Whether `addr` lies inside this stack.
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base() as usize;
        addr >= base && addr < base + self.size()
    }

    fn disable(&self) {
        // The registered stack may have been replaced since install; look
        // at what the host has now rather than assuming it is ours.
        match current_stack() {
            Ok(current) if current.ss_sp.cast_const() != self.base().cast() => {
                debug!(
                    installed = ?current.ss_sp,
                    ours = ?self.base(),
                    "signal stack was replaced; the installed one is not ours to free"
                );
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "sigaltstack query failed"),
        }
        let disable = libc::stack_t {
            ss_sp: std::ptr::null_mut(),
            ss_flags: libc::SS_DISABLE,
            ss_size: 0,
        };
        if unsafe { libc::sigaltstack(&disable, std::ptr::null_mut()) } != 0 {
            debug!(error = %io::Error::last_os_error(), "disabling signal stack failed");
        }
    }
}

impl Drop for SignalStack {
    fn drop(&mut self) {
        self.disable();
        self.ledger.signal_stacks.release();
        trace!(base = ?self.base(), "signal stack released");
        // `memory` is freed after this body returns, with delivery disabled.
    }
}

/// Block the resume signal in the calling thread's signal mask.
pub fn block_resume_signal() -> io::Result<()> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    let rc = unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), RESUME_SIGNAL);
        libc::pthread_sigmask(libc::SIG_BLOCK, set.as_ptr(), std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Per-thread trap setup, called once at thread start. A thread whose mask
/// cannot be set can not receive traps correctly, so failure ends the process.
pub fn setup_trap_handling() {
    trace!("setup trap handling");
    if let Err(e) = block_resume_signal() {
        error!(errno = e.raw_os_error(), error = %e, "pthread_sigmask failed");
        sys::fatal(ExitStatus::SyscallTrouble);
    }
}

/// Whether the resume signal is blocked in the calling thread.
pub fn resume_signal_blocked() -> io::Result<bool> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), set.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(unsafe { libc::sigismember(set.as_ptr(), RESUME_SIGNAL) } == 1)
}

/// Block until the resume signal is sent to this thread. Requires the signal
/// to be blocked (see [`setup_trap_handling`]).
pub fn await_resume_signal() -> io::Result<()> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    let mut received: c_int = 0;
    let rc = unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), RESUME_SIGNAL);
        libc::sigwait(set.as_ptr(), &mut received)
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    trace!(signal = received, "resume signal received");
    Ok(())
}

/// Send the resume signal to one thread.
pub fn send_resume_signal(thread: libc::pthread_t) -> io::Result<()> {
    let rc = unsafe { libc::pthread_kill(thread, RESUME_SIGNAL) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Route the given signals to `handler`, running it on the per-thread
/// signal stack.
pub fn install_trap_handler(handler: TrapHandler, signals: &[c_int]) -> io::Result<()> {
    for &signo in signals {
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = handler as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESTART;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
        }
        if unsafe { libc::sigaction(signo, &action, std::ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        debug!(signo, "trap handler installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    static HANDLER_FRAME: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn record_frame(_signo: c_int, _info: *mut libc::siginfo_t, _context: *mut c_void) {
        let marker = 0u8;
        HANDLER_FRAME.store(&marker as *const u8 as usize, Ordering::SeqCst);
    }

    #[test]
    fn test_install_and_release_balances_ledger() {
        let ledger = Arc::new(ResourceLedger::default());
        let ledger_in_thread = ledger.clone();
        thread::spawn(move || {
            let stack = SignalStack::install(ledger_in_thread).unwrap();
            let current = current_stack().unwrap();
            assert_eq!(current.ss_sp.cast_const(), stack.base().cast());
            assert_eq!(current.ss_size, stack.size());
            drop(stack);
            let after = current_stack().unwrap();
            assert_ne!(after.ss_flags & libc::SS_DISABLE, 0);
        })
        .join()
        .unwrap();
        assert_eq!(ledger.signal_stacks.allocated(), 1);
        assert_eq!(ledger.signal_stacks.released(), 1);
    }

    #[test]
    fn test_resume_signal_blocked_and_awaited() {
        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = thread::spawn(move || {
            setup_trap_handling();
            assert!(resume_signal_blocked().unwrap());
            tx.send(unsafe { libc::pthread_self() }).unwrap();
            await_resume_signal().unwrap();
        });
        let target = rx.recv().unwrap();
        send_resume_signal(target).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_trap_handler_runs_on_signal_stack() {
        let ledger = Arc::new(ResourceLedger::default());
        thread::spawn(move || {
            let stack = SignalStack::install(ledger).unwrap();
            install_trap_handler(record_frame, &[libc::SIGTRAP]).unwrap();
            unsafe {
                libc::raise(libc::SIGTRAP);
            }
            let frame = HANDLER_FRAME.load(Ordering::SeqCst);
            assert!(stack.contains(frame), "handler frame {frame:#x} not on signal stack");
        })
        .join()
        .unwrap();
    }
}
