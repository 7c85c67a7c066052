//! Thread lifecycle manager.
//!
//! Each runtime execution context ("virtual processor") runs on exactly one
//! host thread created here. Before any runtime code runs the new thread:
//!
//! 1. installs its own signal-delivery stack,
//! 2. captures its [`TerminationContext`],
//! 3. records the execution context back-pointer,
//! 4. calls the runtime entry point with the initial frame pointer.
//!
//! A thread leaves the runtime either by returning from the entry point or
//! by calling [`terminate`] on itself. `terminate` unwinds every runtime
//! frame back to the start routine, which is the only place the
//! termination request is caught. Both paths then run the same release
//! sequence, in this order and exactly once:
//!
//! - thread-local state is cleared
//! - signal delivery on the alternate stack is disabled and the stack freed
//! - the termination context is released
//! - the start-argument block is released
//!
//! State machine of an [`ExecutionContext`]:
//! `Created -> Running -> Terminating -> Terminated`.

use std::any::Any;
use std::cell::RefCell;
use std::io;
use std::os::unix::thread::JoinHandleExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tracing::{debug, error, trace};

use super::signal::SignalStack;
use crate::sys::{self, ExitStatus, Process, ResourceLedger};

/// Runtime entry point: receives the runtime's address for the execution
/// context and the initial frame pointer. Declared `C-unwind` because
/// [`terminate`] unwinds through it.
pub type RuntimeEntry = extern "C-unwind" fn(context: usize, frame_pointer: usize);

/// Execution status of a runtime thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Created = 0,
    Running = 1,
    Terminating = 2,
    Terminated = 3,
}

impl ExecStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ExecStatus::Created,
            1 => ExecStatus::Running,
            2 => ExecStatus::Terminating,
            _ => ExecStatus::Terminated,
        }
    }
}

/// The runtime's per-thread record as seen by this layer.
#[derive(Debug)]
pub struct ExecutionContext {
    address: usize,
    frame_pointer: AtomicUsize,
    status: AtomicU8,
}

impl ExecutionContext {
    /// `address` is the runtime's own handle for this context; it is passed
    /// back to the entry point untouched.
    pub fn new(address: usize) -> Arc<Self> {
        Arc::new(Self {
            address,
            frame_pointer: AtomicUsize::new(0),
            status: AtomicU8::new(ExecStatus::Created as u8),
        })
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn frame_pointer(&self) -> usize {
        self.frame_pointer.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ExecStatus {
        ExecStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn advance(&self, from: ExecStatus, to: ExecStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle for a created runtime thread. The serial is never reused within a
/// process, even after the host recycles the pthread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeThreadHandle {
    pthread: libc::pthread_t,
    serial: u64,
}

impl RuntimeThreadHandle {
    pub fn pthread(&self) -> libc::pthread_t {
        self.pthread
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// Snapshot the start routine returns to on termination. There is exactly
/// one per runtime thread, living in thread-local state.
#[derive(Debug)]
pub struct TerminationContext {
    serial: u64,
    ledger: Arc<ResourceLedger>,
}

impl TerminationContext {
    fn capture(serial: u64, ledger: Arc<ResourceLedger>) -> Box<Self> {
        ledger.termination_contexts.allocate();
        Box::new(Self { serial, ledger })
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl Drop for TerminationContext {
    fn drop(&mut self) {
        self.ledger.termination_contexts.release();
    }
}

/// Argument block handed from `create` to the new thread.
struct StartArguments {
    context: Arc<ExecutionContext>,
    entry: RuntimeEntry,
    frame_pointer: usize,
    serial: u64,
    ledger: Arc<ResourceLedger>,
}

impl StartArguments {
    fn new(
        context: Arc<ExecutionContext>,
        entry: RuntimeEntry,
        frame_pointer: usize,
        serial: u64,
        ledger: Arc<ResourceLedger>,
    ) -> Box<Self> {
        ledger.start_arguments.allocate();
        Box::new(Self {
            context,
            entry,
            frame_pointer,
            serial,
            ledger,
        })
    }
}

impl Drop for StartArguments {
    fn drop(&mut self) {
        self.ledger.start_arguments.release();
    }
}

/// Unwind payload carried from [`terminate`] to the start routine.
struct TerminationRequest {
    serial: u64,
}

/// Typed thread-local state of a runtime thread.
struct ThreadState {
    context: Arc<ExecutionContext>,
    termination: Box<TerminationContext>,
}

thread_local! {
    static THREAD_STATE: RefCell<Option<ThreadState>> = const { RefCell::new(None) };
}

/// Creates runtime threads on behalf of one [`Process`].
#[derive(Clone)]
pub struct ThreadManager {
    process: Arc<Process>,
}

impl ThreadManager {
    pub fn new(process: Arc<Process>) -> Self {
        Self { process }
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Create a runtime thread. Failure to create the host thread is a
    /// resource-exhaustion condition and ends the process.
    pub fn create(
        &self,
        context: Arc<ExecutionContext>,
        entry: RuntimeEntry,
        frame_pointer: usize,
    ) -> RuntimeThreadHandle {
        match self.try_create(context, entry, frame_pointer) {
            Ok(handle) => handle,
            Err(e) => {
                error!(errno = e.raw_os_error(), error = %e, "thread creation failed");
                self.process.exit(ExitStatus::SyscallTrouble)
            }
        }
    }

    /// As [`ThreadManager::create`], but report failure to the caller.
    pub fn try_create(
        &self,
        context: Arc<ExecutionContext>,
        entry: RuntimeEntry,
        frame_pointer: usize,
    ) -> io::Result<RuntimeThreadHandle> {
        let serial = self.process.next_thread_serial();
        trace!(
            context = context.address(),
            frame_pointer,
            serial,
            "thread create"
        );
        let args = StartArguments::new(
            context,
            entry,
            frame_pointer,
            serial,
            self.process.ledger().clone(),
        );

        let join = std::thread::Builder::new()
            .name(format!("bootvm-vp-{}", serial))
            .spawn(move || thread_startup(args))?;
        let pthread = join.as_pthread_t() as libc::pthread_t;
        // Runtime threads are detached; dropping the join handle does that.
        drop(join);

        debug!(serial, pthread = pthread as usize, "thread created");
        Ok(RuntimeThreadHandle { pthread, serial })
    }
}

fn thread_startup(args: Box<StartArguments>) {
    let stack = match SignalStack::install(args.ledger.clone()) {
        Ok(stack) => stack,
        Err(e) => {
            error!(errno = e.raw_os_error(), error = %e, "sigaltstack failed");
            sys::fatal(ExitStatus::SyscallTrouble);
        }
    };

    let termination = TerminationContext::capture(args.serial, args.ledger.clone());
    THREAD_STATE.with(|state| {
        *state.borrow_mut() = Some(ThreadState {
            context: args.context.clone(),
            termination,
        });
    });

    args.context
        .frame_pointer
        .store(args.frame_pointer, Ordering::Release);
    args.context.advance(ExecStatus::Created, ExecStatus::Running);
    trace!(
        context = args.context.address(),
        frame_pointer = args.frame_pointer,
        "thread startup: branching to runtime"
    );

    let entry = args.entry;
    let address = args.context.address();
    let frame_pointer = args.frame_pointer;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry(address, frame_pointer)));

    // Normal return takes the same path as termination but was not
    // requested through `terminate`.
    args.context.advance(ExecStatus::Running, ExecStatus::Terminating);
    let stray_panic = match outcome {
        Ok(()) => {
            debug!(serial = args.serial, "runtime entry returned");
            None
        }
        Err(payload) => match payload.downcast::<TerminationRequest>() {
            Ok(request) => {
                debug_assert_eq!(request.serial, args.serial);
                trace!(serial = args.serial, "thread terminated");
                None
            }
            Err(other) => Some(other),
        },
    };

    release_thread_resources(args, stack);

    if let Some(payload) = stray_panic {
        error!("runtime thread panicked");
        panic::resume_unwind(payload);
    }
}

fn release_thread_resources(args: Box<StartArguments>, stack: SignalStack) {
    let state = THREAD_STATE.with(|state| state.borrow_mut().take());
    drop(stack);
    drop(state);
    let context = args.context.clone();
    drop(args);
    context.advance(ExecStatus::Terminating, ExecStatus::Terminated);
}

/// Terminate the calling runtime thread.
///
/// Unwinds every frame between here and the thread's start routine, which
/// then releases the thread's resources. Only a thread can terminate itself;
/// calling this from a thread not created by [`ThreadManager`] is fatal.
pub fn terminate() -> ! {
    trace!("thread terminate");
    let request = THREAD_STATE.with(|state| {
        state.borrow().as_ref().map(|s| {
            s.context.advance(ExecStatus::Running, ExecStatus::Terminating);
            TerminationRequest {
                serial: s.termination.serial(),
            }
        })
    });
    match request {
        Some(request) => {
            let payload: Box<dyn Any + Send> = Box::new(request);
            panic::resume_unwind(payload)
        }
        None => {
            error!("terminate called on a thread the runtime does not own");
            sys::fatal(ExitStatus::MiscTrouble)
        }
    }
}

/// Execution context of the calling runtime thread, if it is one.
pub fn current_context() -> Option<Arc<ExecutionContext>> {
    THREAD_STATE.with(|state| state.borrow().as_ref().map(|s| s.context.clone()))
}

/// Serial of the calling thread's termination context, if it is a runtime
/// thread.
pub fn current_serial() -> Option<u64> {
    THREAD_STATE.with(|state| state.borrow().as_ref().map(|s| s.termination.serial()))
}

/// Host handle of the calling thread.
pub fn thread_id() -> libc::pthread_t {
    unsafe { libc::pthread_self() }
}

/// Give the processor back to the host scheduler.
pub fn yield_now() {
    trace!("thread yield");
    std::thread::yield_now();
}

/// Whether [`bind`] can pin threads on this host.
pub fn bind_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Pin the calling thread to one CPU.
#[cfg(target_os = "linux")]
pub fn bind(cpu: usize) -> io::Result<()> {
    trace!(cpu, "thread bind");
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
    }
    let rc = unsafe {
        libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        )
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn bind(_cpu: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread binding is not supported on this host",
    ))
}
