//! C-callable surface of the bootstrap layer
//!
//! These extern "C" functions are what the runtime's compiled code calls into.
//! They are thin: each one forwards to the Rust API and flattens the result
//! into the integer conventions the runtime expects.
//!
//! The calling convention is:
//! - Handles (monitors, threads, execution contexts) are passed as `usize`
//! - Status results are `c_int`: 0 on success, a host error code otherwise
//! - I/O helpers return a byte count or a small negative sentinel

use std::ffi::{CStr, c_char};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use libc::c_int;
use tracing::error;

use super::monitor::{Monitor, Substrate};
use super::priority;
use super::signal;
use super::thread::{self, ExecutionContext, RuntimeEntry, ThreadManager};
use crate::boot::{SizeSpec, parse_memory_size};
use crate::sys::io_ops::{self, ReadByte, Transfer};
use crate::sys::{self, ExitStatus, Process};

fn errno_of(e: &std::io::Error) -> c_int {
    e.raw_os_error().unwrap_or(libc::EINVAL)
}

fn substrate() -> Substrate {
    Process::global()
        .map(|p| p.substrate())
        .unwrap_or_default()
}

// =========================================================================
// Process
// =========================================================================

/// Create and install the process lifecycle object.
///
/// Returns 0 on success (including when one is already installed) or the
/// host error code.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_initialize(verbose: u32) -> c_int {
    if Process::global().is_some() {
        return 0;
    }
    match Process::new(Substrate::default(), verbose) {
        Ok(process) => {
            Process::install(process);
            0
        }
        Err(e) => errno_of(&e),
    }
}

/// Exit the process with the runtime's chosen status.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_exit(status: c_int) -> ! {
    match Process::global() {
        Some(process) => process.exit_with_code(status),
        None => std::process::exit(status),
    }
}

// =========================================================================
// Boot arguments
// =========================================================================

fn boot_arguments() -> Option<&'static sys::BootArguments> {
    Process::global().and_then(|p| p.boot_arguments())
}

/// Copy `arg` into `buf` without a terminating NUL. Returns its length, or
/// -1 if `buf` is too small.
fn copy_arg(arg: &str, buf: &mut [u8]) -> c_int {
    let bytes = arg.as_bytes();
    match buf.get_mut(..bytes.len()) {
        Some(dest) => {
            dest.copy_from_slice(bytes);
            c_int::try_from(bytes.len()).unwrap_or(-1)
        }
        None => -1,
    }
}

/// Number of arguments handed on to the runtime; 0 before boot.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_arg_count() -> c_int {
    boot_arguments().map_or(0, |a| c_int::try_from(a.residual.len()).unwrap_or(c_int::MAX))
}

/// Copy argument `index` into `buf`. An `index` of -1 returns the argument
/// count instead. Returns the number of bytes copied (no NUL is written), or
/// -1 if `buf` is too small or `index` is out of range.
///
/// # Safety
/// `buf` must be valid for `len` bytes of writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_arg(index: c_int, buf: *mut c_char, len: c_int) -> c_int {
    if index == -1 {
        return bootvm_arg_count();
    }
    let Some(arg) = usize::try_from(index)
        .ok()
        .and_then(|i| boot_arguments()?.residual.get(i))
    else {
        return -1;
    };
    let Ok(len) = usize::try_from(len) else {
        return -1;
    };
    if buf.is_null() && len > 0 {
        return -1;
    }
    let slice = if len == 0 {
        &mut [][..]
    } else {
        unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), len) }
    };
    copy_arg(arg, slice)
}

/// Initial heap size in bytes accepted at boot; 0 before boot.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_initial_heap_size() -> u64 {
    boot_arguments().map_or(0, |a| a.initial_heap_size)
}

/// Maximum heap size in bytes accepted at boot; 0 before boot.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_maximum_heap_size() -> u64 {
    boot_arguments().map_or(0, |a| a.maximum_heap_size)
}

// =========================================================================
// Monitors
// =========================================================================

/// Create a monitor. Returns its handle, or 0 if the host refused.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_monitor_create() -> usize {
    match Monitor::new(substrate()) {
        Ok(monitor) => monitor.into_handle(),
        Err(e) => {
            error!(errno = e.raw_os_error(), error = %e, "monitor create failed");
            0
        }
    }
}

/// # Safety
/// `handle` must come from [`bootvm_monitor_create`], no thread may be
/// blocked on it, and it must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_monitor_destroy(handle: usize) {
    unsafe { Monitor::destroy_handle(handle) }
}

/// # Safety
/// `handle` must be a live monitor handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_monitor_enter(handle: usize) {
    unsafe { Monitor::from_handle(handle) }.enter();
}

/// # Safety
/// `handle` must be a live monitor handle entered by the calling thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_monitor_exit(handle: usize) {
    unsafe { Monitor::from_handle(handle) }.exit();
}

/// # Safety
/// `handle` must be a live monitor handle entered by the calling thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_monitor_wait(handle: usize) {
    unsafe { Monitor::from_handle(handle) }.wait();
}

/// Wait until woken or until the absolute wall-clock time `deadline_nanos`.
///
/// # Safety
/// `handle` must be a live monitor handle entered by the calling thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_monitor_wait_until(handle: usize, deadline_nanos: i64) {
    unsafe { Monitor::from_handle(handle) }.wait_until(deadline_nanos);
}

/// # Safety
/// `handle` must be a live monitor handle entered by the calling thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_monitor_broadcast(handle: usize) {
    unsafe { Monitor::from_handle(handle) }.broadcast();
}

// =========================================================================
// Threads
// =========================================================================

/// Start a runtime thread for execution context `context` that branches to
/// `entry` with frame pointer `frame_pointer`. Returns the host thread
/// handle, or 0 when no process is installed or `entry` is null.
///
/// # Safety
/// `entry` must be the address of a function with the [`RuntimeEntry`]
/// signature.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_thread_create(context: usize, entry: usize, frame_pointer: usize) -> usize {
    let Some(process) = Process::global() else {
        error!("thread create before bootvm_initialize");
        return 0;
    };
    if entry == 0 {
        error!(context, "thread create with a null entry point");
        return 0;
    }
    let entry: RuntimeEntry = unsafe { std::mem::transmute::<usize, RuntimeEntry>(entry) };
    let manager = ThreadManager::new(Arc::clone(process));
    manager
        .create(ExecutionContext::new(context), entry, frame_pointer)
        .pthread() as usize
}

/// Terminate the calling runtime thread. Unwinds through the runtime's
/// frames, so callers must themselves be `C-unwind`.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn bootvm_thread_terminate() -> ! {
    thread::terminate()
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_thread_yield() {
    thread::yield_now();
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_thread_id() -> usize {
    thread::thread_id() as usize
}

/// Runtime address of the calling thread's execution context, or 0.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_current_context() -> usize {
    thread::current_context().map_or(0, |c| c.address())
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_thread_bind_supported() -> c_int {
    thread::bind_supported() as c_int
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_thread_bind(cpu: c_int) -> c_int {
    let Ok(cpu) = usize::try_from(cpu) else {
        return libc::EINVAL;
    };
    match thread::bind(cpu) {
        Ok(()) => 0,
        Err(e) => errno_of(&e),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_priority_handle() -> usize {
    priority::priority_handle()
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_get_thread_priority(target: usize, handle: usize) -> c_int {
    priority::get_priority(target as libc::pthread_t, handle)
}

/// Returns 0 on success or the host error code.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_set_thread_priority(target: usize, handle: usize, offset: c_int) -> c_int {
    match priority::set_priority(target as libc::pthread_t, handle, offset) {
        Ok(()) => 0,
        Err(e) => errno_of(&e),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_setup_trap_handling() {
    signal::setup_trap_handling();
}

/// Route the hardware-trap signals to `handler`. Returns 0 or the host
/// error code.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_install_trap_handler(handler: signal::TrapHandler) -> c_int {
    match signal::install_trap_handler(handler, &signal::TRAP_SIGNALS) {
        Ok(()) => 0,
        Err(e) => errno_of(&e),
    }
}

/// Send the resume signal to `thread`. Returns 0 or the host error code.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_resume_thread(target: usize) -> c_int {
    match signal::send_resume_signal(target as libc::pthread_t) {
        Ok(()) => 0,
        Err(e) => errno_of(&e),
    }
}

/// Block the calling thread until it is sent the resume signal. Returns 0 or
/// the host error code.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_await_resume() -> c_int {
    match signal::await_resume_signal() {
        Ok(()) => 0,
        Err(e) => errno_of(&e),
    }
}

// =========================================================================
// Host queries
// =========================================================================

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_num_processors() -> c_int {
    c_int::try_from(sys::num_processors()).unwrap_or(c_int::MAX)
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_page_size() -> u64 {
    sys::page_size()
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_nano_time() -> i64 {
    sys::nano_time()
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_current_time_millis() -> i64 {
    sys::current_time_millis()
}

#[unsafe(no_mangle)]
pub extern "C" fn bootvm_nano_sleep(nanos: i64) {
    sys::nano_sleep(nanos);
}

/// Parse a memory-size literal for the runtime. Returns the rounded byte
/// count, or -1 after printing the error and usage hint to stderr.
///
/// # Safety
/// All string arguments must be valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_parse_memory_size(
    size_name: *const c_char,
    size_flag: *const c_char,
    round_to: u64,
    token: *const c_char,
    subtoken: *const c_char,
) -> i64 {
    if [size_name, size_flag, token, subtoken].iter().any(|p| p.is_null()) {
        return -1;
    }
    let (name, flag, token, subtoken) = unsafe {
        (
            CStr::from_ptr(size_name).to_string_lossy(),
            CStr::from_ptr(size_flag).to_string_lossy(),
            CStr::from_ptr(token).to_string_lossy(),
            CStr::from_ptr(subtoken).to_string_lossy(),
        )
    };
    let spec = SizeSpec {
        name: &name,
        flag: &flag,
        round_to: round_to.max(1),
        page_size: sys::page_size(),
    };
    let program = env!("CARGO_PKG_NAME");
    let mut console = std::io::stderr();
    match parse_memory_size(&spec, &token, &subtoken, program, &mut console) {
        Ok(bytes) => i64::try_from(bytes).unwrap_or(-1),
        Err(e) => {
            eprintln!("{program}: {e}\n{}", crate::boot::usage_hint(&spec));
            -1
        }
    }
}

// =========================================================================
// Blocking I/O
// =========================================================================

/// Returns the byte, -1 at end of file, -2 if the read would block, -3 on
/// any other error.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_read_byte(fd: RawFd) -> c_int {
    match io_ops::read_byte(fd) {
        Ok(ReadByte::Byte(b)) => b as c_int,
        Ok(ReadByte::Eof) => -1,
        Ok(ReadByte::WouldBlock) => -2,
        Err(_) => -3,
    }
}

/// Returns 0 on success, -2 if the write would block, -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_write_byte(fd: RawFd, byte: c_int) -> c_int {
    match io_ops::write_byte(fd, byte as u8) {
        Ok(Transfer::Done(_)) => 0,
        Ok(Transfer::WouldBlock) => -2,
        Err(_) => -1,
    }
}

/// Returns the count read (0 at end of file), -1 if the read would block,
/// -2 on error.
///
/// # Safety
/// `buf` must be valid for `count` bytes of writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_read_bytes(fd: RawFd, buf: *mut u8, count: c_int) -> c_int {
    let Ok(len) = usize::try_from(count) else {
        return -2;
    };
    if buf.is_null() && len > 0 {
        return -2;
    }
    let slice = if len == 0 {
        &mut [][..]
    } else {
        unsafe { std::slice::from_raw_parts_mut(buf, len) }
    };
    match io_ops::read_bytes(fd, slice) {
        Ok(Transfer::Done(n)) => n as c_int,
        Ok(Transfer::WouldBlock) => -1,
        Err(_) => -2,
    }
}

/// Returns the count written, -1 if the write would block, -3 if nobody
/// reads the other end, -2 on any other error.
///
/// # Safety
/// `buf` must be valid for `count` bytes of reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bootvm_write_bytes(fd: RawFd, buf: *const u8, count: c_int) -> c_int {
    let Ok(len) = usize::try_from(count) else {
        return -2;
    };
    if buf.is_null() && len > 0 {
        return -2;
    }
    let slice = if len == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(buf, len) }
    };
    match io_ops::write_bytes(fd, slice) {
        Ok(Transfer::Done(n)) => n as c_int,
        Ok(Transfer::WouldBlock) => -1,
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => -3,
        Err(_) => -2,
    }
}

/// Terminate with [`ExitStatus::SyscallTrouble`]; for runtime code that hit
/// an unrecoverable host failure.
#[unsafe(no_mangle)]
pub extern "C" fn bootvm_syscall_trouble() -> ! {
    sys::fatal(ExitStatus::SyscallTrouble)
}
