//! End-to-end tests: boot configuration flowing into runtime threads that
//! coordinate through monitors and leave through `terminate`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::boot::{BootParser, ParseOutcome};
use crate::runtime::monitor::{Monitor, Substrate};
use crate::runtime::priority;
use crate::runtime::{ExecStatus, ExecutionContext, ThreadManager, terminate};
use crate::sys::Process;

fn wait_for_status(context: &ExecutionContext, status: ExecStatus) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while context.status() != status {
        assert!(
            Instant::now() < deadline,
            "context {:#x} stuck in {:?}",
            context.address(),
            context.status()
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

static HEAP_SEEN: AtomicUsize = AtomicUsize::new(0);

extern "C-unwind" fn record_heap(_context: usize, frame_pointer: usize) {
    HEAP_SEEN.store(frame_pointer, Ordering::SeqCst);
}

#[test]
fn test_parsed_configuration_reaches_runtime_thread() {
    let args = [
        "-Xms64M", "-Xmx256M", "-X:ic=a.img", "-X:id=b.img", "-X:ir=c.img", "MyApp", "--flag",
    ];
    let outcome = BootParser::new("bootvm", 4096, Vec::new()).parse(args).unwrap();
    let ParseOutcome::Launch(config) = outcome else {
        panic!("expected launch");
    };
    assert_eq!(config.residual_args(), ["MyApp", "--flag"]);

    let process = Process::new(Substrate::default(), config.verbose()).unwrap();
    assert!(process.set_boot_arguments(config.boot_arguments()));
    let published = process.boot_arguments().unwrap();
    assert_eq!(published.residual, ["MyApp", "--flag"]);
    assert_eq!(published.maximum_heap_size, 256 * 1024 * 1024);

    let manager = ThreadManager::new(process.clone());
    let context = ExecutionContext::new(0x1000);
    manager.create(
        context.clone(),
        record_heap,
        config.initial_heap_size() as usize,
    );
    wait_for_status(&context, ExecStatus::Terminated);

    assert_eq!(HEAP_SEEN.load(Ordering::SeqCst), 64 * 1024 * 1024);
    assert!(process.ledger().is_balanced());
}

struct Mailbox {
    monitor: Monitor,
    ready: AtomicBool,
    received: AtomicUsize,
}

static MAILBOX: OnceLock<Mailbox> = OnceLock::new();

extern "C-unwind" fn wait_for_mail(_context: usize, _frame_pointer: usize) {
    let mailbox = MAILBOX.get().unwrap();
    mailbox.monitor.enter();
    while !mailbox.ready.load(Ordering::SeqCst) {
        mailbox.monitor.wait();
    }
    mailbox.received.fetch_add(1, Ordering::SeqCst);
    mailbox.monitor.exit();
    terminate();
}

#[test]
fn test_waiters_released_by_broadcast_then_terminate() {
    let mailbox = MAILBOX.get_or_init(|| Mailbox {
        monitor: Monitor::new(Substrate::Pthread).unwrap(),
        ready: AtomicBool::new(false),
        received: AtomicUsize::new(0),
    });
    let process = Process::new(Substrate::Pthread, 0).unwrap();
    let manager = ThreadManager::new(process.clone());

    let contexts: Vec<Arc<ExecutionContext>> =
        (0..4).map(|i| ExecutionContext::new(0x2000 + i)).collect();
    for context in &contexts {
        manager.create(context.clone(), wait_for_mail, 0);
    }
    for context in &contexts {
        wait_for_status(context, ExecStatus::Running);
    }
    assert_eq!(process.ledger().signal_stacks.live(), 4);
    assert_eq!(process.ledger().termination_contexts.live(), 4);

    mailbox.monitor.enter();
    mailbox.ready.store(true, Ordering::SeqCst);
    mailbox.monitor.broadcast();
    mailbox.monitor.exit();

    for context in &contexts {
        wait_for_status(context, ExecStatus::Terminated);
    }
    assert_eq!(mailbox.received.load(Ordering::SeqCst), 4);
    assert!(process.ledger().is_balanced());
    assert_eq!(process.ledger().signal_stacks.released(), 4);
    assert_eq!(process.ledger().termination_contexts.released(), 4);
    assert_eq!(process.ledger().start_arguments.released(), 4);
}

static PRIORITY_DELTA: AtomicI64 = AtomicI64::new(i64::MIN);
const NO_PRIORITY_MECHANISM: i64 = i64::MAX;

extern "C-unwind" fn lower_own_priority(_context: usize, _frame_pointer: usize) {
    let me = unsafe { libc::pthread_self() };
    let handle = priority::priority_handle();
    if !priority::has_sched_priority(me) && me as usize == handle {
        PRIORITY_DELTA.store(NO_PRIORITY_MECHANISM, Ordering::SeqCst);
        return;
    }
    let before = priority::get_priority(me, handle);
    let delta = match priority::set_priority(me, handle, before - 1) {
        Ok(()) => priority::get_priority(me, handle) - before,
        Err(_) => 0,
    };
    PRIORITY_DELTA.store(delta as i64, Ordering::SeqCst);
}

#[test]
fn test_priority_adjusted_from_runtime_thread() {
    let process = Process::new(Substrate::Portable, 0).unwrap();
    let manager = ThreadManager::new(process.clone());
    let context = ExecutionContext::new(0x3000);
    manager.create(context.clone(), lower_own_priority, 0);
    wait_for_status(&context, ExecStatus::Terminated);
    let delta = PRIORITY_DELTA.load(Ordering::SeqCst);
    if delta != NO_PRIORITY_MECHANISM {
        assert_eq!(delta, -1);
    }
    assert!(process.ledger().is_balanced());
}
