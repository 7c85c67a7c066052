use std::env;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bootvm::boot::{BootConfiguration, BootParser, ImageKind, ParseOutcome};
use bootvm::logging;
use bootvm::runtime::monitor::{Monitor, Substrate};
use bootvm::runtime::{ExecutionContext, ThreadManager};
use bootvm::sys::{self, ExitStatus, Process};
use tracing::{debug, error, info};

/// Execution context address of the first virtual processor.
const PRIMORDIAL_CONTEXT: usize = 1;

fn program_name(argv0: Option<String>) -> String {
    argv0
        .as_deref()
        .and_then(|p| Path::new(p).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

extern "C-unwind" fn primordial_entry(context: usize, frame_pointer: usize) {
    let Some(process) = Process::global() else {
        sys::fatal(ExitStatus::MiscTrouble);
    };
    let args = process.boot_arguments().map(|a| a.residual.as_slice()).unwrap_or_default();
    info!(context, frame_pointer, ?args, "first virtual processor running");
    process.exit(ExitStatus::Success)
}

fn check_images(program: &str, config: &BootConfiguration) {
    for kind in [ImageKind::Code, ImageKind::Data, ImageKind::RefMap] {
        let path = config.image_path(kind);
        if let Err(e) = std::fs::metadata(path) {
            eprintln!(
                "{program}: can't find boot image {} file \"{}\": {e}",
                kind.description(),
                path.display()
            );
            error!(path = %path.display(), error = %e, "boot image missing");
            sys::fatal(ExitStatus::MiscTrouble);
        }
    }
}

fn main() {
    let mut argv = env::args();
    let program = program_name(argv.next());

    let page_size = match sys::determine_page_size() {
        Ok(size) if size > 0 => size,
        Ok(size) => {
            eprintln!("{program}: invalid page size {size}");
            sys::fatal(ExitStatus::MiscTrouble);
        }
        Err(e) => {
            eprintln!("{program}: can't determine page size: {e}");
            sys::fatal(ExitStatus::MiscTrouble);
        }
    };

    let mut parser = BootParser::new(program.clone(), page_size, io::stdout());
    let config = match parser.parse(argv) {
        Ok(ParseOutcome::Launch(config)) => config,
        Ok(ParseOutcome::Exit(status)) => sys::exit(status),
        Err(e) => {
            eprintln!("{program}: {e}");
            sys::exit(e.exit_status());
        }
    };

    if let Err(e) = logging::init(&config) {
        eprintln!("{program}: {e}");
    }
    debug!(
        initial_heap = config.initial_heap_size(),
        maximum_heap = config.maximum_heap_size(),
        runtime_args = ?config.runtime_args(),
        "boot configuration accepted"
    );

    let process = match Process::new(Substrate::default(), config.verbose()) {
        Ok(process) => Process::install(process),
        Err(e) => {
            error!(errno = e.raw_os_error(), error = %e, "can't create process monitor");
            sys::fatal(ExitStatus::SyscallTrouble);
        }
    };

    check_images(&program, &config);
    process.set_boot_arguments(config.boot_arguments());

    let manager = ThreadManager::new(Arc::clone(&process));
    let handle = manager.create(
        ExecutionContext::new(PRIMORDIAL_CONTEXT),
        primordial_entry,
        0,
    );
    debug!(serial = handle.serial(), "first virtual processor started");

    // The runtime owns the process from here on; this thread only waits.
    let parked = match Monitor::new(process.substrate()) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!(errno = e.raw_os_error(), error = %e, "can't create parking monitor");
            process.exit(ExitStatus::SyscallTrouble);
        }
    };
    parked.enter();
    loop {
        parked.wait();
    }
}
