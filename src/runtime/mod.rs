//! Runtime kernel for the bootstrap layer
//!
//! This module provides the host-facing primitives the runtime is built on.
//! It separates:
//! - Thread lifecycle and termination (thread.rs)
//! - Monitors over two locking substrates (monitor/)
//! - Per-thread signal stacks and trap handling (signal.rs)
//! - Priority mapping (priority.rs)
//! - Extern "C" stubs callable from compiled runtime code (stubs.rs)

pub mod monitor;
pub mod priority;
pub mod signal;
pub mod stubs;
pub mod thread;


pub use monitor::{Monitor, RawMonitor, Substrate};
pub use thread::{
    ExecStatus, ExecutionContext, RuntimeEntry, RuntimeThreadHandle, ThreadManager, terminate,
};
