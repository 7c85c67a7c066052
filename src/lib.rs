//! Native bootstrap and OS service layer for a managed-language runtime.
//!
//! The binary (main.rs) parses the boot command line, installs logging and
//! the process lifecycle object, then hands control to the first runtime
//! thread. Compiled runtime code reaches the same services through the
//! `bootvm_*` symbols in [`runtime::stubs`].

pub mod boot;
pub mod logging;
pub mod runtime;
pub mod sys;

#[cfg(test)]
mod tests;

pub use boot::{BootConfiguration, BootError, BootParser, HeapDefaults, ParseOutcome};
pub use runtime::*;
pub use sys::{ExitStatus, Process};
