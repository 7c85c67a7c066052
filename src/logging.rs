//! Process-wide `tracing` subscriber.
//!
//! The level follows the loader's verbosity directives unless `RUST_LOG` is
//! set. Output goes to stderr, or to the `-X:sysLogfile` target when one was
//! given.

use std::io;
use std::sync::Mutex;

use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::boot::BootConfiguration;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to duplicate log file handle: {0}")]
    LogFile(#[from] io::Error),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Level implied by `-X:verbose` (repeated) and `-X:verboseBoot=<n>`.
pub fn level_for(verbose: u32, verbose_boot: u32) -> LevelFilter {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    if verbose_boot > 0 {
        level.max(LevelFilter::DEBUG)
    } else {
        level
    }
}

fn filter_for(config: &BootConfiguration) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level_for(config.verbose(), config.verbose_boot()).into())
        .from_env_lossy()
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &BootConfiguration) -> Result<(), LoggingError> {
    let (writer, ansi) = match config.log_redirect() {
        Some(redirect) => (BoxMakeWriter::new(Mutex::new(redirect.file.try_clone()?)), false),
        None => (BoxMakeWriter::new(io::stderr), true),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(config))
        .with_writer(writer)
        .with_ansi(ansi)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| LoggingError::Subscriber(e.to_string()))
}
