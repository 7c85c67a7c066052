use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::memory_size::MemorySizeError;
use crate::sys::ExitStatus;

const MIB: u64 = 1024 * 1024;

/// Why an integer directive value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegerError {
    Negative,
    TooBig,
    NotANumber(String),
}

impl IntegerError {
    fn describe(&self, what: &str) -> String {
        match self {
            IntegerError::Negative => format!("You may not specify a negative {what} value"),
            IntegerError::TooBig => "too big a number to represent internally".to_string(),
            IntegerError::NotANumber(text) => format!("I don't recognize \"{text}\" as a number"),
        }
    }
}

/// One of the three boot image files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Code,
    Data,
    RefMap,
}

impl ImageKind {
    pub fn directive(self) -> &'static str {
        match self {
            ImageKind::Code => "-X:ic=",
            ImageKind::Data => "-X:id=",
            ImageKind::RefMap => "-X:ir=",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ImageKind::Code => "code",
            ImageKind::Data => "data",
            ImageKind::RefMap => "ref map",
        }
    }
}

/// A rejected command line. Every variant maps to
/// [`ExitStatus::BadCommandLineArg`].
#[derive(Debug, Error)]
pub enum BootError {
    #[error("{source}\n{hint}")]
    MemorySize {
        source: MemorySizeError,
        hint: String,
    },

    #[error("\"{token}\": {}", .kind.describe("verboseBoot"))]
    VerboseBoot { token: String, kind: IntegerError },

    #[error(
        "\"{token}\": {}\n\tplease specify GC verbose level as \"-verbose:gc=<number>\" or as \"-verbose:gc\"",
        .kind.describe("GC verbose")
    )]
    VerboseGc { token: String, kind: IntegerError },

    #[error("can't open SysTraceFile \"{}\": {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("\"{token}\" must be followed by a class path")]
    MissingClasspath { token: String },

    #[error(
        "maximum heap size {} MiB is less than initial heap size {} MiB",
        .maximum / MIB,
        .initial / MIB
    )]
    HeapSizeMismatch { initial: u64, maximum: u64 },

    #[error(
        "please specify name of boot image {} file using \"{}<filename>\"",
        .kind.description(),
        .kind.directive()
    )]
    MissingBootImage { kind: ImageKind },

    #[error("console write failed: {0}")]
    Console(#[from] io::Error),
}

impl BootError {
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::BadCommandLineArg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = BootError::HeapSizeMismatch {
            initial: 300 * MIB,
            maximum: 200 * MIB,
        };
        assert_eq!(
            err.to_string(),
            "maximum heap size 200 MiB is less than initial heap size 300 MiB"
        );

        let err = BootError::MissingBootImage {
            kind: ImageKind::RefMap,
        };
        assert_eq!(
            err.to_string(),
            "please specify name of boot image ref map file using \"-X:ir=<filename>\""
        );

        let err = BootError::VerboseBoot {
            token: "-X:verboseBoot=-1".into(),
            kind: IntegerError::Negative,
        };
        assert_eq!(
            err.to_string(),
            "\"-X:verboseBoot=-1\": You may not specify a negative verboseBoot value"
        );
        assert_eq!(err.exit_status(), ExitStatus::BadCommandLineArg);
    }
}
