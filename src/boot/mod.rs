//! Boot configuration: turns the raw command line into a validated
//! [`BootConfiguration`].
//!
//! Directives are positional. The loader consumes the ones it understands,
//! forwards runtime directives untouched, and once the first application
//! token (or an unknown directive) is seen copies everything after it
//! verbatim.

pub mod error;
pub mod memory_size;
pub mod usage;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

pub use error::{BootError, ImageKind, IntegerError};
pub use memory_size::{MemorySizeError, SizeSpec, parse_memory_size, usage_hint};

use crate::sys::{BootArguments, ExitStatus};

const MIB: u64 = 1024 * 1024;

/// Directives forwarded to the runtime as a single token, matched by prefix.
const FORWARDED_PREFIXES: &[&str] = &[
    "-D",
    "-X:vm",
    "-X:gc",
    "-X:aos",
    "-X:irc",
    "-X:recomp",
    "-X:base",
    "-X:opt",
    "-javaagent:",
    "-X:vmClasses=",
    "-Xbootclasspath/p:",
    "-Xbootclasspath/a:",
    "-X:availableProcessors=",
];

/// Directives forwarded to the runtime as a single token, matched exactly.
const FORWARDED_EXACT: &[&str] = &["-verbose", "-verbose:class", "-verbose:jni"];

/// Heap sizes used when the command line does not give one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDefaults {
    pub initial: u64,
    pub maximum: u64,
}

impl Default for HeapDefaults {
    fn default() -> Self {
        Self {
            initial: 50 * MIB,
            maximum: 100 * MIB,
        }
    }
}

/// Where log output goes instead of stderr.
#[derive(Debug)]
pub struct LogRedirect {
    pub path: PathBuf,
    pub file: File,
}

/// Validated boot settings. Built once by [`BootParser::parse`].
#[derive(Debug)]
pub struct BootConfiguration {
    initial_heap_size: u64,
    maximum_heap_size: u64,
    boot_code_file: PathBuf,
    boot_data_file: PathBuf,
    boot_rmap_file: PathBuf,
    verbose: u32,
    verbose_boot: u32,
    log_redirect: Option<LogRedirect>,
    runtime_args: Vec<String>,
    application_args: Vec<String>,
}

impl BootConfiguration {
    pub fn initial_heap_size(&self) -> u64 {
        self.initial_heap_size
    }

    pub fn maximum_heap_size(&self) -> u64 {
        self.maximum_heap_size
    }

    pub fn image_path(&self, kind: ImageKind) -> &PathBuf {
        match kind {
            ImageKind::Code => &self.boot_code_file,
            ImageKind::Data => &self.boot_data_file,
            ImageKind::RefMap => &self.boot_rmap_file,
        }
    }

    pub fn boot_code_file(&self) -> &PathBuf {
        &self.boot_code_file
    }

    pub fn boot_data_file(&self) -> &PathBuf {
        &self.boot_data_file
    }

    pub fn boot_rmap_file(&self) -> &PathBuf {
        &self.boot_rmap_file
    }

    pub fn verbose(&self) -> u32 {
        self.verbose
    }

    pub fn verbose_boot(&self) -> u32 {
        self.verbose_boot
    }

    pub fn log_redirect(&self) -> Option<&LogRedirect> {
        self.log_redirect.as_ref()
    }

    /// Directives the loader did not interpret, in command-line order.
    pub fn runtime_args(&self) -> &[String] {
        &self.runtime_args
    }

    /// The application class (or first unrecognized token) and everything
    /// after it.
    pub fn application_args(&self) -> &[String] {
        &self.application_args
    }

    /// Everything handed on to the runtime: forwarded directives followed by
    /// the application arguments.
    pub fn residual_args(&self) -> Vec<String> {
        self.runtime_args
            .iter()
            .chain(&self.application_args)
            .cloned()
            .collect()
    }
    /// The part of the configuration the runtime reads back after boot.
    pub fn boot_arguments(&self) -> BootArguments {
        BootArguments {
            initial_heap_size: self.initial_heap_size,
            maximum_heap_size: self.maximum_heap_size,
            residual: self.residual_args(),
        }
    }
}

/// Result of a successful parse.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Boot the runtime with this configuration.
    Launch(BootConfiguration),
    /// An informational directive was handled; exit with this status.
    Exit(ExitStatus),
}

/// Values collected during the pass, before validation.
#[derive(Default)]
struct Collected {
    initial_heap_size: Option<u64>,
    maximum_heap_size: Option<u64>,
    boot_code_file: Option<PathBuf>,
    boot_data_file: Option<PathBuf>,
    boot_rmap_file: Option<PathBuf>,
    verbose: u32,
    verbose_boot: u32,
    log_redirect: Option<LogRedirect>,
    runtime_args: Vec<String>,
    application_args: Vec<String>,
}

enum Step {
    Continue,
    Exit(ExitStatus),
}

/// Parser for the loader's command line. Informational output (usage,
/// version, rounding notes) goes to `console`.
pub struct BootParser<W: Write> {
    program: String,
    page_size: u64,
    defaults: HeapDefaults,
    console: W,
}

impl<W: Write> BootParser<W> {
    pub fn new(program: impl Into<String>, page_size: u64, console: W) -> Self {
        Self {
            program: program.into(),
            page_size,
            defaults: HeapDefaults::default(),
            console,
        }
    }

    pub fn with_defaults(mut self, defaults: HeapDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn console(&self) -> &W {
        &self.console
    }

    pub fn into_console(self) -> W {
        self.console
    }

    /// Parse `args` (without the program name).
    pub fn parse<I, S>(&mut self, args: I) -> Result<ParseOutcome, BootError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collected = Collected::default();
        let mut args = args.into_iter().map(Into::<String>::into);
        let mut application = false;

        while let Some(token) = args.next() {
            if application {
                collected.application_args.push(token);
                continue;
            }
            if !token.starts_with('-') {
                collected.application_args.push(token);
                application = true;
                continue;
            }

            if token == "-cp" || token == "-classpath" {
                let path = args
                    .next()
                    .ok_or_else(|| BootError::MissingClasspath { token: token.clone() })?;
                collected.runtime_args.push(token);
                collected.runtime_args.push(path);
                continue;
            }

            match self.directive(&token, &mut collected)? {
                Some(Step::Continue) => {}
                Some(Step::Exit(status)) => return Ok(ParseOutcome::Exit(status)),
                None => {
                    debug!(%token, "unrecognized directive; treating the rest as application arguments");
                    collected.application_args.push(token);
                    application = true;
                }
            }
        }

        self.finish(collected).map(ParseOutcome::Launch)
    }

    /// Handle one single-token directive. `None` means it is not ours.
    fn directive(&mut self, token: &str, collected: &mut Collected) -> Result<Option<Step>, BootError> {
        match token {
            "-help" | "-?" => {
                usage::standard_usage(&self.program, &mut self.console)?;
                return Ok(Some(Step::Exit(ExitStatus::Success)));
            }
            "-X" => {
                usage::nonstandard_usage(&self.program, &mut self.console)?;
                return Ok(Some(Step::Exit(ExitStatus::Success)));
            }
            "-X:verbose" => {
                collected.verbose += 1;
                return Ok(Some(Step::Continue));
            }
            "-server" | "-client" => return Ok(Some(Step::Continue)),
            "-version" => {
                usage::short_version(&mut self.console)?;
                return Ok(Some(Step::Exit(ExitStatus::Success)));
            }
            "-fullversion" => {
                usage::full_version(&self.defaults, &mut self.console)?;
                return Ok(Some(Step::Exit(ExitStatus::Success)));
            }
            "-showversion" => {
                usage::short_version(&mut self.console)?;
                return Ok(Some(Step::Continue));
            }
            "-showfullversion" => {
                usage::full_version(&self.defaults, &mut self.console)?;
                return Ok(Some(Step::Continue));
            }
            _ => {}
        }

        if let Some(value) = token.strip_prefix("-X:verboseBoot=") {
            collected.verbose_boot = parse_level(value).map_err(|kind| BootError::VerboseBoot {
                token: token.to_string(),
                kind,
            })?;
            return Ok(Some(Step::Continue));
        }

        if let Some(rest) = token.strip_prefix("-verbose:gc") {
            let level = if rest.is_empty() {
                1
            } else {
                // Skip the '=' of "-verbose:gc=<n>".
                let value = rest.get(1..).unwrap_or("");
                parse_level(value).map_err(|kind| BootError::VerboseGc {
                    token: token.to_string(),
                    kind,
                })?
            };
            collected.runtime_args.push(format!("-X:gc:verbose={level}"));
            return Ok(Some(Step::Continue));
        }

        if let Some(subtoken) = token.strip_prefix("-Xms") {
            let size = self.memory_size("initial heap size", "ms", token, subtoken)?;
            collected.initial_heap_size = Some(size);
            return Ok(Some(Step::Continue));
        }

        if let Some(subtoken) = token.strip_prefix("-Xmx") {
            let size = self.memory_size("maximum heap size", "mx", token, subtoken)?;
            collected.maximum_heap_size = Some(size);
            return Ok(Some(Step::Continue));
        }

        if let Some(path) = token.strip_prefix("-X:sysLogfile=") {
            let path = PathBuf::from(path);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| BootError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            writeln!(
                self.console,
                "{}: redirecting sysWrites to \"{}\"",
                self.program,
                path.display()
            )?;
            collected.log_redirect = Some(LogRedirect { path, file });
            return Ok(Some(Step::Continue));
        }

        if let Some(path) = token.strip_prefix(ImageKind::Code.directive()) {
            collected.boot_code_file = Some(PathBuf::from(path));
            return Ok(Some(Step::Continue));
        }
        if let Some(path) = token.strip_prefix(ImageKind::Data.directive()) {
            collected.boot_data_file = Some(PathBuf::from(path));
            return Ok(Some(Step::Continue));
        }
        if let Some(path) = token.strip_prefix(ImageKind::RefMap.directive()) {
            collected.boot_rmap_file = Some(PathBuf::from(path));
            return Ok(Some(Step::Continue));
        }

        if FORWARDED_EXACT.contains(&token)
            || FORWARDED_PREFIXES.iter().any(|prefix| token.starts_with(prefix))
        {
            collected.runtime_args.push(token.to_string());
            return Ok(Some(Step::Continue));
        }

        Ok(None)
    }

    fn memory_size(
        &mut self,
        name: &str,
        flag: &str,
        token: &str,
        subtoken: &str,
    ) -> Result<u64, BootError> {
        let spec = SizeSpec {
            name,
            flag,
            round_to: self.page_size,
            page_size: self.page_size,
        };
        parse_memory_size(&spec, token, subtoken, &self.program, &mut self.console).map_err(|source| {
            match source {
                MemorySizeError::Console(e) => BootError::Console(e),
                source => BootError::MemorySize {
                    source,
                    hint: usage_hint(&spec),
                },
            }
        })
    }

    fn finish(&self, collected: Collected) -> Result<BootConfiguration, BootError> {
        let mut initial = collected.initial_heap_size.unwrap_or(self.defaults.initial);
        let mut maximum = collected.maximum_heap_size.unwrap_or(self.defaults.maximum);

        // Only one bound given: move the other one to meet it.
        match (collected.initial_heap_size, collected.maximum_heap_size) {
            (None, Some(_)) if initial > maximum => initial = maximum,
            (Some(_), None) if initial > maximum => maximum = initial,
            _ => {}
        }
        if maximum < initial {
            return Err(BootError::HeapSizeMismatch { initial, maximum });
        }

        let require = |path: Option<PathBuf>, kind: ImageKind| {
            path.ok_or(BootError::MissingBootImage { kind })
        };
        let boot_code_file = require(collected.boot_code_file, ImageKind::Code)?;
        let boot_data_file = require(collected.boot_data_file, ImageKind::Data)?;
        let boot_rmap_file = require(collected.boot_rmap_file, ImageKind::RefMap)?;

        debug!(
            initial,
            maximum,
            code = %boot_code_file.display(),
            data = %boot_data_file.display(),
            rmap = %boot_rmap_file.display(),
            verbose = collected.verbose,
            "boot configuration"
        );

        Ok(BootConfiguration {
            initial_heap_size: initial,
            maximum_heap_size: maximum,
            boot_code_file,
            boot_data_file,
            boot_rmap_file,
            verbose: collected.verbose,
            verbose_boot: collected.verbose_boot,
            log_redirect: collected.log_redirect,
            runtime_args: collected.runtime_args,
            application_args: collected.application_args,
        })
    }
}

/// C `strtol(s, &end, 0)`: leading whitespace, optional sign, then `0x` hex,
/// `0` octal or decimal digits. Returns the value, whether it overflowed,
/// and the unparsed rest. With no digits the value is 0 and the rest is
/// all of `s`.
pub fn strtol(s: &str) -> (i64, bool, &str) {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let negative = match bytes.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };

    let radix = if bytes.get(i) == Some(&b'0')
        && matches!(bytes.get(i + 1), Some(b'x' | b'X'))
        && bytes.get(i + 2).is_some_and(|b| b.is_ascii_hexdigit())
    {
        i += 2;
        16
    } else if bytes.get(i) == Some(&b'0') {
        8
    } else {
        10
    };

    let digits_start = i;
    let mut magnitude: i128 = 0;
    let mut overflow = false;
    while let Some(d) = bytes.get(i).and_then(|b| (*b as char).to_digit(radix)) {
        magnitude = magnitude * radix as i128 + d as i128;
        if magnitude > i64::MAX as i128 + 1 {
            overflow = true;
            magnitude = i64::MAX as i128 + 1;
        }
        i += 1;
    }
    if i == digits_start {
        return (0, false, s);
    }

    let signed = if negative { -magnitude } else { magnitude };
    if signed > i64::MAX as i128 {
        return (i64::MAX, true, &s[i..]);
    }
    (signed as i64, overflow, &s[i..])
}

/// Non-negative level in `int` range with only whitespace after it.
fn parse_level(value: &str) -> Result<u32, IntegerError> {
    let (level, overflow, rest) = strtol(value);
    if level < 0 {
        return Err(IntegerError::Negative);
    }
    if overflow || level > i32::MAX as i64 {
        return Err(IntegerError::TooBig);
    }
    if !rest.trim_start().is_empty() {
        return Err(IntegerError::NotANumber(value.to_string()));
    }
    Ok(level as u32)
}
