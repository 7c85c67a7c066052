//! Usage and version text printed by the informational directives.

use std::io::{self, Write};

use super::HeapDefaults;

const MIB: u64 = 1024 * 1024;

const NON_STANDARD_USAGE: &[&str] = &[
    "  -X                         Print usage on nonstandard options",
    "  -X:verbose                 Print out additional lowlevel information",
    "  -X:verboseBoot=<number>    Print out messages while booting VM",
    "  -Xms<number><unit>         Initial size of heap",
    "  -Xmx<number><unit>         Maximum size of heap",
    "  -X:sysLogfile=<filename>   Write standard error message to <filename>",
    "  -X:ic=<filename>           Read boot image code from <filename>",
    "  -X:id=<filename>           Read boot image data from <filename>",
    "  -X:ir=<filename>           Read boot image ref map from <filename>",
    "  -X:vm:<option>             Pass <option> to virtual machine",
    "        :help                Print usage choices for -X:vm",
    "  -X:gc:<option>             Pass <option> on to GC subsystem",
    "        :help                Print usage choices for -X:gc",
    "  -X:aos:<option>            Pass <option> on to adaptive optimization system",
    "        :help                Print usage choices for -X:aos",
    "  -X:irc:<option>            Pass <option> on to the initial runtime compiler",
    "        :help                Print usage choices for -X:irc",
    "  -X:recomp:<option>         Pass <option> on to the recompilation compiler(s)",
    "        :help                Print usage choices for -X:recomp",
    "  -X:base:<option>           Pass <option> on to the baseline compiler",
    "        :help                Print usage choices for -X:base",
    "  -X:opt:<option>            Pass <option> on to the optimizing compiler",
    "        :help                Print usage choices for -X:opt",
    "  -X:vmClasses=<path>        Load the runtime's own classes from <path>,",
    "                             a list like one would give to -classpath.",
    "  -Xbootclasspath/p:<cp>     (p)repend bootclasspath with specified classpath",
    "  -Xbootclasspath/a:<cp>     (a)ppend specified classpath to bootclasspath",
    "  -X:availableProcessors=<n> desired level of application parallelism",
];

pub fn standard_usage(program: &str, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Usage: {program} [-options] class [args...]")?;
    writeln!(out, "          (to execute a class)")?;
    writeln!(out, "   or  {program} [-options] -jar jarfile [args...]")?;
    writeln!(out, "          (to execute a jar file)")?;
    writeln!(out)?;
    writeln!(out, "where options include:")?;
    writeln!(out, "    -cp -classpath <directories and zip/jar files separated by :>")?;
    writeln!(out, "              set search path for application classes and resources")?;
    writeln!(out, "    -D<name>=<value>")?;
    writeln!(out, "              set a system property")?;
    writeln!(out, "    -verbose[:class|:gc|:jni]")?;
    writeln!(out, "              enable verbose output")?;
    writeln!(out, "    -version  print version")?;
    writeln!(out, "    -showversion")?;
    writeln!(out, "              print version and continue")?;
    writeln!(out, "    -fullversion")?;
    writeln!(out, "              like version but with more information")?;
    writeln!(out, "    -? -help  print this message")?;
    writeln!(out, "    -X        print help on non-standard options")?;
    writeln!(out, "    -javaagent:<jarpath>[=<options>]")?;
    writeln!(out, "              load an instrumentation agent")?;
    writeln!(out)
}

pub fn nonstandard_usage(program: &str, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Usage: {program} [options] class [args...]")?;
    writeln!(out, "          (to execute a class)")?;
    writeln!(out, "where options include")?;
    for line in NON_STANDARD_USAGE {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn short_version(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub fn full_version(defaults: &HeapDefaults, out: &mut dyn Write) -> io::Result<()> {
    short_version(out)?;
    writeln!(
        out,
        "\thost config: {arch}-{os}\n\ttarget config: {arch}-{os}",
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
    )?;
    writeln!(out, "\theap default initial size: {} MiBytes", defaults.initial / MIB)?;
    writeln!(out, "\theap default maximum size: {} MiBytes", defaults.maximum / MIB)
}
