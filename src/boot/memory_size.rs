//! Memory-size literals: `<number>[K|M|G|pages]`.
//!
//! `<number>` is a decimal or `0x` hexadecimal floating literal. Units are
//! powers of 1024 ("M" means MiB) and are case-insensitive; `pages` counts
//! host virtual memory pages. Without a unit the value is in bytes.

use std::io::{self, Write};

use thiserror::Error;
use tracing::info;

/// What is being sized, for messages and rounding.
#[derive(Debug, Clone, Copy)]
pub struct SizeSpec<'a> {
    /// Human name, e.g. "initial heap size".
    pub name: &'a str,
    /// Flag letters after `-X`, e.g. "ms".
    pub flag: &'a str,
    /// Result is rounded up to a multiple of this.
    pub round_to: u64,
    /// Host page size, the unit of `pages`.
    pub page_size: u64,
}

#[derive(Debug, Error)]
pub enum MemorySizeError {
    #[error("\"{token}\": -X{flag} must be followed by a number.")]
    NotANumber { token: String, flag: String },

    #[error("\"{token}\": I don't recognize \"{unit}\" as a unit of memory size")]
    UnknownUnit { token: String, unit: String },

    #[error("You may not specify a negative {name};\n\tit just doesn't make any sense.")]
    Negative { name: String },

    #[error("You may not specify a zero {name};\n\tit just doesn't make any sense.")]
    Zero { name: String },

    #[error("\"{subtoken}\": out of range to represent internally")]
    OutOfRange { subtoken: String },

    #[error("console write failed: {0}")]
    Console(#[from] io::Error),
}

/// The multi-line explanation shown after any size error.
pub fn usage_hint(spec: &SizeSpec<'_>) -> String {
    let flag = spec.flag;
    let mut hint = format!(
        "\tPlease specify {name} as follows:\n\
         \t    in bytes, using \"-X{flag}<positive number>\",\n\
         \tor, in kilobytes, using \"-X{flag}<positive number>K\",\n\
         \tor, in virtual memory pages of {page} bytes, using\n\
         \t\t\"-X{flag}<positive number>pages\",\n\
         \tor, in megabytes, using \"-X{flag}<positive number>M\",\n\
         \tor, in gigabytes, using \"-X{flag}<positive number>G\"\n  \
         <positive number> can be a floating point value or a hex value like 0x10cafe0.",
        name = spec.name,
        page = spec.page_size,
    );
    if spec.round_to != 1 {
        hint.push_str("\n  The # of bytes will be rounded up to a multiple of");
        if spec.round_to == spec.page_size {
            hint.push_str("\n  the virtual memory page size:");
        }
        hint.push_str(&format!(" {}", spec.round_to));
    }
    hint
}

/// Split `s` into the longest leading floating literal and the rest, in the
/// manner of C `strtod`. Returns `None` when no literal is present.
pub fn split_number(s: &str) -> Option<(f64, &str)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let start = i;
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

    if let Some((magnitude, end)) = split_hex(bytes, i) {
        let value = if negative { -magnitude } else { magnitude };
        return Some((value, &s[end..]));
    }

    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut mantissa_digits = i - digits_start;
    if bytes.get(i) == Some(&b'.') {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        mantissa_digits += j - frac_start;
        if mantissa_digits > 0 {
            i = j;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }

    let value: f64 = s[start..i].parse().ok()?;
    Some((value, &s[i..]))
}

/// Hexadecimal literal starting at `i`: `0x` digits, optional fraction,
/// optional binary exponent `p[+-]n`.
fn split_hex(bytes: &[u8], mut i: usize) -> Option<(f64, usize)> {
    if bytes.get(i) != Some(&b'0') || !matches!(bytes.get(i + 1), Some(b'x' | b'X')) {
        return None;
    }
    i += 2;
    let mut value = 0.0f64;
    let mut digits = 0;
    while let Some(d) = bytes.get(i).and_then(|b| (*b as char).to_digit(16)) {
        value = value * 16.0 + d as f64;
        digits += 1;
        i += 1;
    }
    if bytes.get(i) == Some(&b'.') {
        let mut j = i + 1;
        let mut scale = 1.0 / 16.0;
        let mut frac_digits = 0;
        while let Some(d) = bytes.get(j).and_then(|b| (*b as char).to_digit(16)) {
            value += d as f64 * scale;
            scale /= 16.0;
            frac_digits += 1;
            j += 1;
        }
        if digits + frac_digits > 0 {
            digits += frac_digits;
            i = j;
        }
    }
    if digits == 0 {
        // "0x" alone: the literal is just "0".
        return None;
    }
    if matches!(bytes.get(i), Some(b'p' | b'P')) {
        let mut j = i + 1;
        let negative = match bytes.get(j) {
            Some(b'-') => {
                j += 1;
                true
            }
            Some(b'+') => {
                j += 1;
                false
            }
            _ => false,
        };
        let exp_start = j;
        let mut exp: i32 = 0;
        while let Some(d) = bytes.get(j).and_then(|b| (*b as char).to_digit(10)) {
            exp = exp.saturating_mul(10).saturating_add(d as i32);
            j += 1;
        }
        if j > exp_start {
            value *= 2f64.powi(if negative { -exp } else { exp });
            i = j;
        }
    }
    Some((value, i))
}

fn unit_factor(unit: &str, page_size: u64) -> Option<f64> {
    match unit {
        "" => Some(1.0),
        "pages" => Some(page_size as f64),
        "k" | "K" => Some(1024.0),
        "m" | "M" => Some(1024.0 * 1024.0),
        "g" | "G" => Some(1024.0 * 1024.0 * 1024.0),
        _ => None,
    }
}

/// Parse `subtoken` (the part of `token` after the directive) as a byte
/// count, rounded up to a multiple of `spec.round_to`.
///
/// Checks, in order: a number is present, the unit is known, the value is
/// strictly positive, and the rounded byte count fits in a `u64`. Rounding
/// is reported on `console`; a failed report is an error.
pub fn parse_memory_size(
    spec: &SizeSpec<'_>,
    token: &str,
    subtoken: &str,
    program: &str,
    console: &mut dyn Write,
) -> Result<u64, MemorySizeError> {
    let round_to = spec.round_to.max(1);

    let (user_num, unit) =
        split_number(subtoken).ok_or_else(|| MemorySizeError::NotANumber {
            token: token.to_string(),
            flag: spec.flag.to_string(),
        })?;

    let factor = unit_factor(unit, spec.page_size).ok_or_else(|| MemorySizeError::UnknownUnit {
        token: token.to_string(),
        unit: unit.to_string(),
    })?;

    if user_num < 0.0 {
        return Err(MemorySizeError::Negative {
            name: spec.name.to_string(),
        });
    }
    if user_num == 0.0 || user_num.is_nan() {
        return Err(MemorySizeError::Zero {
            name: spec.name.to_string(),
        });
    }

    let out_of_range = || MemorySizeError::OutOfRange {
        subtoken: subtoken.to_string(),
    };
    if !user_num.is_finite() || user_num > (u64::MAX - round_to) as f64 / factor {
        return Err(out_of_range());
    }

    // Fractional bytes count as a whole byte.
    let bytes = (user_num * factor).ceil();
    if bytes >= u64::MAX as f64 {
        return Err(out_of_range());
    }
    let total = bytes as u64;

    let remainder = total % round_to;
    if remainder == 0 {
        return Ok(total);
    }
    let rounded = total
        .checked_add(round_to - remainder)
        .ok_or_else(out_of_range)?;
    let page_note = if round_to == spec.page_size {
        ", the virtual memory page size"
    } else {
        ""
    };
    info!(size = spec.name, from = total, to = rounded, "rounding up memory size");
    writeln!(
        console,
        "{program}: Rounding up {} from {total} bytes to {rounded},\n\tthe next multiple of {round_to} bytes{page_note}",
        spec.name
    )?;
    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PAGE: u64 = 4096;

    fn spec() -> SizeSpec<'static> {
        SizeSpec {
            name: "initial heap size",
            flag: "ms",
            round_to: PAGE,
            page_size: PAGE,
        }
    }

    fn parse(subtoken: &str) -> Result<u64, MemorySizeError> {
        let token = format!("-Xms{subtoken}");
        parse_memory_size(&spec(), &token, subtoken, "bootvm", &mut Vec::new())
    }

    #[test]
    fn test_units() {
        assert_eq!(parse("64M").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse("64m").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse("8K").unwrap(), 8 * 1024);
        assert_eq!(parse("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse("3pages").unwrap(), 3 * PAGE);
        assert_eq!(parse("8192").unwrap(), 8192);
    }

    #[test]
    fn test_hex_and_fraction() {
        assert_eq!(parse("0x10cafe0").unwrap(), 0x10cb000);
        assert_eq!(parse("1.5M").unwrap(), 3 * 512 * 1024);
        assert_eq!(parse("0x1.8p1M").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse(".5M").unwrap(), 512 * 1024);
    }

    #[test]
    fn test_rounding_is_reported() {
        let mut console = Vec::new();
        let value = parse_memory_size(&spec(), "-Xms100", "100", "bootvm", &mut console).unwrap();
        assert_eq!(value, PAGE);
        let text = String::from_utf8(console).unwrap();
        assert!(text.contains("Rounding up initial heap size from 100 bytes to 4096"));
        assert!(text.contains("the virtual memory page size"));
    }

    struct BrokenConsole;

    impl Write for BrokenConsole {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unwritable_rounding_note_is_an_error() {
        let result = parse_memory_size(&spec(), "-Xms100", "100", "bootvm", &mut BrokenConsole);
        assert!(matches!(
            result,
            Err(MemorySizeError::Console(e)) if e.kind() == io::ErrorKind::BrokenPipe
        ));
        // Nothing to report, nothing to fail.
        let value = parse_memory_size(&spec(), "-Xms4K", "4K", "bootvm", &mut BrokenConsole).unwrap();
        assert_eq!(value, 4096);
    }

    #[test]
    fn test_exact_multiple_is_silent() {
        let mut console = Vec::new();
        parse_memory_size(&spec(), "-Xms4K", "4K", "bootvm", &mut console).unwrap();
        assert!(console.is_empty());
    }

    #[test]
    fn test_errors_in_validation_order() {
        assert!(matches!(parse(""), Err(MemorySizeError::NotANumber { .. })));
        assert!(matches!(parse("lots"), Err(MemorySizeError::NotANumber { .. })));
        assert!(matches!(parse("M"), Err(MemorySizeError::NotANumber { .. })));
        assert!(matches!(
            parse("12Q"),
            Err(MemorySizeError::UnknownUnit { unit, .. }) if unit == "Q"
        ));
        assert!(matches!(parse("12MB"), Err(MemorySizeError::UnknownUnit { .. })));
        // Unit is checked before sign.
        assert!(matches!(parse("-5X"), Err(MemorySizeError::UnknownUnit { .. })));
        assert!(matches!(parse("-5M"), Err(MemorySizeError::Negative { .. })));
        assert!(matches!(parse("0"), Err(MemorySizeError::Zero { .. })));
        assert!(matches!(parse("0.0G"), Err(MemorySizeError::Zero { .. })));
        assert!(matches!(parse("99999999999G"), Err(MemorySizeError::OutOfRange { .. })));
        assert!(matches!(parse("1e400"), Err(MemorySizeError::OutOfRange { .. })));
    }

    #[test]
    fn test_error_wording() {
        let err = parse("-1M").unwrap_err();
        assert_eq!(
            err.to_string(),
            "You may not specify a negative initial heap size;\n\tit just doesn't make any sense."
        );
        let err = parse("0").unwrap_err();
        assert!(err.to_string().starts_with("You may not specify a zero"));
    }

    #[test]
    fn test_hint_mentions_every_unit() {
        let hint = usage_hint(&spec());
        for unit in ["K\"", "M\"", "G\"", "pages\"", "<positive number>\""] {
            assert!(hint.contains(unit), "hint lacks {unit}: {hint}");
        }
        assert!(hint.contains("virtual memory pages of 4096 bytes"));
        assert!(hint.ends_with("the virtual memory page size: 4096"));
    }

    #[test]
    fn test_split_number_prefixes() {
        assert_eq!(split_number("12K"), Some((12.0, "K")));
        assert_eq!(split_number("1e3x"), Some((1000.0, "x")));
        assert_eq!(split_number("1ex"), Some((1.0, "ex")));
        assert_eq!(split_number("0x"), Some((0.0, "x")));
        assert_eq!(split_number("0xffpages"), Some((255.0, "pages")));
        assert_eq!(split_number("."), None);
        assert_eq!(split_number(""), None);
    }

    proptest! {
        #[test]
        fn prop_result_is_rounded_and_not_below_input(n in 1u64..(1 << 40)) {
            let value = parse(&n.to_string()).unwrap();
            prop_assert_eq!(value % PAGE, 0);
            prop_assert!(value >= n);
            prop_assert!(value - n < PAGE);
        }

        #[test]
        fn prop_unknown_units_rejected(n in 1u32..10_000, unit in "[a-zA-Z]{2,6}") {
            prop_assume!(unit != "pages");
            let result = parse(&format!("{n}{unit}"));
            let rejected = matches!(result, Err(MemorySizeError::UnknownUnit { .. }));
            prop_assert!(rejected);
        }

        #[test]
        fn prop_non_positive_rejected(n in 0u32..1_000_000) {
            let result = parse(&format!("-{n}K"));
            let rejected = matches!(
                result,
                Err(MemorySizeError::Negative { .. }) | Err(MemorySizeError::Zero { .. })
            );
            prop_assert!(rejected);
        }
    }
}
