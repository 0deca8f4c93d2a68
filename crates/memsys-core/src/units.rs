//! Binary byte-size constants plus parsing/formatting for human-readable sizes.
//!
//! All suffixes are binary: `K`, `KB` and `KiB` all mean 1024 bytes.

use crate::error::{Error, Result};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Parse strings such as `"4096"`, `"64KiB"`, `"1 GiB"` or `"512mb"`.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(Error::Size {
            input: input.to_string(),
            reason: "missing numeric value",
        });
    }
    let value: u64 = digits.parse().map_err(|_| Error::Size {
        input: input.to_string(),
        reason: "numeric value out of range",
    })?;

    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        "t" | "tb" | "tib" => TIB,
        _ => {
            return Err(Error::Size {
                input: input.to_string(),
                reason: "unknown unit suffix",
            })
        }
    };

    value.checked_mul(multiplier).ok_or_else(|| Error::Size {
        input: input.to_string(),
        reason: "size overflows u64",
    })
}

/// Render `bytes` with the largest binary unit that divides it evenly,
/// falling back to one decimal place.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")];
    for (unit, name) in UNITS {
        if bytes >= unit {
            if bytes % unit == 0 {
                return format!("{}{}", bytes / unit, name);
            }
            return format!("{:.1}{}", bytes as f64 / unit as f64, name);
        }
    }
    format!("{}B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("64KiB").unwrap(), 64 * KIB);
        assert_eq!(parse_size(" 1 GiB ").unwrap(), GIB);
        assert_eq!(parse_size("512mb").unwrap(), 512 * MIB);
        assert_eq!(parse_size("2k").unwrap(), 2048);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("GiB").is_err());
        assert!(parse_size("12 parsecs").is_err());
        assert!(parse_size("99999999999999999999").is_err());
        assert!(parse_size("20000000TiB").is_err());
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(32 * KIB), "32KiB");
        assert_eq!(format_size(GIB), "1GiB");
        assert_eq!(format_size(GIB + GIB / 2), "1.5GiB");
    }
}
