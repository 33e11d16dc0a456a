//! Size and duration formatting
//!
//! Human-readable byte sizes for log lines and the CLI, and the parser
//! behind `--buffer-size` / `--file-size`.

use std::time::Duration;

const BINARY_UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

/// Format bytes into human-readable size with binary units
///
/// # Examples
/// ```
/// use cardbench::util::units::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(131072), "128.0 KiB");
/// assert_eq!(format_bytes(4194304), "4.0 MiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < BINARY_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, BINARY_UNITS[unit])
    }
}

/// Parse a size such as `4096`, `128KiB`, `4 MiB` or `1.5MB` into bytes
///
/// Binary (`KiB`, `MiB`, `GiB`, `TiB`) and decimal (`KB`, `MB`, `GB`, `TB`)
/// units are accepted, case-insensitively. A bare `K`/`M`/`G` is binary.
///
/// # Examples
/// ```
/// use cardbench::util::units::parse_bytes;
///
/// assert_eq!(parse_bytes("128KiB").unwrap(), 131072);
/// assert_eq!(parse_bytes("4 MiB").unwrap(), 4194304);
/// assert_eq!(parse_bytes("2MB").unwrap(), 2000000);
/// assert!(parse_bytes("12 parsecs").is_err());
/// ```
pub fn parse_bytes(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let number = number.trim();

    if number.is_empty() {
        return Err(format!("Missing number in size: '{}'", input));
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KIB" => 1 << 10,
        "M" | "MIB" => 1 << 20,
        "G" | "GIB" => 1 << 30,
        "TIB" => 1 << 40,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        other => return Err(format!("Unknown size unit: '{}'", other)),
    };

    // Whole numbers stay exact; fractions go through f64
    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| format!("Size too large: '{}'", input));
    }

    let value: f64 = number
        .parse()
        .map_err(|_| format!("Invalid number in size: '{}'", number))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Invalid size: '{}'", input));
    }
    let bytes = value * multiplier as f64;
    if bytes > u64::MAX as f64 {
        return Err(format!("Size too large: '{}'", input));
    }
    Ok(bytes as u64)
}

/// Format a duration for the run summary
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use cardbench::util::units::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_millis(2500)), "2.50s");
/// assert_eq!(format_duration(Duration::from_secs(95)), "1m 35s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(4194305), "4.0 MiB");
        assert_eq!(format_bytes(1 << 40), "1.0 TiB");
    }

    #[test]
    fn test_parse_bytes_units() {
        assert_eq!(parse_bytes("4096").unwrap(), 4096);
        assert_eq!(parse_bytes("4096B").unwrap(), 4096);
        assert_eq!(parse_bytes("128k").unwrap(), 131072);
        assert_eq!(parse_bytes("128 kib").unwrap(), 131072);
        assert_eq!(parse_bytes("4MiB").unwrap(), 4194304);
        assert_eq!(parse_bytes("1G").unwrap(), 1073741824);
        assert_eq!(parse_bytes("1KB").unwrap(), 1000);
        assert_eq!(parse_bytes("1.5 MiB").unwrap(), 1572864);
        assert_eq!(parse_bytes("  2 GB ").unwrap(), 2_000_000_000);
    }

    #[test]
    fn test_parse_bytes_errors() {
        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("MiB").is_err());
        assert!(parse_bytes("abc").is_err());
        assert!(parse_bytes("10 XB").is_err());
        assert!(parse_bytes("-1 KiB").is_err());
        assert!(parse_bytes("99999999999999 TiB").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0ms");
        assert_eq!(format_duration(Duration::from_secs(1)), "1.00s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "60m 0s");
    }
}
