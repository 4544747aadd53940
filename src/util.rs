//! Utilities used in this crate.
//!
//! This is not part of the public interface of the crate.

use crate::{Error, Result};
use std::path::Path;

/// Read a sysfs attribute as a trimmed string.
pub fn read_string<P: AsRef<Path>>(path: P) -> Result<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

/// Read a sysfs attribute holding a decimal integer.
pub fn read_u64<P: AsRef<Path>>(path: P) -> Result<u64> {
    Ok(read_string(path)?.parse::<u64>()?)
}

/// Parse a hexadecimal (`0x`-prefixed) or decimal integer.
pub fn parse_int(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(u64::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<u64>()?)
    }
}

/// Parse a kernel CPU list such as `0-3,8,10-11`.
pub fn parse_cpu_list(list: &str) -> Result<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        match part.find('-') {
            Some(idx) => {
                let lo: u32 = part[..idx].parse()?;
                let hi: u32 = part[idx + 1..].parse()?;
                if hi < lo {
                    return Err(Error::ParseSysfs(list.to_string()));
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.parse()?),
        }
    }
    Ok(cpus)
}

/// Check that `val` is a finite number inside `[min, max]`.
#[inline]
pub fn is_valid_value(val: f64, min: f64, max: f64) -> bool {
    val.is_finite() && val >= min && val <= max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8,10-11\n").unwrap(), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_cpu_list("5").unwrap(), vec![5]);
        assert!(parse_cpu_list("").unwrap().is_empty());
        assert!(parse_cpu_list("4-2").is_err());
        assert!(parse_cpu_list("a-b").is_err());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("0x1F").unwrap(), 31);
        assert_eq!(parse_int("42").unwrap(), 42);
        assert!(parse_int("0xZZ").is_err());
    }

    #[test]
    fn test_valid_value() {
        assert!(is_valid_value(1.0, 0.0, 5.0));
        assert!(!is_valid_value(5.1, 0.0, 5.0));
        assert!(!is_valid_value(std::f64::NAN, 0.0, 5.0));
        assert!(!is_valid_value(std::f64::INFINITY, 0.0, 5.0));
        assert!(!is_valid_value(-0.1, 0.0, 5.0));
    }
}
