//! Utilities to parse the CPU identification from the `cpuid` instruction.

use core::arch::x86_64::__cpuid;
use log::debug;

/// Get CPU model string for x86_64 processors.
///
/// More information at https://en.wikipedia.org/wiki/CPUID.
pub fn get_cpu_string() -> String {
    let mut vendor = [0u8; 12];
    let mut family = 0u32;
    let mut model = 0u32;
    let mut step = 0u32;

    let res = unsafe { __cpuid(0) };
    vendor[0..4].copy_from_slice(&res.ebx.to_ne_bytes());
    vendor[4..8].copy_from_slice(&res.edx.to_ne_bytes());
    vendor[8..12].copy_from_slice(&res.ecx.to_ne_bytes());

    if res.eax >= 1 {
        let res = unsafe { __cpuid(1) };
        step = res.eax & 0xf;
        model = (res.eax >> 4) & 0xf;
        family = (res.eax >> 8) & 0xf;
        if family == 0xf {
            family += (res.eax >> 20) & 0xff;
        }
        if family >= 0x6 {
            model += ((res.eax >> 16) & 0xf) << 4;
        }
    }

    let cpu = format!(
        "{}-{:X}-{:X}-{:X}",
        String::from_utf8_lossy(&vendor),
        family,
        model,
        step
    );

    debug!("Detected x86_64 processor - {}", cpu);

    cpu
}

/// Get the processor brand string from leaves `0x80000002..=0x80000004`.
pub fn get_brand_string() -> Option<String> {
    let max_ext = unsafe { __cpuid(0x8000_0000) }.eax;
    if max_ext < 0x8000_0004 {
        return None;
    }
    let mut brand = Vec::with_capacity(48);
    for leaf in 0x8000_0002u32..=0x8000_0004 {
        let res = unsafe { __cpuid(leaf) };
        for reg in &[res.eax, res.ebx, res.ecx, res.edx] {
            brand.extend_from_slice(&reg.to_ne_bytes());
        }
    }
    let brand = String::from_utf8_lossy(&brand)
        .trim_matches(char::from(0))
        .trim()
        .to_string();
    if brand.is_empty() {
        None
    } else {
        Some(brand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_str() {
        let cpu_str = get_cpu_string();
        assert!(!cpu_str.is_empty());
        assert!(cpu_str.matches('-').count() >= 3);
    }

    #[test]
    fn test_brand_str() {
        if let Some(brand) = get_brand_string() {
            assert!(!brand.contains('\0'));
        }
    }
}
