//! Utilities to read model specific registers (MSRs).

use crate::Result;
use std::os::unix::io::AsRawFd;
use std::path::Path;

#[derive(Debug)]
/// Handle to read model specific registers of one logical CPU.
///
/// Requires the `msr` kernel module loaded and `CAP_SYS_RAWIO`.
pub struct MsrHandle {
    /// MSR device file.
    file: std::fs::File,
    /// Logical CPU the handle belongs to.
    cpuid: u32,
}

impl MsrHandle {
    /// Get a handle to the CPU specific MSR device below `devfs_root`.
    pub fn new(devfs_root: &Path, cpuid: u32) -> Result<MsrHandle> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(devfs_root.join(format!("cpu/{}/msr", cpuid)))?;
        Ok(MsrHandle { file, cpuid })
    }

    /// Logical CPU of this handle.
    pub fn cpuid(&self) -> u32 {
        self.cpuid
    }

    /// Read the value of `msr`.
    pub fn read(&self, msr: MsrAddress) -> Result<u64> {
        let mut bytes = [0u8; 8];
        let n = nix::sys::uio::pread(self.file.as_raw_fd(), &mut bytes, msr as i64)?;
        if n != bytes.len() {
            return Err(crate::Error::NoneError);
        }
        Ok(u64::from_ne_bytes(bytes))
    }
}

/// MSR addresses from "Intel 64 and IA-32 Architectures Software Developers Manual Volume 4:
/// Model-Specific Registers".
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types, missing_docs)]
pub enum MsrAddress {
    PLATFORM_INFO_ADDR = 0xCE,
    MSR_RAPL_POWER_UNIT = 0x606,
    MSR_PKG_ENERGY_STATUS = 0x611,
    MSR_DRAM_ENERGY_STATUS = 0x619,
}

/// Energy status MSRs hold a 32-bit wrapping counter.
pub const ENERGY_STATUS_WIDTH: u32 = 32;

/// Joules per energy status unit, from `MSR_RAPL_POWER_UNIT` bits 12:8.
pub fn joules_per_energy_unit(power_unit: u64) -> f64 {
    let esu = (power_unit >> 8) & 0x1F;
    1.0 / (1u64 << esu) as f64
}

/// Nominal (non-turbo) frequency in Hz, from `MSR_PLATFORM_INFO` bits 15:8 in 100MHz units.
pub fn nominal_frequency_hz(platform_info: u64) -> u64 {
    ((platform_info >> 8) & 0xFF) * 100_000_000
}
