//! Package and DRAM energy counters (RAPL).
//!
//! There are three ways to read RAPL results on Linux: the powercap sysfs interface, the `power`
//! perf PMU, and raw MSR access. The powercap files need no special permissions and the kernel
//! already converts them to microjoules, so they are preferred. Raw MSRs are the fallback for
//! kernels without `intel_rapl`. Readings are per socket only.

use crate::topology::Topology;
use crate::util::{read_string, read_u64};
use crate::{Counter, Error, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Raw reading of one wrapping energy counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyCounter {
    /// Raw counter value.
    pub raw: u64,
    /// The counter wraps to zero when reaching this value.
    pub modulus: u64,
    /// Joules per raw count.
    pub joules_per_unit: f64,
}

impl EnergyCounter {
    /// Energy consumed between two readings of the same counter, accounting for one wraparound.
    pub fn joules_since(&self, before: &EnergyCounter) -> f64 {
        let delta = if self.raw >= before.raw {
            self.raw - before.raw
        } else {
            self.modulus.saturating_sub(before.raw).saturating_add(self.raw)
        };
        delta as f64 * self.joules_per_unit
    }
}

/// Energy counters of one socket at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergySample {
    /// Processor package domain.
    pub package: Option<EnergyCounter>,
    /// DRAM domain.
    pub dram: Option<EnergyCounter>,
}

impl EnergySample {
    /// Package energy consumed since `before`, if both readings have it.
    pub fn package_joules_since(&self, before: &EnergySample) -> Option<f64> {
        Some(self.package?.joules_since(&before.package?))
    }

    /// DRAM energy consumed since `before`, if both readings have it.
    pub fn dram_joules_since(&self, before: &EnergySample) -> Option<f64> {
        Some(self.dram?.joules_since(&before.dram?))
    }
}

/// A powercap zone such as `intel-rapl:0` or `intel-rapl:0:1`.
#[derive(Debug, Clone)]
struct PowercapZone {
    path: PathBuf,
    max_range_uj: u64,
}

impl PowercapZone {
    fn open(path: PathBuf) -> Result<Self> {
        let max_range_uj = read_u64(path.join("max_energy_range_uj"))?;
        // Probe readability, `energy_uj` is root-only on kernels patched for PLATYPUS.
        read_u64(path.join("energy_uj"))?;
        Ok(PowercapZone { path, max_range_uj })
    }

    fn read(&self) -> Result<EnergyCounter> {
        Ok(EnergyCounter {
            raw: read_u64(self.path.join("energy_uj"))?,
            modulus: self.max_range_uj,
            joules_per_unit: 1e-6,
        })
    }
}

#[derive(Debug)]
enum EnergySource {
    Powercap {
        package: Option<PowercapZone>,
        dram: Option<PowercapZone>,
    },
    #[cfg(target_arch = "x86_64")]
    Msr {
        handle: crate::arch::MsrHandle,
        joules_per_unit: f64,
        has_dram: bool,
    },
}

/// Energy counters of one socket.
#[derive(Debug)]
pub struct SocketEnergy {
    /// Dense socket index.
    pub socket: u32,
    source: EnergySource,
}

impl SocketEnergy {
    /// Whether this socket reports DRAM energy.
    pub fn has_dram(&self) -> bool {
        match &self.source {
            EnergySource::Powercap { dram, .. } => dram.is_some(),
            #[cfg(target_arch = "x86_64")]
            EnergySource::Msr { has_dram, .. } => *has_dram,
        }
    }

    /// Name of the backing interface.
    pub fn backend(&self) -> &'static str {
        match &self.source {
            EnergySource::Powercap { .. } => "powercap",
            #[cfg(target_arch = "x86_64")]
            EnergySource::Msr { .. } => "msr",
        }
    }
}

impl Counter<EnergySample> for SocketEnergy {
    fn name(&self) -> &str {
        "energy"
    }

    // RAPL counters are free running.
    fn enable(&self) -> Result<()> {
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn read_sync(&self) -> Result<EnergySample> {
        match &self.source {
            EnergySource::Powercap { package, dram } => Ok(EnergySample {
                package: package.as_ref().map(PowercapZone::read).transpose()?,
                dram: dram.as_ref().map(PowercapZone::read).transpose()?,
            }),
            #[cfg(target_arch = "x86_64")]
            EnergySource::Msr {
                handle,
                joules_per_unit,
                has_dram,
            } => {
                use crate::arch::{MsrAddress, ENERGY_STATUS_WIDTH};
                let counter = |raw: u64| EnergyCounter {
                    raw: raw & ((1u64 << ENERGY_STATUS_WIDTH) - 1),
                    modulus: 1u64 << ENERGY_STATUS_WIDTH,
                    joules_per_unit: *joules_per_unit,
                };
                let package = counter(handle.read(MsrAddress::MSR_PKG_ENERGY_STATUS)?);
                let dram = if *has_dram {
                    Some(counter(handle.read(MsrAddress::MSR_DRAM_ENERGY_STATUS)?))
                } else {
                    None
                };
                Ok(EnergySample {
                    package: Some(package),
                    dram,
                })
            }
        }
    }
}

/// Map of package id to `(package zone, dram zone)` found below `sysfs_root/class/powercap`.
fn powercap_zones(
    sysfs_root: &Path,
) -> Result<Vec<(u32, Option<PowercapZone>, Option<PowercapZone>)>> {
    let root = sysfs_root.join("class/powercap");
    let mut out: Vec<(u32, Option<PowercapZone>, Option<PowercapZone>)> = Vec::new();
    for path in glob::glob(&format!("{}/intel-rapl:[0-9]*", root.display()))?
        .filter_map(std::result::Result::ok)
    {
        let name = match read_string(path.join("name")) {
            Ok(n) => n,
            Err(_) => continue,
        };
        // Top level zones are named `package-<id>`.
        let pkg = match name.strip_prefix("package-").and_then(|id| id.parse::<u32>().ok()) {
            Some(pkg) => pkg,
            None => continue,
        };
        let package = PowercapZone::open(path.clone())
            .map_err(|e| debug!("Unusable powercap zone {} - {}", path.display(), e))
            .ok();
        let dram = glob::glob(&format!("{}:[0-9]*", path.display()))?
            .filter_map(std::result::Result::ok)
            .find(|sub| read_string(sub.join("name")).map(|n| n == "dram").unwrap_or(false))
            .and_then(|sub| PowercapZone::open(sub).ok());
        out.push((pkg, package, dram));
    }
    Ok(out)
}

#[cfg(target_arch = "x86_64")]
fn msr_source(devfs_root: &Path, cpu: u32) -> Result<EnergySource> {
    use crate::arch::{joules_per_energy_unit, MsrAddress, MsrHandle};
    let handle = MsrHandle::new(devfs_root, cpu)?;
    let joules_per_unit = joules_per_energy_unit(handle.read(MsrAddress::MSR_RAPL_POWER_UNIT)?);
    handle.read(MsrAddress::MSR_PKG_ENERGY_STATUS)?;
    let has_dram = handle.read(MsrAddress::MSR_DRAM_ENERGY_STATUS).is_ok();
    Ok(EnergySource::Msr {
        handle,
        joules_per_unit,
        has_dram,
    })
}

#[cfg(not(target_arch = "x86_64"))]
fn msr_source(_devfs_root: &Path, _cpu: u32) -> Result<EnergySource> {
    Err(Error::EnergyUnavailable)
}

/// Open energy counters for every socket of `topology`.
///
/// Sockets without any usable interface are left out.
pub fn discover(sysfs_root: &Path, devfs_root: &Path, topology: &Topology) -> Vec<SocketEnergy> {
    let mut zones = match powercap_zones(sysfs_root) {
        Ok(z) => z,
        Err(e) => {
            debug!("Powercap discovery failed - {}", e);
            Vec::new()
        }
    };

    let mut out = Vec::new();
    for socket in &topology.sockets {
        let zone = zones
            .iter()
            .position(|(pkg, package, _)| *pkg == socket.package_id && package.is_some())
            .map(|idx| zones.swap_remove(idx));
        let source = match zone {
            Some((_, package, dram)) => Ok(EnergySource::Powercap { package, dram }),
            None => socket
                .cpus
                .first()
                .ok_or(Error::EnergyUnavailable)
                .and_then(|cpu| msr_source(devfs_root, *cpu)),
        };
        match source {
            Ok(source) => {
                let energy = SocketEnergy {
                    socket: socket.id,
                    source,
                };
                info!(
                    "Socket {} energy through {} (dram: {})",
                    socket.id,
                    energy.backend(),
                    energy.has_dram()
                );
                out.push(energy);
            }
            Err(e) => debug!("No energy counters for socket {} - {}", socket.id, e),
        }
    }
    out
}
