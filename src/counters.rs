//! Counter samples and the derivation of result records from a pair of samples.
//!
//! Everything in this module is pure: the monitor takes snapshots, this module turns the
//! difference between two snapshots into the flat records handed to callers, clamping values
//! that fail their sanity checks.

use crate::config::Config;
use crate::energy::EnergySample;
use crate::uncore::ImcSample;
use crate::util::is_valid_value;
use crate::{Error, Result};
use log::{debug, error, warn};
use std::time::Instant;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Performance counters of one logical core over a measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoreCounters {
    /// Unhalted core cycles.
    pub cycles: u64,
    /// Instructions retired.
    pub instructions: u64,
    /// Loads that hit the L2 cache.
    pub l2_cache_hits: u64,
    /// Loads that missed the L2 cache.
    pub l2_cache_misses: u64,
    /// Loads that hit the last level cache.
    pub l3_cache_hits: u64,
    /// Loads that missed the last level cache.
    pub l3_cache_misses: u64,
    /// Instructions per cycle.
    pub ipc: f64,
    /// `hits / (hits + misses)` for L2.
    pub l2_cache_hit_ratio: f64,
    /// `hits / (hits + misses)` for L3.
    pub l3_cache_hit_ratio: f64,
    /// Average frequency while running, in GHz.
    pub frequency_ghz: f64,
    /// Active relative frequency, `cycles / reference cycles`.
    pub cpu_utilization: f64,
    /// Energy of the core. Not measured per core, always `0`.
    pub energy_joules: f64,
    /// `ipc` passed its sanity check.
    pub valid_ipc: bool,
    /// `frequency_ghz` passed its sanity check.
    pub valid_frequency: bool,
    /// Cache counts were measured and the ratios are finite.
    pub valid_cache: bool,
}

/// Memory controller traffic of one socket over a measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryCounters {
    /// Bytes read from DRAM.
    pub dram_read_bytes: u64,
    /// Bytes written to DRAM.
    pub dram_write_bytes: u64,
    /// Read bandwidth in MiB/s.
    pub memory_controller_read_bw_mbps: f64,
    /// Write bandwidth in MiB/s.
    pub memory_controller_write_bw_mbps: f64,
    /// Sum of read and write bandwidth in MiB/s.
    pub memory_controller_bw_mbps: f64,
    /// Duration of the measurement the bandwidths are computed over.
    pub elapsed_time_sec: f64,
}

/// I/O and uncore traffic of one socket over a measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IoCounters {
    /// Bytes read by PCIe devices.
    pub pcie_read_bytes: u64,
    /// Bytes written by PCIe devices.
    pub pcie_write_bytes: u64,
    /// PCIe read bandwidth in MiB/s.
    pub pcie_read_bandwidth_mbps: f64,
    /// PCIe write bandwidth in MiB/s.
    pub pcie_write_bandwidth_mbps: f64,
    /// Socket interconnect traffic. Not measured, always `0`.
    pub qpi_upi_data_bytes: u64,
    /// Socket interconnect utilization. Not measured, always `0`.
    pub qpi_upi_utilization: f64,
    /// Uncore frequency. Not measured, always `0`.
    pub uncore_freq_ghz: u64,
    /// Memory controller reads in GiB/s.
    pub imc_reads_gbps: f64,
    /// Memory controller writes in GiB/s.
    pub imc_writes_gbps: f64,
    /// The PCIe fields are derived from memory controller traffic.
    pub pcie_is_estimated: bool,
}

/// Machine wide counters over a measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemCounters {
    /// Online logical cores.
    pub active_cores: u32,
    /// Energy of all packages.
    pub total_energy_joules: f64,
    /// Energy of all packages.
    pub package_energy_joules: f64,
    /// Energy of all DRAM domains.
    pub dram_energy_joules: f64,
    /// Instructions per cycle over all cores.
    pub total_ipc: f64,
    /// Memory controller traffic of all sockets in GiB/s.
    pub memory_bandwidth_utilization: f64,
    /// Share of the nominal frequency lost over the measurement.
    pub thermal_throttle_ratio: f64,
}

/// L2/L3 load outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    /// L2 hits.
    pub l2_hits: u64,
    /// L2 misses.
    pub l2_misses: u64,
    /// L3 hits.
    pub l3_hits: u64,
    /// L3 misses.
    pub l3_misses: u64,
}

/// Counts of one logical core, already scaled for multiplexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreSample {
    /// Unhalted core cycles.
    pub cycles: u64,
    /// Instructions retired.
    pub instructions: u64,
    /// Reference cycles, when the counter could be opened.
    pub ref_cycles: Option<u64>,
    /// Cache counts, when the cache events could be opened.
    pub cache: Option<CacheCounts>,
}

impl CoreSample {
    /// Counts accumulated since `before`.
    pub fn delta_since(&self, before: &CoreSample) -> CoreSample {
        let ref_cycles = match (self.ref_cycles, before.ref_cycles) {
            (Some(a), Some(b)) => Some(a.saturating_sub(b)),
            _ => None,
        };
        let cache = match (self.cache, before.cache) {
            (Some(a), Some(b)) => Some(CacheCounts {
                l2_hits: a.l2_hits.saturating_sub(b.l2_hits),
                l2_misses: a.l2_misses.saturating_sub(b.l2_misses),
                l3_hits: a.l3_hits.saturating_sub(b.l3_hits),
                l3_misses: a.l3_misses.saturating_sub(b.l3_misses),
            }),
            _ => None,
        };
        CoreSample {
            cycles: self.cycles.saturating_sub(before.cycles),
            instructions: self.instructions.saturating_sub(before.instructions),
            ref_cycles,
            cache,
        }
    }
}

/// Uncore state of one socket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SocketSample {
    /// Memory controller counts, `None` without IMC PMUs.
    pub imc: Option<ImcSample>,
    /// Energy counters.
    pub energy: EnergySample,
}

impl SocketSample {
    /// Bytes read from and written to memory since `before`.
    pub fn traffic_since(&self, before: &SocketSample) -> (u64, u64) {
        match (&self.imc, &before.imc) {
            (Some(a), Some(b)) => a.bytes_since(b),
            _ => (0, 0),
        }
    }
}

/// Machine wide activity between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemSample {
    /// Cycles of all cores.
    pub cycles: u64,
    /// Instructions of all cores.
    pub instructions: u64,
    /// Memory reads of all sockets, in bytes.
    pub read_bytes: u64,
    /// Memory writes of all sockets, in bytes.
    pub write_bytes: u64,
    /// Package energy of all sockets, `None` without energy counters.
    pub package_joules: Option<f64>,
    /// DRAM energy of all sockets, `None` without DRAM energy counters.
    pub dram_joules: Option<f64>,
}

/// State of every counter at one instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// When the snapshot was taken.
    pub taken: Instant,
    /// Per logical core, `None` for cores that could not be read.
    pub cores: Vec<Option<CoreSample>>,
    /// Per socket.
    pub sockets: Vec<SocketSample>,
}

impl Snapshot {
    /// Counts of core `idx` accumulated since `before`.
    pub fn core_since(&self, before: &Snapshot, idx: usize) -> CoreSample {
        match (self.cores.get(idx), before.cores.get(idx)) {
            (Some(Some(a)), Some(Some(b))) => a.delta_since(b),
            _ => CoreSample::default(),
        }
    }

    /// Socket `idx` memory traffic since `before`.
    pub fn traffic_since(&self, before: &Snapshot, idx: usize) -> (u64, u64) {
        match (self.sockets.get(idx), before.sockets.get(idx)) {
            (Some(a), Some(b)) => a.traffic_since(b),
            _ => (0, 0),
        }
    }

    /// Aggregate of all cores and sockets since `before`.
    pub fn system_since(&self, before: &Snapshot) -> SystemSample {
        let mut sys = SystemSample::default();
        for idx in 0..self.cores.len() {
            let delta = self.core_since(before, idx);
            sys.cycles = sys.cycles.saturating_add(delta.cycles);
            sys.instructions = sys.instructions.saturating_add(delta.instructions);
        }
        for (after, before) in self.sockets.iter().zip(before.sockets.iter()) {
            let (reads, writes) = after.traffic_since(before);
            sys.read_bytes = sys.read_bytes.saturating_add(reads);
            sys.write_bytes = sys.write_bytes.saturating_add(writes);
            if let Some(j) = after.energy.package_joules_since(&before.energy) {
                *sys.package_joules.get_or_insert(0.0) += j;
            }
            if let Some(j) = after.energy.dram_joules_since(&before.energy) {
                *sys.dram_joules.get_or_insert(0.0) += j;
            }
        }
        sys
    }
}

/// `hits / (hits + misses)`, `0` when there were no accesses.
pub fn hit_ratio(hits: u64, misses: u64) -> f64 {
    let total = hits as f64 + misses as f64;
    if total == 0.0 {
        0.0
    } else {
        hits as f64 / total
    }
}

/// PCIe traffic estimated from memory controller traffic.
pub fn estimate_pcie(imc_bytes: u64, factor: f64) -> u64 {
    (imc_bytes as f64 * factor) as u64
}

/// Derive the record of core `core` from its counts over `elapsed_secs`.
pub fn derive_core(delta: &CoreSample, elapsed_secs: f64, core: u32, cfg: &Config) -> CoreCounters {
    let t = &cfg.thresholds;
    let mut c = CoreCounters {
        cycles: delta.cycles,
        instructions: delta.instructions,
        valid_ipc: true,
        valid_frequency: true,
        valid_cache: true,
        ..CoreCounters::default()
    };

    c.ipc = if delta.cycles == 0 {
        f64::NAN
    } else {
        delta.instructions as f64 / delta.cycles as f64
    };
    if !is_valid_value(c.ipc, 0.0, t.max_ipc) || delta.cycles < t.min_cycles {
        debug!("Invalid IPC {:.2} on core {}", c.ipc, core);
        c.ipc = 0.0;
        c.valid_ipc = false;
    }

    c.frequency_ghz = if elapsed_secs > 0.0 {
        delta.cycles as f64 / (elapsed_secs * 1e9)
    } else {
        f64::NAN
    };
    if !is_valid_value(c.frequency_ghz, 0.0, t.max_freq_ghz) {
        debug!("Invalid frequency {:.2} GHz on core {}", c.frequency_ghz, core);
        c.frequency_ghz = 0.0;
        c.valid_frequency = false;
    }

    c.cpu_utilization = match delta.ref_cycles {
        Some(r) if r > 0 => delta.cycles as f64 / r as f64,
        _ => 0.0,
    };

    match delta.cache {
        Some(cache) => {
            c.l2_cache_hits = cache.l2_hits;
            c.l2_cache_misses = cache.l2_misses;
            c.l3_cache_hits = cache.l3_hits;
            c.l3_cache_misses = cache.l3_misses;
            c.l2_cache_hit_ratio = hit_ratio(cache.l2_hits, cache.l2_misses);
            c.l3_cache_hit_ratio = hit_ratio(cache.l3_hits, cache.l3_misses);
            if !c.l2_cache_hit_ratio.is_finite() || !c.l3_cache_hit_ratio.is_finite() {
                c.l2_cache_hit_ratio = 0.0;
                c.l3_cache_hit_ratio = 0.0;
                c.valid_cache = false;
            }
        }
        None => c.valid_cache = false,
    }

    if cfg.warn_suspicious_values && delta.cycles > t.max_counter_value {
        warn!(
            "Suspicious cycle count {} on core {} (possible overflow)",
            delta.cycles, core
        );
    }
    c
}

/// Derive the memory record of a socket from its traffic over `elapsed_secs`.
pub fn derive_memory(
    read_bytes: u64,
    write_bytes: u64,
    elapsed_secs: f64,
    cfg: &Config,
) -> Result<MemoryCounters> {
    if elapsed_secs <= 0.0 || elapsed_secs > cfg.thresholds.max_measurement_secs {
        error!("Invalid elapsed time {:.3} sec", elapsed_secs);
        return Err(Error::InvalidElapsed(elapsed_secs));
    }
    let read_bw = read_bytes as f64 / MIB / elapsed_secs;
    let write_bw = write_bytes as f64 / MIB / elapsed_secs;
    Ok(MemoryCounters {
        dram_read_bytes: read_bytes,
        dram_write_bytes: write_bytes,
        memory_controller_read_bw_mbps: read_bw,
        memory_controller_write_bw_mbps: write_bw,
        memory_controller_bw_mbps: read_bw + write_bw,
        elapsed_time_sec: elapsed_secs,
    })
}

/// Derive the I/O record of a socket from its memory traffic over `elapsed_secs`.
pub fn derive_io(
    read_bytes: u64,
    write_bytes: u64,
    elapsed_secs: f64,
    cfg: &Config,
) -> Result<IoCounters> {
    if elapsed_secs <= 0.0 {
        return Err(Error::InvalidElapsed(elapsed_secs));
    }
    let mut io = IoCounters::default();
    if cfg.pcie_estimation {
        io.pcie_read_bytes = estimate_pcie(read_bytes, cfg.pcie_estimation_factor);
        io.pcie_write_bytes = estimate_pcie(write_bytes, cfg.pcie_estimation_factor);
        io.pcie_is_estimated = true;
    }
    io.pcie_read_bandwidth_mbps = io.pcie_read_bytes as f64 / MIB / elapsed_secs;
    io.pcie_write_bandwidth_mbps = io.pcie_write_bytes as f64 / MIB / elapsed_secs;
    io.imc_reads_gbps = read_bytes as f64 / GIB / elapsed_secs;
    io.imc_writes_gbps = write_bytes as f64 / GIB / elapsed_secs;
    Ok(io)
}

/// Derive the machine wide record.
///
/// `nominal_hz` is the base frequency of the cores, throttling is reported as `0` without it.
pub fn derive_system(
    sys: &SystemSample,
    active_cores: u32,
    elapsed_secs: f64,
    nominal_hz: Option<u64>,
    cfg: &Config,
) -> SystemCounters {
    let t = &cfg.thresholds;
    let mut s = SystemCounters {
        active_cores,
        ..SystemCounters::default()
    };

    if let Some(total) = sys.package_joules {
        if is_valid_value(total, 0.0, t.max_energy_joules) {
            s.total_energy_joules = total;
            s.package_energy_joules = total;
        } else {
            debug!("Invalid total energy: {:.1} J", total);
        }
    }
    if let Some(dram) = sys.dram_joules {
        if is_valid_value(dram, 0.0, t.max_energy_joules) {
            s.dram_energy_joules = dram;
        }
    }

    if sys.cycles > 0 {
        let ipc = sys.instructions as f64 / sys.cycles as f64;
        if is_valid_value(ipc, 0.0, t.max_ipc) {
            s.total_ipc = ipc;
        }
    }

    if elapsed_secs > 0.0 {
        let bw = (sys.read_bytes as f64 + sys.write_bytes as f64) / GIB / elapsed_secs;
        if is_valid_value(bw, 0.0, t.max_mem_bw_gbps) {
            s.memory_bandwidth_utilization = bw;
        }

        if let Some(hz) = nominal_hz.filter(|hz| *hz > 0 && active_cores > 0) {
            let rel_freq = sys.cycles as f64 / (hz as f64 * elapsed_secs * active_cores as f64);
            if is_valid_value(rel_freq, 0.0, t.max_relative_freq) {
                s.thermal_throttle_ratio = (1.0 - rel_freq).max(0.0);
            }
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::EnergyCounter;

    fn sample(cycles: u64, instructions: u64) -> CoreSample {
        CoreSample {
            cycles,
            instructions,
            ref_cycles: Some(cycles / 2),
            cache: Some(CacheCounts {
                l2_hits: 750,
                l2_misses: 250,
                l3_hits: 0,
                l3_misses: 0,
            }),
        }
    }

    #[test]
    fn test_core_derivation() {
        let cfg = Config::default();
        let c = derive_core(&sample(2_000_000_000, 3_000_000_000), 1.0, 0, &cfg);
        assert!(c.valid_ipc && c.valid_frequency && c.valid_cache);
        assert_eq!(c.ipc, 1.5);
        assert_eq!(c.frequency_ghz, 2.0);
        assert_eq!(c.cpu_utilization, 2.0);
        assert_eq!(c.l2_cache_hit_ratio, 0.75);
        // No L3 accesses at all.
        assert_eq!(c.l3_cache_hit_ratio, 0.0);
        assert_eq!(c.energy_joules, 0.0);
    }

    #[test]
    fn test_core_clamping() {
        let cfg = Config::default();
        let c = derive_core(&sample(1_000_000, 9_000_000), 1e-6, 3, &cfg);
        assert!(!c.valid_ipc);
        assert_eq!(c.ipc, 0.0);
        assert!(!c.valid_frequency);
        assert_eq!(c.frequency_ghz, 0.0);
        // Counts are reported even when the derived values are not.
        assert_eq!(c.instructions, 9_000_000);
    }

    #[test]
    fn test_core_too_few_cycles() {
        let cfg = Config::default();
        let c = derive_core(&sample(999, 500), 1.0, 0, &cfg);
        assert!(!c.valid_ipc);
        let c = derive_core(&CoreSample::default(), 1.0, 0, &cfg);
        assert!(!c.valid_ipc);
        assert!(!c.valid_cache);
        assert!(c.valid_frequency);
        assert_eq!(c.cpu_utilization, 0.0);
    }

    #[test]
    fn test_core_delta() {
        let before = sample(100, 200);
        let mut after = sample(1_100, 2_200);
        after.cache = None;
        let d = after.delta_since(&before);
        assert_eq!(d.cycles, 1_000);
        assert_eq!(d.instructions, 2_000);
        assert_eq!(d.ref_cycles, Some(500));
        assert_eq!(d.cache, None);
    }

    #[test]
    fn test_memory_bandwidth_units() {
        let cfg = Config::default();
        let m = derive_memory(2 * 1024 * 1024, 1024 * 1024, 0.5, &cfg).unwrap();
        assert_eq!(m.memory_controller_read_bw_mbps, 4.0);
        assert_eq!(m.memory_controller_write_bw_mbps, 2.0);
        assert_eq!(m.memory_controller_bw_mbps, 6.0);
        assert_eq!(m.elapsed_time_sec, 0.5);
        assert!(matches!(
            derive_memory(1, 1, 0.0, &cfg),
            Err(Error::InvalidElapsed(_))
        ));
        assert!(derive_memory(1, 1, 1001.0, &cfg).is_err());
    }

    #[test]
    fn test_pcie_estimation() {
        let mut cfg = Config::default();
        let gib = 1024 * 1024 * 1024;
        let io = derive_io(gib, 10 * 1024 * 1024, 1.0, &cfg).unwrap();
        assert!(io.pcie_is_estimated);
        assert_eq!(io.pcie_read_bytes, estimate_pcie(gib, 0.30));
        assert_eq!(io.pcie_write_bytes, 3_145_728);
        assert_eq!(io.pcie_write_bandwidth_mbps, 3.0);
        assert_eq!(io.imc_reads_gbps, 1.0);
        assert_eq!(io.qpi_upi_data_bytes, 0);
        assert_eq!(io.uncore_freq_ghz, 0);

        cfg.pcie_estimation = false;
        let io = derive_io(gib, gib, 1.0, &cfg).unwrap();
        assert!(!io.pcie_is_estimated);
        assert_eq!(io.pcie_read_bytes, 0);
        assert_eq!(io.pcie_read_bandwidth_mbps, 0.0);
        assert_eq!(io.imc_writes_gbps, 1.0);
        assert!(derive_io(1, 1, -1.0, &cfg).is_err());
    }

    #[test]
    fn test_system_derivation() {
        let cfg = Config::default();
        let sys = SystemSample {
            cycles: 4_000_000_000,
            instructions: 4_000_000_000,
            read_bytes: 1024 * 1024 * 1024,
            write_bytes: 1024 * 1024 * 1024,
            package_joules: Some(120.5),
            dram_joules: Some(10.0),
        };
        let s = derive_system(&sys, 4, 1.0, Some(2_000_000_000), &cfg);
        assert_eq!(s.active_cores, 4);
        assert_eq!(s.total_energy_joules, 120.5);
        assert_eq!(s.package_energy_joules, 120.5);
        assert_eq!(s.dram_energy_joules, 10.0);
        assert_eq!(s.total_ipc, 1.0);
        assert_eq!(s.memory_bandwidth_utilization, 2.0);
        assert_eq!(s.thermal_throttle_ratio, 0.5);
    }

    #[test]
    fn test_system_rejects_implausible_values() {
        let cfg = Config::default();
        let sys = SystemSample {
            cycles: 1_000,
            instructions: 100_000,
            read_bytes: 0,
            write_bytes: 0,
            package_joules: Some(1e6),
            dram_joules: None,
        };
        let s = derive_system(&sys, 2, 1.0, None, &cfg);
        assert_eq!(s.total_energy_joules, 0.0);
        assert_eq!(s.total_ipc, 0.0);
        assert_eq!(s.thermal_throttle_ratio, 0.0);
        // Relative frequency above the limit leaves throttling at zero.
        let sys = SystemSample {
            cycles: 10_000_000_000,
            ..sys
        };
        let s = derive_system(&sys, 1, 1.0, Some(1_000_000_000), &cfg);
        assert_eq!(s.thermal_throttle_ratio, 0.0);
    }

    #[test]
    fn test_snapshot_aggregation() {
        let now = Instant::now();
        let counter = |raw| EnergyCounter {
            raw,
            modulus: 1 << 32,
            joules_per_unit: 1e-6,
        };
        let imc = |reads, writes| ImcSample {
            read_counts: reads,
            write_counts: writes,
            read_scale: 64.0,
            write_scale: 64.0,
        };
        let before = Snapshot {
            taken: now,
            cores: vec![Some(sample(0, 0)), None, Some(sample(0, 0))],
            sockets: vec![
                SocketSample {
                    imc: Some(imc(0, 0)),
                    energy: EnergySample {
                        package: Some(counter(0)),
                        dram: None,
                    },
                },
                SocketSample::default(),
            ],
        };
        let after = Snapshot {
            taken: now,
            cores: vec![Some(sample(1_000, 500)), Some(sample(9, 9)), Some(sample(3_000, 1_500))],
            sockets: vec![
                SocketSample {
                    imc: Some(imc(10, 5)),
                    energy: EnergySample {
                        package: Some(counter(2_000_000)),
                        dram: None,
                    },
                },
                SocketSample::default(),
            ],
        };
        let sys = after.system_since(&before);
        assert_eq!(sys.cycles, 4_000);
        assert_eq!(sys.instructions, 2_000);
        assert_eq!(sys.read_bytes, 640);
        assert_eq!(sys.write_bytes, 320);
        assert_eq!(sys.package_joules, Some(2.0));
        assert_eq!(sys.dram_joules, None);
        assert_eq!(after.core_since(&before, 1), CoreSample::default());
        assert_eq!(after.traffic_since(&before, 1), (0, 0));
        assert_eq!(after.traffic_since(&before, 7), (0, 0));
    }

    #[test]
    fn test_hit_ratio() {
        assert_eq!(hit_ratio(0, 0), 0.0);
        assert_eq!(hit_ratio(1, 3), 0.25);
        // A heavily multiplexed count extrapolates up to u64::MAX.
        let hits = crate::perf::scale_count(u64::MAX / 2, 10, 1);
        assert_eq!(hits, u64::MAX);
        let ratio = hit_ratio(hits, 5);
        assert!(ratio > 0.99 && ratio <= 1.0);
    }

    #[test]
    fn test_system_aggregation_saturates() {
        let now = Instant::now();
        let before = Snapshot {
            taken: now,
            cores: vec![Some(sample(0, 0)), Some(sample(0, 0))],
            sockets: vec![SocketSample::default()],
        };
        let after = Snapshot {
            taken: now,
            cores: vec![Some(sample(u64::MAX, 10)), Some(sample(u64::MAX, 10))],
            sockets: vec![SocketSample::default()],
        };
        let sys = after.system_since(&before);
        assert_eq!(sys.cycles, u64::MAX);
        assert_eq!(sys.instructions, 20);
        let s = derive_system(&sys, 2, 1.0, Some(2_000_000_000), &Config::default());
        assert_eq!(s.total_ipc, 20.0 / u64::MAX as f64);
        // Far above the nominal frequency, so no throttle is reported.
        assert_eq!(s.thermal_throttle_ratio, 0.0);
    }
}
