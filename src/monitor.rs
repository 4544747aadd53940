//! The measurement lifecycle: open every counter once, snapshot them around a region of
//! interest, and derive per-core, per-socket and system records from the two snapshots.

use crate::config::{Config, CountingScope};
use crate::counters::{
    derive_core, derive_io, derive_memory, derive_system, estimate_pcie, CacheCounts,
    CoreCounters, CoreSample, IoCounters, MemoryCounters, Snapshot, SocketSample,
    SystemCounters,
};
use crate::energy::{self, SocketEnergy};
use crate::perf::{self, PerfEvent, PerfGroup};
use crate::pmu::{CacheEventSet, BASIC_EVENTS};
use crate::topology::Topology;
use crate::uncore::{self, ImcSample, SocketImc};
use crate::{Counter, Error, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Check whether the kernel exposes perf events on this machine.
pub fn is_available() -> bool {
    perf::perf_supported(Path::new("/sys"))
}

/// Vendor/family/model string used to pick the cache events.
#[cfg(target_arch = "x86_64")]
fn cpu_string() -> String {
    crate::arch::get_cpu_string()
}

#[cfg(not(target_arch = "x86_64"))]
fn cpu_string() -> String {
    String::new()
}

/// Counting groups of one logical core.
#[derive(Debug)]
struct CoreGroup {
    cpu: u32,
    /// Cycles, instructions and, when supported, reference cycles.
    basic: PerfGroup,
    cache: Option<(CacheEventSet, PerfGroup)>,
}

impl CoreGroup {
    fn open(cpu: u32, scope: CountingScope, cache_set: CacheEventSet) -> Result<Self> {
        let builder = match scope {
            CountingScope::System => PerfEvent::build().pid(-1).collect_kernel(),
            CountingScope::CallingThread => PerfEvent::build().pid(0),
        }
        .cpuid(cpu as i32)
        .start_disabled();

        let attrs: Vec<_> = BASIC_EVENTS.iter().map(|e| e.attr()).collect();
        let basic = match builder.clone().open_group(&attrs) {
            Ok(g) => g,
            Err(e) if e.is_permission_denied() => return Err(e),
            Err(e) => {
                debug!(
                    "CPU {}: {} unavailable ({}), continuing without it",
                    cpu, BASIC_EVENTS[2].name, e
                );
                builder.clone().open_group(&attrs[..2])?
            }
        };

        let cache_attrs: Vec<_> = cache_set.events().iter().map(|e| e.attr()).collect();
        let cache = match builder.open_group(&cache_attrs) {
            Ok(g) => Some((cache_set, g)),
            Err(e) => {
                debug!("CPU {}: cache events unavailable - {}", cpu, e);
                None
            }
        };
        Ok(CoreGroup { cpu, basic, cache })
    }
}

impl Counter<CoreSample> for CoreGroup {
    fn name(&self) -> &str {
        "core"
    }

    fn enable(&self) -> Result<()> {
        self.basic.enable()?;
        if let Some((_, g)) = &self.cache {
            g.enable()?;
        }
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.basic.disable()?;
        if let Some((_, g)) = &self.cache {
            g.disable()?;
        }
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.basic.reset()?;
        if let Some((_, g)) = &self.cache {
            g.reset()?;
        }
        Ok(())
    }

    fn read_sync(&self) -> Result<CoreSample> {
        let basic = self.basic.read()?;
        let cache = match &self.cache {
            Some((set, g)) => {
                let reading = g.read()?;
                let values: Vec<u64> = (0..reading.values.len())
                    .filter_map(|i| reading.scaled(i))
                    .collect();
                set.decode(&values).map(|(l2_hits, l2_misses, l3_hits, l3_misses)| CacheCounts {
                    l2_hits,
                    l2_misses,
                    l3_hits,
                    l3_misses,
                })
            }
            None => None,
        };
        Ok(CoreSample {
            cycles: basic.scaled(0).ok_or(Error::NoneError)?,
            instructions: basic.scaled(1).ok_or(Error::NoneError)?,
            ref_cycles: basic.scaled(2),
            cache,
        })
    }
}

/// Open the groups of every online core. Offline cores get `None`.
fn open_cores(topology: &Topology, scope: CountingScope) -> Result<Vec<Option<CoreGroup>>> {
    let cache_set = CacheEventSet::for_cpu(&cpu_string());
    open_cores_with(topology, |cpu| CoreGroup::open(cpu, scope, cache_set))
}

/// Run `open` on every online core.
///
/// Permission errors abort right away so the caller can retry with a narrower scope. When every
/// core fails for other reasons the machine has no usable core PMU.
fn open_cores_with<T, F>(topology: &Topology, mut open: F) -> Result<Vec<Option<T>>>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut groups = Vec::with_capacity(topology.cores.len());
    for core in topology {
        if !core.online {
            groups.push(None);
            continue;
        }
        match open(core.cpu) {
            Ok(g) => groups.push(Some(g)),
            Err(e) if e.is_permission_denied() => return Err(e),
            Err(e) => {
                warn!("Failed to open counters on CPU {} - {}", core.cpu, e);
                groups.push(None);
            }
        }
    }
    if groups.iter().all(Option::is_none) {
        return Err(Error::PmuNotFound(String::from("cpu")));
    }
    Ok(groups)
}

/// Before/after snapshots of a completed measurement.
#[derive(Debug)]
struct Measurement {
    before: Snapshot,
    after: Snapshot,
    elapsed: Duration,
}

impl Measurement {
    fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// PCIe traffic of a socket sampled over a short window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PcieSample {
    /// Bytes read by devices.
    pub read_bytes: u64,
    /// Bytes written by devices.
    pub write_bytes: u64,
    /// `PCIRdCur` requests, only known when measured by dedicated counters.
    pub pci_rd_cur: Option<u64>,
    /// The byte counts are derived from memory controller traffic.
    pub estimated: bool,
}

/// Sum the memory traffic of consecutive `(before, after)` readings and turn it into a PCIe
/// estimate. Zeros when `factor` is `None`.
fn pcie_from_slices(slices: &[(ImcSample, ImcSample)], factor: Option<f64>) -> PcieSample {
    let (reads, writes) = slices.iter().fold((0u64, 0u64), |(r, w), (before, after)| {
        let (dr, dw) = after.bytes_since(before);
        (r.saturating_add(dr), w.saturating_add(dw))
    });
    match factor {
        Some(factor) => PcieSample {
            read_bytes: estimate_pcie(reads, factor),
            write_bytes: estimate_pcie(writes, factor),
            pci_rd_cur: None,
            estimated: true,
        },
        None => PcieSample::default(),
    }
}

/// Samples the PCIe traffic of one socket.
///
/// Holds its own handle on the socket's counters, so sampling does not borrow the [`Monitor`].
#[derive(Debug, Clone)]
pub struct PcieSampler {
    socket: u32,
    imc: Arc<SocketImc>,
    window: Duration,
    factor: Option<f64>,
}

impl PcieSampler {
    /// Read the counters `PCIE_SAMPLE_SLICES` times over the window. Blocks for the window.
    pub fn sample(&self) -> Result<PcieSample> {
        let slices = crate::config::PCIE_SAMPLE_SLICES;
        let slice = self.window / slices;
        let mut readings = Vec::with_capacity(slices as usize);
        for idx in 0..slices {
            let before = self.imc.read_sync()?;
            std::thread::sleep(slice);
            let after = self.imc.read_sync()?;
            let (r, w) = after.bytes_since(&before);
            debug!("Socket {} slice {}: {} B read, {} B written", self.socket, idx, r, w);
            readings.push((before, after));
        }
        Ok(pcie_from_slices(&readings, self.factor))
    }
}

/// Hardware counter monitor.
///
/// Created once, then used for any number of `start_measurement`/`stop_measurement` pairs. All
/// queries report on the last completed pair. Dropping the monitor closes every counter.
#[derive(Debug)]
pub struct Monitor {
    config: Config,
    topology: Topology,
    scope: CountingScope,
    cores: Vec<Option<CoreGroup>>,
    imcs: Vec<Arc<SocketImc>>,
    energy: Vec<SocketEnergy>,
    nominal_hz: Option<u64>,
    pending: Option<Snapshot>,
    last: Option<Measurement>,
}

impl Monitor {
    /// Discover the machine and open every available counter.
    ///
    /// Core counters are required. System wide counting falls back to counting only the calling
    /// thread when the kernel denies it. Memory and energy counters are optional, their
    /// records read as zero when they cannot be opened.
    pub fn new(config: Config) -> Result<Self> {
        let topology = Topology::discover(&config.sysfs_root, config.max_sockets)?;

        let mut scope = config.scope;
        let cores = match open_cores(&topology, scope) {
            Ok(c) => c,
            Err(e) if e.is_permission_denied() && scope == CountingScope::System => {
                let paranoid = perf::paranoid_level()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|_| "?".into());
                warn!(
                    "System wide counting denied ({}, perf_event_paranoid = {})",
                    e, paranoid
                );
                warn!("Only the initializing thread is counted, other threads read as zero");
                scope = CountingScope::CallingThread;
                open_cores(&topology, scope)?
            }
            Err(e) => return Err(e),
        };
        for group in cores.iter().flatten() {
            group.reset()?;
            group.enable()?;
        }

        let imcs: Vec<_> = if scope == CountingScope::System {
            uncore::discover(&config.sysfs_root, &topology)
                .into_iter()
                .map(Arc::new)
                .collect()
        } else {
            Vec::new()
        };
        if imcs.is_empty() {
            warn!("Memory controller counters unavailable, memory traffic reads as zero");
        }
        for imc in &imcs {
            imc.enable()?;
        }

        let energy = energy::discover(&config.sysfs_root, &config.devfs_root, &topology);
        if energy.is_empty() {
            warn!("{}, energy reads as zero", Error::EnergyUnavailable);
        }

        let nominal_hz = topology.nominal_frequency_hz(&config.sysfs_root, &config.devfs_root);
        let monitor = Monitor::assemble(config, topology, scope, cores, imcs, energy, nominal_hz);
        info!(
            "Monitor initialized: {} cores, {} sockets, {} scope",
            monitor.topology.num_cores(),
            monitor.topology.num_sockets(),
            monitor.scope
        );
        Ok(monitor)
    }

    fn assemble(
        config: Config,
        topology: Topology,
        scope: CountingScope,
        cores: Vec<Option<CoreGroup>>,
        imcs: Vec<Arc<SocketImc>>,
        energy: Vec<SocketEnergy>,
        nominal_hz: Option<u64>,
    ) -> Self {
        Monitor {
            config,
            topology,
            scope,
            cores,
            imcs,
            energy,
            nominal_hz,
            pending: None,
            last: None,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Machine layout.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Scope the core counters ended up with.
    pub fn scope(&self) -> CountingScope {
        self.scope
    }

    fn snapshot(&self) -> Snapshot {
        let taken = Instant::now();
        let cores = self
            .cores
            .iter()
            .map(|c| {
                let group = c.as_ref()?;
                group
                    .read_sync()
                    .map_err(|e| debug!("Failed to read CPU {} - {}", group.cpu, e))
                    .ok()
            })
            .collect();
        let sockets = self
            .topology
            .sockets
            .iter()
            .map(|s| SocketSample {
                imc: self
                    .imcs
                    .iter()
                    .find(|i| i.socket == s.id)
                    .and_then(|i| {
                        i.read_sync()
                            .map_err(|e| debug!("IMC read failed - {}", e))
                            .ok()
                    }),
                energy: self
                    .energy
                    .iter()
                    .find(|e| e.socket == s.id)
                    .and_then(|e| {
                        e.read_sync()
                            .map_err(|e| debug!("Energy read failed - {}", e))
                            .ok()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        Snapshot {
            taken,
            cores,
            sockets,
        }
    }

    /// Take the "before" snapshot. A pending start is replaced.
    pub fn start_measurement(&mut self) -> Result<()> {
        self.pending = Some(self.snapshot());
        debug!("Measurement started");
        Ok(())
    }

    /// Take the "after" snapshot and make the pair available to the queries.
    pub fn stop_measurement(&mut self) -> Result<Duration> {
        let before = self.pending.take().ok_or(Error::NoMeasurement)?;
        let after = self.snapshot();
        let elapsed = after.taken.duration_since(before.taken);
        debug!("Measurement stopped (duration: {:.3} sec)", elapsed.as_secs_f64());
        if elapsed < Duration::from_micros(self.config.thresholds.min_measurement_us) {
            warn!(
                "Very short measurement ({:.1} ms), accuracy may be reduced",
                elapsed.as_secs_f64() * 1000.0
            );
        }
        self.finish(before, after, elapsed);
        Ok(elapsed)
    }

    fn finish(&mut self, before: Snapshot, after: Snapshot, elapsed: Duration) {
        self.last = Some(Measurement {
            before,
            after,
            elapsed,
        });
    }

    fn measurement(&self) -> Result<&Measurement> {
        self.last.as_ref().ok_or(Error::NoMeasurement)
    }

    /// Duration of the last completed measurement, zero before the first one.
    pub fn measurement_duration(&self) -> Duration {
        self.last.as_ref().map(|m| m.elapsed).unwrap_or_default()
    }

    fn check_core(&self, core: u32) -> Result<()> {
        let n = self.topology.num_cores();
        if core >= n {
            return Err(Error::CoreOutOfRange(core, n));
        }
        Ok(())
    }

    fn check_socket(&self, socket: u32) -> Result<()> {
        let n = self.topology.num_sockets();
        if socket >= n {
            return Err(Error::SocketOutOfRange(socket, n));
        }
        Ok(())
    }

    /// Cycles and instructions of `core`.
    pub fn basic_counters(&self, core: u32) -> Result<(u64, u64)> {
        self.check_core(core)?;
        let m = self.measurement()?;
        let delta = m.after.core_since(&m.before, core as usize);
        Ok((delta.cycles, delta.instructions))
    }

    /// All counters of `core`. Indices past the last core wrap around.
    pub fn core_counters(&self, core: u32) -> Result<CoreCounters> {
        let n = self.topology.num_cores();
        let core = if core >= n {
            warn!("Core {} exceeds available cores {}", core, n);
            core % n
        } else {
            core
        };
        let m = self.measurement()?;
        let delta = m.after.core_since(&m.before, core as usize);
        Ok(derive_core(&delta, m.elapsed_secs(), core, &self.config))
    }

    /// Memory controller traffic of `socket`.
    pub fn memory_counters(&self, socket: u32) -> Result<MemoryCounters> {
        self.check_socket(socket)?;
        let m = self.measurement()?;
        let (reads, writes) = m.after.traffic_since(&m.before, socket as usize);
        derive_memory(reads, writes, m.elapsed_secs(), &self.config)
    }

    /// I/O counters of `socket`.
    pub fn io_counters(&self, socket: u32) -> Result<IoCounters> {
        self.check_socket(socket)?;
        let m = self.measurement()?;
        let (reads, writes) = m.after.traffic_since(&m.before, socket as usize);
        derive_io(reads, writes, m.elapsed_secs(), &self.config)
    }

    /// Machine wide counters.
    pub fn system_counters(&self) -> Result<SystemCounters> {
        let m = self.measurement()?;
        let sys = m.after.system_since(&m.before);
        Ok(derive_system(
            &sys,
            self.topology.num_online_cores(),
            m.elapsed_secs(),
            self.nominal_hz,
            &self.config,
        ))
    }

    /// Human readable description of the machine.
    pub fn system_info(&self) -> String {
        format!(
            "CPU: {}\nCores: {} (Online: {})\nSockets: {}\nThreads/Core: {}\n",
            self.topology.brand,
            self.topology.num_cores(),
            self.topology.num_online_cores(),
            self.topology.num_sockets(),
            self.topology.threads_per_core
        )
    }

    /// Whether PCIe traffic is measured by dedicated counters rather than estimated.
    pub fn has_pcie_counters(&self) -> bool {
        false
    }

    /// Sampler for the PCIe traffic of `socket`.
    pub fn pcie_sampler(&self, socket: u32) -> Result<PcieSampler> {
        self.check_socket(socket)?;
        let imc = self
            .imcs
            .iter()
            .find(|i| i.socket == socket)
            .ok_or_else(|| Error::PmuNotFound(String::from("uncore_imc")))?;
        let factor = if self.config.pcie_estimation {
            Some(self.config.pcie_estimation_factor)
        } else {
            None
        };
        Ok(PcieSampler {
            socket,
            imc: Arc::clone(imc),
            window: self.config.pcie_sample_window,
            factor,
        })
    }

    /// Sample the PCIe traffic of `socket` over the configured window. Blocks for the window.
    pub fn instant_pcie_bytes(&self, socket: u32) -> Result<PcieSample> {
        self.pcie_sampler(socket)?.sample()
    }

    /// Change the verbosity of the log records.
    pub fn set_log_level(&mut self, level: crate::config::LogLevel) {
        self.config.log_level = level;
        crate::logging::set_log_level(level);
    }
}
