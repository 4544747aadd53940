//! Memory controller traffic from the uncore IMC PMUs.
//!
//! Server parts expose one `uncore_imc_<N>` PMU per memory channel with `cas_count_read` and
//! `cas_count_write` aliases. Client parts expose a single `uncore_imc` PMU with free running
//! `data_reads` and `data_writes` counters, and newer ones add `uncore_imc_free_running_<N>`
//! next to the programmable `uncore_imc_<N>` PMUs. Only one family is opened since both count
//! the same traffic. Events are resolved through their sysfs aliases and opened system wide on
//! the CPU the kernel lists in `cpumask` for every package.

use crate::perf::PerfEvent;
use crate::pmu::{ResolvedEvent, SysfsPmu, IMC_EVENT_PAIRS};
use crate::topology::Topology;
use crate::{Counter, Result, ScaledValue};
use log::{debug, info, warn};
use std::path::Path;

/// Size of one CAS transfer, used when a PMU does not publish a byte unit.
const CACHE_LINE_BYTES: f64 = 64.0;

/// Accumulated IMC counts of one socket at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImcSample {
    /// Sum of the read counts over all channels.
    pub read_counts: u64,
    /// Sum of the write counts over all channels.
    pub write_counts: u64,
    /// Bytes per read count.
    pub read_scale: f64,
    /// Bytes per write count.
    pub write_scale: f64,
}

impl ImcSample {
    /// Bytes read and written since `before`.
    pub fn bytes_since(&self, before: &ImcSample) -> (u64, u64) {
        let reads = self.read_counts.saturating_sub(before.read_counts);
        let writes = self.write_counts.saturating_sub(before.write_counts);
        (
            (reads as f64 * self.read_scale).round() as u64,
            (writes as f64 * self.write_scale).round() as u64,
        )
    }
}

/// One opened read/write pair of a memory channel.
#[derive(Debug)]
struct ImcChannel {
    pmu: String,
    read: PerfEvent,
    write: PerfEvent,
}

/// IMC counters of one socket.
#[derive(Debug)]
pub struct SocketImc {
    /// Dense socket index.
    pub socket: u32,
    channels: Vec<ImcChannel>,
    read_scale: f64,
    write_scale: f64,
}

impl SocketImc {
    /// Number of opened memory channels.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}

impl Counter<ImcSample> for SocketImc {
    fn name(&self) -> &str {
        "imc"
    }

    fn enable(&self) -> Result<()> {
        for ch in &self.channels {
            ch.read.enable()?;
            ch.write.enable()?;
        }
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        for ch in &self.channels {
            ch.read.disable()?;
            ch.write.disable()?;
        }
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        for ch in &self.channels {
            ch.read.reset()?;
            ch.write.reset()?;
        }
        Ok(())
    }

    fn read_sync(&self) -> Result<ImcSample> {
        let mut sample = ImcSample {
            read_scale: self.read_scale,
            write_scale: self.write_scale,
            ..ImcSample::default()
        };
        for ch in &self.channels {
            let reads = ch.read.read_value()?.scaled_value();
            let writes = ch.write.read_value()?.scaled_value();
            sample.read_counts = sample.read_counts.saturating_add(reads);
            sample.write_counts = sample.write_counts.saturating_add(writes);
        }
        Ok(sample)
    }
}

/// Pick the first read/write alias pair exported by `pmu`.
fn resolve_pair(pmu: &SysfsPmu) -> Option<(ResolvedEvent, ResolvedEvent)> {
    IMC_EVENT_PAIRS
        .iter()
        .filter(|(r, w)| pmu.has_event(r) && pmu.has_event(w))
        .find_map(|(r, w)| match (pmu.resolve_event(r), pmu.resolve_event(w)) {
            (Ok(r), Ok(w)) => Some((r, w)),
            (Err(e), _) | (_, Err(e)) => {
                debug!("Failed to resolve IMC events on {} - {}", pmu.name, e);
                None
            }
        })
}

fn is_free_running(pmu: &SysfsPmu) -> bool {
    pmu.name.contains("free_running")
}

/// Resolve the event pairs of a single PMU family.
///
/// Programmable `uncore_imc_<N>` PMUs win. The free running ones are only used when none of the
/// others export a usable pair.
fn select_channels(pmus: &[SysfsPmu]) -> Vec<(&SysfsPmu, ResolvedEvent, ResolvedEvent)> {
    let resolve = |free_running: bool| {
        pmus.iter()
            .filter(|p| is_free_running(p) == free_running)
            .filter_map(|p| match resolve_pair(p) {
                Some((r, w)) => Some((p, r, w)),
                None => {
                    debug!("{} exports no memory traffic events", p.name);
                    None
                }
            })
            .collect::<Vec<_>>()
    };
    let channels = resolve(false);
    if channels.is_empty() {
        resolve(true)
    } else {
        channels
    }
}

fn open_on(evt: &ResolvedEvent, cpu: u32) -> Result<PerfEvent> {
    PerfEvent::build()
        .pid(-1)
        .cpuid(cpu as i32)
        .all_modes()
        .open(evt.attr)
}

/// Open the IMC counters of every socket, in socket order.
///
/// Sockets without any usable memory channel are left out. An empty result means memory traffic
/// is unavailable on this machine.
pub fn discover(sysfs_root: &Path, topology: &Topology) -> Vec<SocketImc> {
    let pmus = match SysfsPmu::find(sysfs_root, "uncore_imc*") {
        Ok(pmus) => pmus,
        Err(e) => {
            warn!("Failed to enumerate IMC PMUs - {}", e);
            return Vec::new();
        }
    };

    let mut sockets: Vec<SocketImc> = topology
        .sockets
        .iter()
        .map(|s| SocketImc {
            socket: s.id,
            channels: Vec::new(),
            read_scale: CACHE_LINE_BYTES,
            write_scale: CACHE_LINE_BYTES,
        })
        .collect();

    for (pmu, read, write) in select_channels(&pmus) {
        for cpu in &pmu.cpus {
            let socket = match topology.socket_of_cpu(*cpu) {
                Some(s) => s,
                None => continue,
            };
            let entry = match sockets.iter_mut().find(|s| s.socket == socket) {
                Some(e) => e,
                None => continue,
            };
            match (open_on(&read, *cpu), open_on(&write, *cpu)) {
                (Ok(r), Ok(w)) => {
                    entry.read_scale = read.bytes_per_count().unwrap_or(CACHE_LINE_BYTES);
                    entry.write_scale = write.bytes_per_count().unwrap_or(CACHE_LINE_BYTES);
                    entry.channels.push(ImcChannel {
                        pmu: pmu.name.clone(),
                        read: r,
                        write: w,
                    });
                }
                (Err(e), _) | (_, Err(e)) => {
                    debug!("Failed to open {} on CPU {} - {}", pmu.name, cpu, e);
                }
            }
        }
    }

    sockets.retain(|s| !s.channels.is_empty());
    for s in &sockets {
        let names: Vec<&str> = s.channels.iter().map(|c| c.pmu.as_str()).collect();
        info!(
            "Socket {}: memory traffic from {} channels ({})",
            s.socket,
            s.num_channels(),
            names.join(", ")
        );
    }
    sockets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::tests::fake_pmu;
    use crate::topology::tests::fake_cpu_tree;

    #[test]
    fn test_bytes_since() {
        let before = ImcSample {
            read_counts: 1_000,
            write_counts: 500,
            read_scale: 64.0,
            write_scale: 64.0,
        };
        let after = ImcSample {
            read_counts: 3_000,
            write_counts: 600,
            ..before
        };
        assert_eq!(after.bytes_since(&before), (128_000, 6_400));
        // A counter that went backwards never yields a huge delta.
        assert_eq!(before.bytes_since(&after), (0, 0));
    }

    #[test]
    fn test_resolve_pair_prefers_cas_counts() {
        let dir = tempfile::tempdir().unwrap();
        fake_pmu(
            dir.path(),
            "uncore_imc_0",
            14,
            Some("0"),
            &[
                ("cas_count_read", "event=0x04,umask=0x03", Some("6.103515625e-5"), Some("MiB")),
                ("cas_count_write", "event=0x04,umask=0x0c", Some("6.103515625e-5"), Some("MiB")),
                ("data_reads", "event=0xff,umask=0x20", None, None),
                ("data_writes", "event=0xff,umask=0x21", None, None),
            ],
        );
        let pmu = SysfsPmu::open(dir.path(), "uncore_imc_0").unwrap();
        let (r, w) = resolve_pair(&pmu).unwrap();
        assert_eq!(r.name, "cas_count_read");
        assert_eq!(w.attr.config, 0x0c04);
        assert_eq!(r.bytes_per_count(), Some(64.0));
    }

    #[test]
    fn test_resolve_pair_client_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fake_pmu(
            dir.path(),
            "uncore_imc",
            13,
            Some("0"),
            &[
                ("data_reads", "event=0x01", Some("6.103515625e-5"), Some("MiB")),
                ("data_writes", "event=0x02", Some("6.103515625e-5"), Some("MiB")),
            ],
        );
        let pmu = SysfsPmu::open(dir.path(), "uncore_imc").unwrap();
        let (r, _) = resolve_pair(&pmu).unwrap();
        assert_eq!(r.name, "data_reads");
    }

    #[test]
    fn test_resolve_pair_requires_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        fake_pmu(
            dir.path(),
            "uncore_imc_1",
            15,
            Some("0"),
            &[("cas_count_read", "event=0x04,umask=0x03", None, None)],
        );
        let pmu = SysfsPmu::open(dir.path(), "uncore_imc_1").unwrap();
        assert!(resolve_pair(&pmu).is_none());
    }

    #[test]
    fn test_select_channels_single_family() {
        let dir = tempfile::tempdir().unwrap();
        let events = [
            ("data_read", "event=0xff,umask=0x20", Some("6.103515625e-5"), Some("MiB")),
            ("data_write", "event=0xff,umask=0x21", Some("6.103515625e-5"), Some("MiB")),
        ];
        fake_pmu(dir.path(), "uncore_imc_0", 16, Some("0"), &events);
        fake_pmu(dir.path(), "uncore_imc_1", 17, Some("0"), &events);
        fake_pmu(dir.path(), "uncore_imc_free_running_0", 18, Some("0"), &events);
        let pmus = SysfsPmu::find(dir.path(), "uncore_imc*").unwrap();
        assert_eq!(pmus.len(), 3);
        let names: Vec<&str> = select_channels(&pmus)
            .iter()
            .map(|(p, _, _)| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["uncore_imc_0", "uncore_imc_1"]);
    }

    #[test]
    fn test_select_channels_free_running_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fake_pmu(
            dir.path(),
            "uncore_imc_0",
            16,
            Some("0"),
            &[("clockticks", "event=0x01", None, None)],
        );
        fake_pmu(
            dir.path(),
            "uncore_imc_free_running_0",
            18,
            Some("0"),
            &[
                ("data_read", "event=0xff,umask=0x20", None, None),
                ("data_write", "event=0xff,umask=0x21", None, None),
            ],
        );
        let pmus = SysfsPmu::find(dir.path(), "uncore_imc*").unwrap();
        let selected = select_channels(&pmus);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0.name, "uncore_imc_free_running_0");
        assert_eq!(selected[0].1.name, "data_read");
    }

    #[test]
    fn test_discover_without_pmus() {
        let dir = tempfile::tempdir().unwrap();
        fake_cpu_tree(dir.path(), &[Some(0), Some(1)], "0\n");
        let topo = Topology::discover(dir.path(), 8).unwrap();
        assert!(discover(dir.path(), &topo).is_empty());
    }

    #[test]
    #[ignore]
    fn test_live_imc() {
        let topo = Topology::discover(Path::new("/sys"), 8).unwrap();
        let imcs = discover(Path::new("/sys"), &topo);
        assert!(!imcs.is_empty());
        let before = imcs[0].read_sync().unwrap();
        let buf = vec![1u8; 64 << 20];
        let sum: u64 = buf.iter().map(|b| *b as u64).sum();
        println!("Sum: {}", sum);
        let after = imcs[0].read_sync().unwrap();
        let (reads, _) = after.bytes_since(&before);
        assert!(reads > 0);
    }
}
