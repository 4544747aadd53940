//! Discovery of logical CPUs, sockets and processor identification through sysfs.

use crate::util::{parse_cpu_list, read_string, read_u64};
use crate::{Error, Result};
use derive_more::{Index, IntoIterator};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A logical CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreInfo {
    /// Kernel CPU number.
    pub cpu: u32,
    /// Dense socket index (see [`SocketInfo::id`]).
    pub socket: u32,
    /// Whether the CPU is online.
    pub online: bool,
}

/// A processor package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketInfo {
    /// Dense index in `0..num_sockets`.
    pub id: u32,
    /// `physical_package_id` reported by the kernel.
    pub package_id: u32,
    /// Online CPUs belonging to this package.
    pub cpus: Vec<u32>,
}

/// Layout of the machine as seen by the kernel.
#[derive(Debug, Clone, Index, IntoIterator)]
pub struct Topology {
    /// Logical CPUs, sorted by kernel CPU number.
    #[index]
    #[into_iterator(owned, ref)]
    pub cores: Vec<CoreInfo>,
    /// Sockets, sorted by package id.
    pub sockets: Vec<SocketInfo>,
    /// Hardware threads per physical core.
    pub threads_per_core: u32,
    /// Processor brand string.
    pub brand: String,
}

impl Topology {
    /// Discover the topology below `sysfs_root`, tracking at most `max_sockets` sockets.
    pub fn discover(sysfs_root: &Path, max_sockets: usize) -> Result<Self> {
        let cpu_root = sysfs_root.join("devices/system/cpu");
        let online = match read_string(cpu_root.join("online")) {
            Ok(list) => parse_cpu_list(&list)?,
            Err(_) => Vec::new(),
        };

        let pattern = format!("{}/cpu[0-9]*", cpu_root.display());
        let mut cpus: Vec<(u32, PathBuf)> = glob::glob(&pattern)?
            .filter_map(std::result::Result::ok)
            .filter_map(|p| {
                let num = p.file_name()?.to_str()?.trim_start_matches("cpu").parse().ok()?;
                Some((num, p))
            })
            .collect();
        cpus.sort_by_key(|(num, _)| *num);
        if cpus.is_empty() {
            return Err(Error::ParseSysfs(format!("no CPUs below {}", cpu_root.display())));
        }

        // Offline CPUs have no topology directory, they are kept but never assigned a package.
        let mut packages: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut cpu_package = Vec::with_capacity(cpus.len());
        for (num, path) in &cpus {
            let is_online = online.is_empty() || online.contains(num);
            let pkg = if is_online {
                read_u64(path.join("topology/physical_package_id")).ok().map(|p| p as u32)
            } else {
                None
            };
            if let Some(pkg) = pkg {
                packages.entry(pkg).or_default().push(*num);
            }
            cpu_package.push((*num, is_online, pkg));
        }
        if packages.is_empty() {
            // Containers sometimes hide the topology directory.
            packages.insert(0, cpus.iter().map(|(n, _)| *n).collect());
        }
        if packages.len() > max_sockets {
            warn!(
                "Found {} sockets, only tracking the first {}",
                packages.len(),
                max_sockets
            );
        }

        let sockets: Vec<SocketInfo> = packages
            .into_iter()
            .take(max_sockets)
            .enumerate()
            .map(|(id, (package_id, cpus))| SocketInfo {
                id: id as u32,
                package_id,
                cpus,
            })
            .collect();

        let cores = cpu_package
            .into_iter()
            .map(|(cpu, online, pkg)| {
                let socket = pkg
                    .and_then(|p| sockets.iter().find(|s| s.package_id == p))
                    .map(|s| s.id)
                    .unwrap_or(0);
                CoreInfo {
                    cpu,
                    socket,
                    online,
                }
            })
            .collect();

        let threads_per_core = read_string(cpus[0].1.join("topology/thread_siblings_list"))
            .ok()
            .and_then(|l| parse_cpu_list(&l).ok())
            .map(|l| l.len() as u32)
            .filter(|n| *n > 0)
            .unwrap_or(1);

        let topo = Topology {
            cores,
            sockets,
            threads_per_core,
            brand: cpu_brand_string(),
        };
        debug!(
            "Discovered {} cores ({} online), {} sockets, {} threads/core",
            topo.num_cores(),
            topo.num_online_cores(),
            topo.num_sockets(),
            topo.threads_per_core
        );
        Ok(topo)
    }

    /// Number of logical CPUs.
    pub fn num_cores(&self) -> u32 {
        self.cores.len() as u32
    }

    /// Number of online logical CPUs.
    pub fn num_online_cores(&self) -> u32 {
        self.cores.iter().filter(|c| c.online).count() as u32
    }

    /// Number of tracked sockets.
    pub fn num_sockets(&self) -> u32 {
        self.sockets.len() as u32
    }

    /// Dense socket index of a kernel CPU number.
    pub fn socket_of_cpu(&self, cpu: u32) -> Option<u32> {
        self.cores.iter().find(|c| c.cpu == cpu).map(|c| c.socket)
    }

    /// Nominal (base) frequency in Hz.
    ///
    /// Tries cpufreq's `base_frequency` first, then `MSR_PLATFORM_INFO` on x86_64.
    pub fn nominal_frequency_hz(&self, sysfs_root: &Path, devfs_root: &Path) -> Option<u64> {
        let cpu = self.cores.iter().find(|c| c.online)?.cpu;
        let base = sysfs_root.join(format!(
            "devices/system/cpu/cpu{}/cpufreq/base_frequency",
            cpu
        ));
        if let Ok(khz) = read_u64(&base) {
            return Some(khz * 1000);
        }
        nominal_frequency_from_msr(devfs_root, cpu)
    }
}

#[cfg(target_arch = "x86_64")]
fn nominal_frequency_from_msr(devfs_root: &Path, cpu: u32) -> Option<u64> {
    use crate::arch::{nominal_frequency_hz, MsrAddress, MsrHandle};
    let msr = MsrHandle::new(devfs_root, cpu).ok()?;
    let info = msr.read(MsrAddress::PLATFORM_INFO_ADDR).ok()?;
    Some(nominal_frequency_hz(info)).filter(|hz| *hz > 0)
}

#[cfg(not(target_arch = "x86_64"))]
fn nominal_frequency_from_msr(_devfs_root: &Path, _cpu: u32) -> Option<u64> {
    None
}

/// Processor brand string.
#[cfg(target_arch = "x86_64")]
pub fn cpu_brand_string() -> String {
    crate::arch::get_brand_string().unwrap_or_else(crate::arch::get_cpu_string)
}

/// Processor brand string.
#[cfg(not(target_arch = "x86_64"))]
pub fn cpu_brand_string() -> String {
    std::fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|s| brand_from_cpuinfo(&s))
        .unwrap_or_else(|| String::from("unknown"))
}

/// Extract the model name from the contents of `/proc/cpuinfo`.
#[allow(dead_code)]
fn brand_from_cpuinfo(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|l| {
            let mut kv = l.splitn(2, ':');
            Some((kv.next()?.trim(), kv.next()?.trim()))
        })
        .find(|(k, _)| *k == "model name" || *k == "Model" || *k == "cpu")
        .map(|(_, v)| v.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Create a fake sysfs CPU tree: `layout[i]` is the package of CPU `i`, `None` when offline.
    pub(crate) fn fake_cpu_tree(root: &Path, layout: &[Option<u32>], threads: &str) {
        let cpu_root = root.join("devices/system/cpu");
        let mut online = Vec::new();
        for (cpu, pkg) in layout.iter().enumerate() {
            let dir = cpu_root.join(format!("cpu{}", cpu));
            std::fs::create_dir_all(&dir).unwrap();
            if let Some(pkg) = pkg {
                std::fs::create_dir_all(dir.join("topology")).unwrap();
                std::fs::write(dir.join("topology/physical_package_id"), format!("{}\n", pkg))
                    .unwrap();
                std::fs::write(dir.join("topology/thread_siblings_list"), threads).unwrap();
                online.push(cpu.to_string());
            }
        }
        std::fs::write(cpu_root.join("online"), online.join(",")).unwrap();
        std::fs::create_dir_all(cpu_root.join("cpufreq")).unwrap();
    }

    #[test]
    fn test_two_socket_discovery() {
        let dir = tempfile::tempdir().unwrap();
        fake_cpu_tree(
            dir.path(),
            &[Some(0), Some(0), Some(1), Some(1), None, Some(1)],
            "0,2\n",
        );
        let topo = Topology::discover(dir.path(), 8).unwrap();
        assert_eq!(topo.num_cores(), 6);
        assert_eq!(topo.num_online_cores(), 5);
        assert_eq!(topo.num_sockets(), 2);
        assert_eq!(topo.threads_per_core, 2);
        assert_eq!(topo.sockets[1].cpus, vec![2, 3, 5]);
        assert_eq!(topo[5].socket, 1);
        assert!(!topo[4].online);
        assert_eq!(topo.socket_of_cpu(3), Some(1));
        assert_eq!(topo.socket_of_cpu(99), None);
    }

    #[test]
    fn test_sparse_package_ids_are_densified() {
        let dir = tempfile::tempdir().unwrap();
        fake_cpu_tree(dir.path(), &[Some(3), Some(7)], "0\n");
        let topo = Topology::discover(dir.path(), 8).unwrap();
        assert_eq!(topo.num_sockets(), 2);
        assert_eq!(topo.sockets[0].package_id, 3);
        assert_eq!(topo.sockets[1].id, 1);
        assert_eq!(topo[1].socket, 1);
        assert_eq!(topo.threads_per_core, 1);
    }

    #[test]
    fn test_socket_limit() {
        let dir = tempfile::tempdir().unwrap();
        fake_cpu_tree(dir.path(), &[Some(0), Some(1), Some(2)], "0\n");
        let topo = Topology::discover(dir.path(), 2).unwrap();
        assert_eq!(topo.num_sockets(), 2);
        assert_eq!(topo.num_cores(), 3);
    }

    #[test]
    fn test_empty_tree_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Topology::discover(dir.path(), 8).is_err());
    }

    #[test]
    fn test_nominal_frequency_from_cpufreq() {
        let dir = tempfile::tempdir().unwrap();
        fake_cpu_tree(dir.path(), &[Some(0)], "0\n");
        let freq = dir.path().join("devices/system/cpu/cpu0/cpufreq");
        std::fs::create_dir_all(&freq).unwrap();
        std::fs::write(freq.join("base_frequency"), "2100000\n").unwrap();
        let topo = Topology::discover(dir.path(), 8).unwrap();
        assert_eq!(
            topo.nominal_frequency_hz(dir.path(), dir.path()),
            Some(2_100_000_000)
        );
    }

    #[test]
    fn test_cpuinfo_brand() {
        let info = "processor\t: 0\nvendor_id\t: GenuineIntel\n\
                    model name\t: Intel(R) Xeon(R) Gold 6248 CPU @ 2.50GHz\n";
        assert_eq!(
            brand_from_cpuinfo(info).as_deref(),
            Some("Intel(R) Xeon(R) Gold 6248 CPU @ 2.50GHz")
        );
        assert_eq!(brand_from_cpuinfo("flags: fpu"), None);
    }
}
