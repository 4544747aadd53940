//! Utilities to discover kernel PMUs and resolve their named events into perf attributes.
//!
//! The kernel publishes every PMU below `/sys/bus/event_source/devices/<pmu>` with:
//!
//! * `type` - value for `perf_event_attr::type_`,
//! * `cpumask` - CPUs on which uncore events must be opened (one per package),
//! * `format/<field>` - bit layout of fields such as `config:0-7`,
//! * `events/<name>` - event aliases such as `event=0x04,umask=0x03`, with optional
//!   `<name>.scale` and `<name>.unit` companions.

use crate::perf::ffi;
use crate::util::{parse_cpu_list, parse_int, read_string};
use crate::{Error, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::path::{Path, PathBuf};

mod events;
pub use events::{raw_config, CacheEventSet, CoreEvent, BASIC_EVENTS, IMC_EVENT_PAIRS};

lazy_static! {
    /// `format/<field>` contents, e.g. `config:0-7,21` or `config1:0-15`.
    static ref FORMAT_RE: Regex = Regex::new(r"^(config[12]?):([0-9,\-]+)$").unwrap();
}

/// Which configuration word of `perf_event_attr` a format field lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWord {
    /// `config`
    Config,
    /// `config1`
    Config1,
    /// `config2`
    Config2,
}

/// Bit layout of one PMU format field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    /// Target word.
    pub word: ConfigWord,
    /// Inclusive bit ranges, low bits of the value fill the first range.
    pub ranges: Vec<(u32, u32)>,
}

impl FormatSpec {
    /// Parse the contents of a `format/<field>` file.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let caps = FORMAT_RE
            .captures(s)
            .ok_or_else(|| Error::ParseSysfs(s.to_string()))?;
        let word = match &caps[1] {
            "config" => ConfigWord::Config,
            "config1" => ConfigWord::Config1,
            _ => ConfigWord::Config2,
        };
        let mut ranges = Vec::new();
        for part in caps[2].split(',') {
            let (lo, hi) = match part.find('-') {
                Some(idx) => (part[..idx].parse::<u32>()?, part[idx + 1..].parse::<u32>()?),
                None => {
                    let bit = part.parse::<u32>()?;
                    (bit, bit)
                }
            };
            if hi < lo || hi > 63 {
                return Err(Error::ParseSysfs(s.to_string()));
            }
            ranges.push((lo, hi));
        }
        Ok(FormatSpec { word, ranges })
    }

    /// Scatter `value` into the bits described by this field.
    pub fn apply(&self, value: u64, words: &mut [u64; 3]) {
        let target = match self.word {
            ConfigWord::Config => &mut words[0],
            ConfigWord::Config1 => &mut words[1],
            ConfigWord::Config2 => &mut words[2],
        };
        let mut shift = 0u32;
        for (lo, hi) in &self.ranges {
            let width = hi - lo + 1;
            let mask = if width >= 64 { !0u64 } else { (1u64 << width) - 1 };
            let bits = if shift >= 64 { 0 } else { (value >> shift) & mask };
            *target = (*target & !(mask << lo)) | (bits << lo);
            shift += width;
        }
    }
}

/// A named event of a PMU, resolved into perf attributes.
#[derive(Clone)]
pub struct ResolvedEvent {
    /// Alias name.
    pub name: String,
    /// Attributes ready to be passed to `perf_event_open`.
    pub attr: ffi::perf_event_attr,
    /// Multiplier converting counts into `unit`.
    pub scale: f64,
    /// Unit of the scaled value, e.g. `MiB`.
    pub unit: Option<String>,
}

impl std::fmt::Debug for ResolvedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedEvent")
            .field("name", &self.name)
            .field("type", &self.attr.type_)
            .field("config", &format_args!("{:#x}", self.attr.config))
            .field("scale", &self.scale)
            .field("unit", &self.unit)
            .finish()
    }
}

impl ResolvedEvent {
    /// Bytes represented by one count when the unit is a byte multiple, or `None`.
    pub fn bytes_per_count(&self) -> Option<f64> {
        let multiplier = match self.unit.as_deref() {
            Some("B") | Some("Bytes") => 1.0,
            Some("KiB") => 1024.0,
            Some("MiB") => 1024.0 * 1024.0,
            Some("GiB") => 1024.0 * 1024.0 * 1024.0,
            _ => return None,
        };
        Some(self.scale * multiplier)
    }

    /// Convert a raw count into bytes when the unit is a byte multiple, or `None`.
    pub fn count_to_bytes(&self, count: u64) -> Option<u64> {
        Some((count as f64 * self.bytes_per_count()?).round() as u64)
    }
}

/// A PMU exported by the kernel through sysfs.
#[derive(Debug, Clone)]
pub struct SysfsPmu {
    /// Name of the PMU, e.g. `uncore_imc_0`.
    pub name: String,
    /// Dynamic perf type of the PMU.
    pub type_: u32,
    /// CPUs listed in `cpumask`, empty for core PMUs.
    pub cpus: Vec<u32>,
    /// Directory of the PMU.
    path: PathBuf,
}

impl SysfsPmu {
    fn devices_dir(sysfs_root: &Path) -> PathBuf {
        sysfs_root.join("bus/event_source/devices")
    }

    /// Load a PMU by name.
    pub fn open(sysfs_root: &Path, name: &str) -> Result<Self> {
        let path = SysfsPmu::devices_dir(sysfs_root).join(name);
        if !path.exists() {
            return Err(Error::PmuNotFound(name.to_string()));
        }
        SysfsPmu::from_path(path)
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(Error::NoneError)?
            .to_string();
        let type_ = read_string(path.join("type"))?.parse::<u32>()?;
        let cpus = match read_string(path.join("cpumask")) {
            Ok(mask) => parse_cpu_list(&mask)?,
            Err(_) => Vec::new(),
        };
        Ok(SysfsPmu {
            name,
            type_,
            cpus,
            path,
        })
    }

    /// Find all PMUs whose names match a glob `pattern`, sorted by name.
    pub fn find(sysfs_root: &Path, pattern: &str) -> Result<Vec<Self>> {
        let dir = SysfsPmu::devices_dir(sysfs_root);
        let mut pmus = glob::glob(&format!("{}/{}", dir.display(), pattern))?
            .filter_map(std::result::Result::ok)
            .filter_map(|p| match SysfsPmu::from_path(p) {
                Ok(pmu) => Some(pmu),
                Err(e) => {
                    debug!("Skipping malformed PMU entry - {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();
        pmus.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pmus)
    }

    /// Check if the PMU exports the event alias `event`.
    pub fn has_event(&self, event: &str) -> bool {
        self.path.join("events").join(event).is_file()
    }

    /// Read the layout of a format field.
    pub fn format(&self, field: &str) -> Result<FormatSpec> {
        FormatSpec::parse(&read_string(self.path.join("format").join(field))?)
    }

    /// Resolve an event alias into perf attributes.
    pub fn resolve_event(&self, event: &str) -> Result<ResolvedEvent> {
        let events = self.path.join("events");
        let spec = read_string(events.join(event))
            .map_err(|_| Error::EventNotFound(self.name.clone(), event.to_string()))?;
        let words = self.encode_terms(&spec)?;
        let scale = match read_string(events.join(format!("{}.scale", event))) {
            Ok(s) => s.parse::<f64>()?,
            Err(_) => 1.0,
        };
        let unit = read_string(events.join(format!("{}.unit", event))).ok();

        let mut attr = ffi::counting_attr(self.type_, words[0]);
        attr.__bindgen_anon_3.config1 = words[1];
        attr.__bindgen_anon_4.config2 = words[2];
        Ok(ResolvedEvent {
            name: event.to_string(),
            attr,
            scale,
            unit,
        })
    }

    /// Encode a comma separated list of `field=value` terms.
    fn encode_terms(&self, spec: &str) -> Result<[u64; 3]> {
        let mut words = [0u64; 3];
        for term in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut kv = term.splitn(2, '=');
            let field = kv.next().ok_or(Error::NoneError)?;
            let value = match kv.next() {
                Some(v) => parse_int(v)?,
                None => 1,
            };
            self.format(field)?.apply(value, &mut words);
        }
        Ok(words)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Create a fake PMU directory with `events` given as `(name, spec, scale, unit)`.
    pub(crate) fn fake_pmu(
        root: &Path,
        name: &str,
        type_: u32,
        cpumask: Option<&str>,
        events: &[(&str, &str, Option<&str>, Option<&str>)],
    ) {
        let dir = root.join("bus/event_source/devices").join(name);
        std::fs::create_dir_all(dir.join("format")).unwrap();
        std::fs::create_dir_all(dir.join("events")).unwrap();
        std::fs::write(dir.join("type"), format!("{}\n", type_)).unwrap();
        if let Some(mask) = cpumask {
            std::fs::write(dir.join("cpumask"), mask).unwrap();
        }
        std::fs::write(dir.join("format/event"), "config:0-7\n").unwrap();
        std::fs::write(dir.join("format/umask"), "config:8-15\n").unwrap();
        std::fs::write(dir.join("format/edge"), "config:18\n").unwrap();
        for (ev, spec, scale, unit) in events {
            std::fs::write(dir.join("events").join(ev), spec).unwrap();
            if let Some(s) = scale {
                std::fs::write(dir.join("events").join(format!("{}.scale", ev)), s).unwrap();
            }
            if let Some(u) = unit {
                std::fs::write(dir.join("events").join(format!("{}.unit", ev)), u).unwrap();
            }
        }
    }

    #[test]
    fn test_format_parsing() {
        let spec = FormatSpec::parse("config:0-7,21-23\n").unwrap();
        assert_eq!(spec.word, ConfigWord::Config);
        assert_eq!(spec.ranges, vec![(0, 7), (21, 23)]);
        let spec = FormatSpec::parse("config1:0-15").unwrap();
        assert_eq!(spec.word, ConfigWord::Config1);
        assert!(FormatSpec::parse("config:7-0").is_err());
        assert!(FormatSpec::parse("bogus:0-7").is_err());
        assert!(FormatSpec::parse("config:0-64").is_err());
    }

    #[test]
    fn test_format_scatter() {
        let mut words = [0u64; 3];
        FormatSpec::parse("config:0-7,21-23").unwrap().apply(0x3FF, &mut words);
        assert_eq!(words[0], 0xFF | (0x3 << 21));
        FormatSpec::parse("config2:4").unwrap().apply(1, &mut words);
        assert_eq!(words[2], 1 << 4);
    }

    #[test]
    fn test_resolve_imc_event() {
        let dir = tempfile::tempdir().unwrap();
        fake_pmu(
            dir.path(),
            "uncore_imc_0",
            14,
            Some("0,28\n"),
            &[(
                "cas_count_read",
                "event=0x04,umask=0x03\n",
                Some("6.103515625e-5\n"),
                Some("MiB\n"),
            )],
        );
        let pmu = SysfsPmu::open(dir.path(), "uncore_imc_0").unwrap();
        assert_eq!(pmu.type_, 14);
        assert_eq!(pmu.cpus, vec![0, 28]);
        assert!(pmu.has_event("cas_count_read"));
        let evt = pmu.resolve_event("cas_count_read").unwrap();
        assert_eq!(evt.attr.type_, 14);
        assert_eq!(evt.attr.config, 0x0304);
        assert_eq!(evt.unit.as_deref(), Some("MiB"));
        // One CAS transfers one 64 byte line.
        assert_eq!(evt.count_to_bytes(1000), Some(64_000));
    }

    #[test]
    fn test_bare_term_and_missing_event() {
        let dir = tempfile::tempdir().unwrap();
        fake_pmu(dir.path(), "cpu", 4, None, &[("edge_evt", "event=0x3c,edge", None, None)]);
        let pmu = SysfsPmu::open(dir.path(), "cpu").unwrap();
        assert!(pmu.cpus.is_empty());
        let evt = pmu.resolve_event("edge_evt").unwrap();
        assert_eq!(evt.attr.config, 0x3c | (1 << 18));
        assert_eq!(evt.scale, 1.0);
        assert_eq!(evt.count_to_bytes(5), None);
        assert!(matches!(
            pmu.resolve_event("nope"),
            Err(Error::EventNotFound(_, _))
        ));
        assert!(matches!(
            SysfsPmu::open(dir.path(), "uncore_imc_9"),
            Err(Error::PmuNotFound(_))
        ));
    }

    #[test]
    fn test_find_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in &["uncore_imc_2", "uncore_imc_0", "uncore_cha_0"] {
            fake_pmu(dir.path(), name, 20, Some("0"), &[]);
        }
        let pmus = SysfsPmu::find(dir.path(), "uncore_imc_*").unwrap();
        let names: Vec<&str> = pmus.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["uncore_imc_0", "uncore_imc_2"]);
    }
}
