//! Interfaces that deal with the kernel perf subsystem.

pub mod ffi;

mod event;
pub use event::{scale_count, GroupReading, PerfEvent, PerfEventBuilder, PerfEventValue, PerfGroup};

/// Check if the kernel exposes the perf subsystem at all.
pub fn perf_supported(sysfs_root: &std::path::Path) -> bool {
    sysfs_root.join("bus/event_source/devices/cpu").exists()
        || sysfs_root.join("bus/event_source/devices/cpu_core").exists()
        || std::path::Path::new("/proc/sys/kernel/perf_event_paranoid").exists()
}

/// Read the current `perf_event_paranoid` level.
pub fn paranoid_level() -> crate::Result<i32> {
    let data = std::fs::read_to_string("/proc/sys/kernel/perf_event_paranoid")?;
    Ok(data.trim().parse::<i32>()?)
}
