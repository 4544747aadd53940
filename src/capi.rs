//! C interface.
//!
//! A single process wide [`Monitor`] lives behind a mutex. Every function returns `0` on success
//! and `-1` on failure, after logging the cause. Output records are zeroed when a query fails.

use crate::config::{Config, LogLevel};
use crate::monitor::{self, Monitor};
use crate::{CoreCounters, Error, IoCounters, MemoryCounters, Result, SystemCounters};
use lazy_static::lazy_static;
use log::{error, info, warn};
use nix::libc::{c_char, c_int};
use std::sync::{Mutex, MutexGuard};

lazy_static! {
    static ref MONITOR: Mutex<Option<Monitor>> = Mutex::new(None);
}

fn lock() -> MutexGuard<'static, Option<Monitor>> {
    // A panic while holding the lock leaves the monitor itself consistent.
    MONITOR.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn with_monitor<T, F>(f: F) -> Result<T>
where
    F: FnOnce(&mut Monitor) -> Result<T>,
{
    let mut guard = lock();
    let monitor = guard.as_mut().ok_or(Error::NotInitialized)?;
    f(monitor)
}

fn status(op: &str, res: Result<()>) -> c_int {
    match res {
        Ok(()) => 0,
        Err(e) => {
            error!("{} failed - {}", op, e);
            -1
        }
    }
}

/// Write the result of `query` to `out`, or zeros when it fails.
unsafe fn write_record<T: Default>(
    op: &str,
    out: *mut T,
    query: impl FnOnce() -> Result<T>,
) -> c_int {
    if out.is_null() {
        return -1;
    }
    match query() {
        Ok(record) => {
            out.write(record);
            0
        }
        Err(e) => {
            out.write(T::default());
            error!("{} failed - {}", op, e);
            -1
        }
    }
}

/// Copy `s` into `buf` the way `snprintf` does: truncate, always NUL terminate.
fn copy_c_string(s: &str, buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    let len = s.len().min(buf.len() - 1);
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf[len] = 0;
}

/// Returns `1` when hardware counters can be used on this machine, `0` otherwise.
#[no_mangle]
pub extern "C" fn pcm_wrapper_is_available() -> c_int {
    monitor::is_available() as c_int
}

/// Open every counter. Reads `PCM_VERBOSE` for the initial verbosity.
#[no_mangle]
pub extern "C" fn pcm_wrapper_init() -> c_int {
    let mut guard = lock();
    if guard.is_some() {
        warn!("Already initialized");
        return 0;
    }
    let config = Config::from_env();
    crate::logging::init_logger(config.log_level);
    match Monitor::new(config) {
        Ok(m) => {
            *guard = Some(m);
            0
        }
        Err(e) => {
            error!("Initialization failed - {}", e);
            -1
        }
    }
}

/// Close every counter. Safe to call when not initialized.
#[no_mangle]
pub extern "C" fn pcm_wrapper_cleanup() {
    if lock().take().is_some() {
        info!("Cleanup completed");
    }
}

/// Set the verbosity, `0` (errors) to `3` (debug).
#[no_mangle]
pub extern "C" fn pcm_wrapper_set_log_level(level: c_int) {
    let level = match LogLevel::from_verbosity(i64::from(level)) {
        Some(l) => l,
        None => {
            warn!("Ignoring invalid log level {}", level);
            return;
        }
    };
    let mut guard = lock();
    match guard.as_mut() {
        Some(m) => m.set_log_level(level),
        None => crate::logging::set_log_level(level),
    }
}

/// Take the "before" snapshot.
#[no_mangle]
pub extern "C" fn pcm_wrapper_start_measurement() -> c_int {
    status("start_measurement", with_monitor(|m| m.start_measurement()))
}

/// Take the "after" snapshot.
#[no_mangle]
pub extern "C" fn pcm_wrapper_stop_measurement() -> c_int {
    status("stop_measurement", with_monitor(|m| m.stop_measurement().map(|_| ())))
}

/// Duration in seconds of the last completed measurement, `0` when there is none.
#[no_mangle]
pub extern "C" fn pcm_wrapper_get_measurement_duration() -> f64 {
    with_monitor(|m| Ok(m.measurement_duration().as_secs_f64())).unwrap_or(0.0)
}

/// Cycles and instructions of `core_id`.
///
/// # Safety
///
/// `cycles` and `instructions` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn pcm_wrapper_get_basic_counters(
    core_id: u32,
    cycles: *mut u64,
    instructions: *mut u64,
) -> c_int {
    if cycles.is_null() || instructions.is_null() {
        return -1;
    }
    match with_monitor(|m| m.basic_counters(core_id)) {
        Ok((c, i)) => {
            cycles.write(c);
            instructions.write(i);
            0
        }
        Err(e) => {
            error!("get_basic_counters failed - {}", e);
            -1
        }
    }
}

/// All counters of `core_id`. Indices past the last core wrap around.
///
/// # Safety
///
/// `counters` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn pcm_wrapper_get_core_counters(
    core_id: u32,
    counters: *mut CoreCounters,
) -> c_int {
    write_record("get_core_counters", counters, || {
        with_monitor(|m| m.core_counters(core_id))
    })
}

/// Memory traffic of `socket_id`.
///
/// # Safety
///
/// `counters` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn pcm_wrapper_get_memory_counters(
    socket_id: u32,
    counters: *mut MemoryCounters,
) -> c_int {
    write_record("get_memory_counters", counters, || {
        with_monitor(|m| m.memory_counters(socket_id))
    })
}

/// I/O counters of `socket_id`.
///
/// # Safety
///
/// `counters` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn pcm_wrapper_get_io_counters(
    socket_id: u32,
    counters: *mut IoCounters,
) -> c_int {
    write_record("get_io_counters", counters, || {
        with_monitor(|m| m.io_counters(socket_id))
    })
}

/// Machine wide counters.
///
/// # Safety
///
/// `counters` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn pcm_wrapper_get_system_counters(counters: *mut SystemCounters) -> c_int {
    write_record("get_system_counters", counters, || {
        with_monitor(|m| m.system_counters())
    })
}

/// Write a description of the machine to `info_buffer`, truncated to `buffer_size` bytes
/// including the terminating NUL.
///
/// # Safety
///
/// `info_buffer` must be null or valid for `buffer_size` bytes of writes.
#[no_mangle]
pub unsafe extern "C" fn pcm_wrapper_get_system_info(
    info_buffer: *mut c_char,
    buffer_size: usize,
) -> c_int {
    if info_buffer.is_null() {
        return -1;
    }
    match with_monitor(|m| Ok(m.system_info())) {
        Ok(info) => {
            let buf = std::slice::from_raw_parts_mut(info_buffer as *mut u8, buffer_size);
            copy_c_string(&info, buf);
            0
        }
        Err(e) => {
            error!("get_system_info failed - {}", e);
            -1
        }
    }
}

/// Returns `1` when PCIe traffic is measured by dedicated counters, `0` when estimated.
#[no_mangle]
pub extern "C" fn pcm_wrapper_has_pcie_counters() -> c_int {
    with_monitor(|m| Ok(m.has_pcie_counters() as c_int)).unwrap_or(0)
}

/// Sample the PCIe traffic of `socket_id`. Blocks for about a second without holding the
/// monitor, so other calls proceed meanwhile.
///
/// # Safety
///
/// `pcie_read_bytes` and `pcie_write_bytes` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn pcm_wrapper_get_instant_pcie_bytes(
    socket_id: u32,
    pcie_read_bytes: *mut u64,
    pcie_write_bytes: *mut u64,
) -> c_int {
    if pcie_read_bytes.is_null() || pcie_write_bytes.is_null() {
        return -1;
    }
    let sampler = with_monitor(|m| m.pcie_sampler(socket_id));
    match sampler.and_then(|s| s.sample()) {
        Ok(sample) => {
            pcie_read_bytes.write(sample.read_bytes);
            pcie_write_bytes.write(sample.write_bytes);
            0
        }
        Err(e) => {
            error!("PCIe sampling on socket {} failed - {}", socket_id, e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_copy_c_string_truncates() {
        let mut buf = [0xffu8; 8];
        copy_c_string("Sockets: 2\n", &mut buf);
        assert_eq!(&buf, b"Sockets\0");
        let mut buf = [0xffu8; 16];
        copy_c_string("CPU: x\n", &mut buf);
        assert_eq!(&buf[..8], b"CPU: x\n\0");
        let mut empty: [u8; 0] = [];
        copy_c_string("CPU", &mut empty);
    }

    #[test]
    fn test_null_pointers_rejected() {
        unsafe {
            let mut v = 0u64;
            assert_eq!(pcm_wrapper_get_basic_counters(0, std::ptr::null_mut(), &mut v), -1);
            assert_eq!(pcm_wrapper_get_basic_counters(0, &mut v, std::ptr::null_mut()), -1);
            assert_eq!(pcm_wrapper_get_core_counters(0, std::ptr::null_mut()), -1);
            assert_eq!(pcm_wrapper_get_memory_counters(0, std::ptr::null_mut()), -1);
            assert_eq!(pcm_wrapper_get_io_counters(0, std::ptr::null_mut()), -1);
            assert_eq!(pcm_wrapper_get_system_counters(std::ptr::null_mut()), -1);
            assert_eq!(pcm_wrapper_get_system_info(std::ptr::null_mut(), 64), -1);
            assert_eq!(
                pcm_wrapper_get_instant_pcie_bytes(0, std::ptr::null_mut(), &mut v),
                -1
            );
        }
    }

    #[test]
    fn test_uninitialized_calls_fail() {
        assert_eq!(pcm_wrapper_start_measurement(), -1);
        assert_eq!(pcm_wrapper_stop_measurement(), -1);
        assert_eq!(pcm_wrapper_get_measurement_duration(), 0.0);
        assert_eq!(pcm_wrapper_has_pcie_counters(), 0);
        let mut core = CoreCounters {
            cycles: 7,
            valid_ipc: true,
            ..CoreCounters::default()
        };
        assert_eq!(unsafe { pcm_wrapper_get_core_counters(0, &mut core) }, -1);
        assert_eq!(core, CoreCounters::default());
        let mut info = [0u8; 32];
        assert_eq!(
            unsafe { pcm_wrapper_get_system_info(info.as_mut_ptr() as *mut c_char, info.len()) },
            -1
        );
        // Cleanup without init is a no-op.
        pcm_wrapper_cleanup();
        pcm_wrapper_set_log_level(-4);
    }

    #[test]
    fn test_concurrent_calls() {
        let results: Vec<c_int> = (0..64u32)
            .into_par_iter()
            .map(|core| {
                let mut sys = SystemCounters::default();
                let (mut c, mut i) = (0u64, 0u64);
                unsafe {
                    pcm_wrapper_get_basic_counters(core, &mut c, &mut i)
                        + pcm_wrapper_get_system_counters(&mut sys)
                }
            })
            .collect();
        assert!(results.iter().all(|r| *r == -2));
    }

    #[test]
    #[ignore]
    fn test_live_lifecycle() {
        assert_eq!(pcm_wrapper_is_available(), 1);
        assert_eq!(pcm_wrapper_init(), 0);
        assert_eq!(pcm_wrapper_init(), 0);
        assert_eq!(pcm_wrapper_start_measurement(), 0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(pcm_wrapper_stop_measurement(), 0);
        assert!(pcm_wrapper_get_measurement_duration() >= 0.05);
        let mut core = CoreCounters::default();
        assert_eq!(unsafe { pcm_wrapper_get_core_counters(0, &mut core) }, 0);
        let mut info = [0 as c_char; 256];
        assert_eq!(
            unsafe { pcm_wrapper_get_system_info(info.as_mut_ptr(), info.len()) },
            0
        );
        pcm_wrapper_cleanup();
        assert_eq!(pcm_wrapper_start_measurement(), -1);
    }
}
