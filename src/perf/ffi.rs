//! Kernel interfaces for `perf_event_open(2)`.

#![allow(
    missing_docs,
    missing_debug_implementations,
    non_upper_case_globals,
    non_camel_case_types
)]

use crate::{Error, Result};
use nix::libc;
use nix::ioctl_none;

pub use perf_event_open_sys::bindings::perf_event_attr;

/// Values of `perf_event_attr::type_`.
pub mod perf_type_id {
    pub const PERF_TYPE_HARDWARE: u32 = 0;
    pub const PERF_TYPE_SOFTWARE: u32 = 1;
    pub const PERF_TYPE_TRACEPOINT: u32 = 2;
    pub const PERF_TYPE_HW_CACHE: u32 = 3;
    pub const PERF_TYPE_RAW: u32 = 4;
}

/// Generic hardware events for `PERF_TYPE_HARDWARE`.
pub mod perf_hw_id {
    pub const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
    pub const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
    pub const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
    pub const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
    pub const PERF_COUNT_HW_REF_CPU_CYCLES: u64 = 9;
}

/// Generic software events for `PERF_TYPE_SOFTWARE`.
pub mod perf_sw_ids {
    pub const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;
    pub const PERF_COUNT_SW_TASK_CLOCK: u64 = 1;
}

/// Layout selectors for values read from a perf file descriptor.
pub mod perf_event_read_format {
    pub const PERF_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
    pub const PERF_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;
    pub const PERF_FORMAT_ID: u64 = 1 << 2;
    pub const PERF_FORMAT_GROUP: u64 = 1 << 3;
}

pub const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 1 << 3;

// The Ioctls are defined as macro functions in the uapi header.
// Details at https://elixir.bootlin.com/linux/v5.3.10/source/include/uapi/linux/perf_event.h#L456
ioctl_none!(perf_event_ioc_enable, b'$', 0);
ioctl_none!(perf_event_ioc_disable, b'$', 1);
ioctl_none!(perf_event_ioc_reset, b'$', 3);

/// Rust wrapper for the `perf_event_open` system call.
pub fn perf_event_open(
    attr: &perf_event_attr,
    pid: libc::pid_t,
    cpu: libc::c_int,
    group_fd: libc::c_int,
    flags: libc::c_ulong,
) -> Result<std::os::unix::io::RawFd> {
    unsafe {
        let fd = libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const _,
            pid,
            cpu,
            group_fd,
            flags,
        );
        match fd {
            -1 => Err(Error::from_errno()),
            rc => Ok(rc as _),
        }
    }
}

/// Construct a counting (non-sampled) attribute for an event.
pub fn counting_attr(type_: u32, config: u64) -> perf_event_attr {
    let mut attr = perf_event_attr::default();
    attr.type_ = type_;
    attr.config = config;
    attr.size = std::mem::size_of::<perf_event_attr>() as u32;
    attr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_attr() {
        let attr = counting_attr(perf_type_id::PERF_TYPE_RAW, 0x02d1);
        assert_eq!(attr.type_, perf_type_id::PERF_TYPE_RAW);
        assert_eq!(attr.config, 0x02d1);
        assert_eq!(attr.size as usize, std::mem::size_of::<perf_event_attr>());
        assert_eq!(attr.read_format, 0);
    }

    #[test]
    fn test_open_invalid_type_fails() {
        let attr = counting_attr(u32::max_value() - 1, 0);
        assert!(perf_event_open(&attr, 0, -1, -1, PERF_FLAG_FD_CLOEXEC).is_err());
    }
}
