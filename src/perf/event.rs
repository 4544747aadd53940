//! Utilities for creating/opening perf events.

use crate::perf::ffi;
use crate::{Error, Result};
use byteorder::{NativeEndian, ReadBytesExt};
use log::debug;
use nix::libc;
use std::os::unix::io::{AsRawFd, FromRawFd};

/// A schedulable and readable performance counter.
pub struct PerfEvent {
    /// Attributes corresponding to this event.
    pub attr: ffi::perf_event_attr,
    /// File corresponding to the underlying perf event.
    pub file: std::fs::File,
}

impl std::fmt::Debug for PerfEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfEvent")
            .field("type", &self.attr.type_)
            .field("config", &format_args!("{:#x}", self.attr.config))
            .field("file", &self.file)
            .finish()
    }
}

impl PerfEvent {
    /// Construct a new perf event using the associated builder,
    pub fn build() -> PerfEventBuilder {
        PerfEventBuilder::default()
    }

    /// Enable counting for event.
    ///
    /// On a group leader this enables the whole group.
    pub fn enable(&self) -> Result<()> {
        unsafe {
            ffi::perf_event_ioc_enable(self.file.as_raw_fd())?;
        }
        Ok(())
    }

    /// Disable counting for event.
    pub fn disable(&self) -> Result<()> {
        unsafe {
            ffi::perf_event_ioc_disable(self.file.as_raw_fd())?;
        }
        Ok(())
    }

    /// Reset counting for event.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            ffi::perf_event_ioc_reset(self.file.as_raw_fd())?;
        }
        Ok(())
    }

    /// Read the raw bytes the kernel returns for this event's `read_format`.
    fn read_raw(&self, buf: &mut [u8]) -> Result<usize> {
        let n = nix::unistd::read(self.file.as_raw_fd(), buf)?;
        if n == 0 {
            return Err(Error::NoneError);
        }
        Ok(n)
    }

    /// Read a single (non-grouped) counter value.
    pub fn read_value(&self) -> Result<PerfEventValue> {
        let mut bytes = [0u8; 24];
        let n = self.read_raw(&mut bytes)?;
        let mut cursor = std::io::Cursor::new(&bytes[..n]);
        PerfEventValue::from_cursor(&mut cursor, self.attr.read_format)
    }
}

/// Scaled value of a counter read with enabled/running times.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerfEventValue {
    /// Counter measurement.
    pub value: u64,
    /// Total time spent enabled.
    pub time_enabled: u64,
    /// Total time spent running.
    ///
    /// In the case the of event multiplexing the `time_enabled` and `time running` values can be
    /// used to scale an estimated value for the count.
    pub time_running: u64,
}

impl PerfEventValue {
    /// Parse this structure from the serialized format provided by the kernel.
    pub fn from_cursor<T>(ptr: &mut std::io::Cursor<T>, read_format: u64) -> Result<Self>
    where
        std::io::Cursor<T>: byteorder::ReadBytesExt,
    {
        use ffi::perf_event_read_format::*;
        let value = ptr.read_u64::<NativeEndian>()?;
        let time_enabled = if read_format & PERF_FORMAT_TOTAL_TIME_ENABLED != 0 {
            ptr.read_u64::<NativeEndian>()?
        } else {
            0
        };
        let time_running = if read_format & PERF_FORMAT_TOTAL_TIME_RUNNING != 0 {
            ptr.read_u64::<NativeEndian>()?
        } else {
            0
        };
        Ok(PerfEventValue {
            value,
            time_enabled,
            time_running,
        })
    }
}

impl crate::ScaledValue<u64> for PerfEventValue {
    fn raw_value(&self) -> u64 {
        self.value
    }

    fn scaled_value(&self) -> u64 {
        scale_count(self.value, self.time_enabled, self.time_running)
    }
}

/// Extrapolate a multiplexed count to the full enabled time.
pub fn scale_count(value: u64, time_enabled: u64, time_running: u64) -> u64 {
    if time_running == 0 || time_running >= time_enabled {
        value
    } else {
        (value as f64 * time_enabled as f64 / time_running as f64) as u64
    }
}

/// A set of events scheduled onto the PMU together, read atomically through the leader.
#[derive(Debug)]
pub struct PerfGroup {
    /// Group leader followed by the members, in the order the attributes were supplied.
    events: Vec<PerfEvent>,
}

/// One atomic reading of a `PerfGroup`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupReading {
    /// Total time the group was enabled.
    pub time_enabled: u64,
    /// Total time the group was scheduled on the PMU.
    pub time_running: u64,
    /// Raw counts in group order.
    pub values: Vec<u64>,
}

impl GroupReading {
    /// Parse the `PERF_FORMAT_GROUP | TOTAL_TIME_ENABLED | TOTAL_TIME_RUNNING` layout.
    pub fn from_cursor<T>(ptr: &mut std::io::Cursor<T>) -> Result<Self>
    where
        std::io::Cursor<T>: byteorder::ReadBytesExt,
    {
        let nr = ptr.read_u64::<NativeEndian>()?;
        let time_enabled = ptr.read_u64::<NativeEndian>()?;
        let time_running = ptr.read_u64::<NativeEndian>()?;
        let values = (0..nr)
            .map(|_| ptr.read_u64::<NativeEndian>())
            .collect::<std::io::Result<Vec<u64>>>()?;
        Ok(GroupReading {
            time_enabled,
            time_running,
            values,
        })
    }

    /// Count of member `idx` extrapolated to the enabled time.
    pub fn scaled(&self, idx: usize) -> Option<u64> {
        self.values
            .get(idx)
            .map(|v| scale_count(*v, self.time_enabled, self.time_running))
    }
}

impl PerfGroup {
    /// Number of events in the group.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the group holds no event.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Group leader.
    pub fn leader(&self) -> Option<&PerfEvent> {
        self.events.first()
    }

    /// Enable all events of the group.
    pub fn enable(&self) -> Result<()> {
        self.leader().ok_or(Error::NoneError)?.enable()
    }

    /// Disable all events of the group.
    pub fn disable(&self) -> Result<()> {
        self.leader().ok_or(Error::NoneError)?.disable()
    }

    /// Reset all events of the group.
    pub fn reset(&self) -> Result<()> {
        for evt in &self.events {
            evt.reset()?;
        }
        Ok(())
    }

    /// Read all counters of the group at once.
    pub fn read(&self) -> Result<GroupReading> {
        let leader = self.leader().ok_or(Error::NoneError)?;
        let mut buf = vec![0u8; 8 * (3 + self.events.len())];
        let n = leader.read_raw(&mut buf)?;
        let mut cursor = std::io::Cursor::new(&buf[..n]);
        GroupReading::from_cursor(&mut cursor)
    }
}

/// Helper struct to build a `PerfEvent` object.
#[derive(Debug, Clone)]
pub struct PerfEventBuilder {
    /// Target process ID.
    ///
    /// Defaults to current process.
    pid: libc::pid_t,
    /// Target CPU ID.
    ///
    /// Defaults to all CPUs.
    cpuid: libc::c_int,
    /// File descriptor for the group leader event.
    ///
    /// Defaults to none.
    leader: libc::c_int,
    /// Count events of child tasks.
    ///
    /// Defaults to `false`.
    inherit: bool,
    /// Should start the counter disabled.
    ///
    /// Defaults to  `false`.
    start_disabled: bool,
    /// Count for kernel code.
    ///
    /// Defaults to `false`.
    collect_kernel: bool,
    /// Leave every `exclude_*` bit cleared. Uncore PMUs reject events that set any of them.
    ///
    /// Defaults to `false`.
    all_modes: bool,
}

impl Default for PerfEventBuilder {
    fn default() -> Self {
        PerfEventBuilder {
            pid: 0,
            cpuid: -1,
            leader: -1,
            inherit: false,
            start_disabled: false,
            collect_kernel: false,
            all_modes: false,
        }
    }
}

macro_rules! builder_pattern {
    ($(#[$outer:meta])* $var_name: ident : $var_type: ty) => {
        builder_pattern!($(#[$outer])* $var_name => $var_name: $var_type);
    };
    ($(#[$outer:meta])* $name: ident => $var_name: ident : $var_type: ty) => {
        $(#[$outer])*
        pub fn $name(mut self, $var_name: $var_type) -> Self {
            self.$var_name = $var_name;
            self
        }
    };
}

macro_rules! builder_pattern_bool {
    ($(#[$outer:meta])* $var_name: ident) => {
        builder_pattern_bool!($(#[$outer])* $var_name => $var_name);
    };
    ($(#[$outer:meta])* $name: ident => $var_name: ident) => {
        $(#[$outer])*
        pub fn $name(mut self) -> Self {
            self.$var_name = true;
            self
        }
    };
}

impl PerfEventBuilder {
    /// Check the configuration of the current builder against what the kernel accepts.
    fn _check_capabilities(&self) -> Result<()> {
        if (self.cpuid == -1 && self.inherit) || (self.cpuid == -1 && self.pid == -1) {
            Err(Error::PerfNotCapable)
        } else {
            Ok(())
        }
    }

    /// Set the fields of an perf_event_attr based on this builder.
    fn _set_attr_config(&self, attr: &mut ffi::perf_event_attr, read_format: u64) {
        attr.size = std::mem::size_of::<ffi::perf_event_attr>() as u32;
        attr.read_format = read_format;
        // Only the leader carries the disabled bit, members follow the leader.
        if self.start_disabled && self.leader == -1 {
            attr.set_disabled(1);
        }
        if self.inherit {
            attr.set_inherit(1);
        }
        if self.all_modes {
            return;
        }
        attr.set_exclude_guest(1);
        attr.set_exclude_hv(1);
        if !self.collect_kernel {
            attr.set_exclude_kernel(1);
        }
    }

    /// Internal implementation of open so as to not consume self.
    fn _open(&self, mut attr: ffi::perf_event_attr, read_format: u64) -> Result<PerfEvent> {
        self._check_capabilities()?;
        self._set_attr_config(&mut attr, read_format);

        let fd = ffi::perf_event_open(
            &attr,
            self.pid,
            self.cpuid,
            self.leader,
            ffi::PERF_FLAG_FD_CLOEXEC,
        )?;
        debug!(
            "Opened perf event type={} config={:#x} pid={} cpu={} fd={}",
            attr.type_, attr.config, self.pid, self.cpuid, fd
        );

        Ok(PerfEvent {
            attr,
            file: unsafe { std::fs::File::from_raw_fd(fd) },
        })
    }

    /// Generate the `PerfEvent` from this builder.
    pub fn open(&self, attr: ffi::perf_event_attr) -> Result<PerfEvent> {
        use ffi::perf_event_read_format::*;
        self._open(
            attr,
            PERF_FORMAT_TOTAL_TIME_ENABLED | PERF_FORMAT_TOTAL_TIME_RUNNING,
        )
    }

    /// Generate a group of perf events from this builder.
    ///
    /// The first element of `attrs` becomes the group leader.
    pub fn open_group(mut self, attrs: &[ffi::perf_event_attr]) -> Result<PerfGroup> {
        use ffi::perf_event_read_format::*;
        let read_format =
            PERF_FORMAT_GROUP | PERF_FORMAT_TOTAL_TIME_ENABLED | PERF_FORMAT_TOTAL_TIME_RUNNING;
        let (first, rest) = attrs.split_first().ok_or(Error::NoneError)?;
        // Create leader first
        self.leader = -1;
        let leader = self._open(*first, read_format)?;
        // Create group using leader's fd
        self.leader = leader.file.as_raw_fd();
        let mut events = Vec::with_capacity(attrs.len());
        events.push(leader);
        for attr in rest {
            events.push(self._open(*attr, read_format)?);
        }
        Ok(PerfGroup { events })
    }

    builder_pattern!(
        /// Set process to be monitored.
        ///
        /// Set `0` for current process and `-1` for whole system.
        pid: libc::pid_t
    );

    builder_pattern!(
        /// Set CPU to be monitored.
        ///
        /// Set `-1` for whole system.
        cpuid: libc::c_int
    );

    builder_pattern_bool!(
        /// Turns on kernel measurements.
        collect_kernel
    );

    builder_pattern_bool!(
        /// Inherit to children processes.
        inherit
    );

    builder_pattern_bool!(
        /// Count in every privilege level, as required by uncore PMUs.
        all_modes
    );

    builder_pattern_bool!(
        /// Start the counter disabled.
        start_disabled
    );
}
