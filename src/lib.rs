//! Per-core, per-socket and system wide hardware counters of Linux machines, exposed as a Rust
//! API and as a C interface.
//!
//! Counters are opened once through the kernel interfaces (perf events, uncore PMUs, powercap)
//! and snapshotted around a region of interest. The difference between the snapshots is turned
//! into flat records, with implausible values clamped and flagged.
//!
//! ```no_run
//! use pcm_monitor::{Config, Monitor};
//!
//! let mut monitor = Monitor::new(Config::from_env())?;
//! monitor.start_measurement()?;
//! // ... region of interest ...
//! monitor.stop_measurement()?;
//! let core = monitor.core_counters(0)?;
//! println!("IPC {:.2} at {:.2} GHz", core.ipc, core.frequency_ghz);
//! # Ok::<(), pcm_monitor::Error>(())
//! ```

#![deny(missing_docs, missing_debug_implementations)]

mod errors;
pub use errors::{Error, Result};

mod api;
pub use api::*;

pub mod config;
pub use config::{Config, CountingScope, LogLevel, Thresholds};

pub mod logging;

pub mod perf;
pub use perf::ffi;

pub mod pmu;

/// Architecture specific access to model specific registers and processor identification.
#[cfg(target_arch = "x86_64")]
#[path = "arch/x86_64/mod.rs"]
pub mod arch;

pub mod topology;
pub use topology::Topology;

pub mod energy;
pub mod uncore;

pub mod counters;
pub use counters::{CoreCounters, IoCounters, MemoryCounters, SystemCounters};

pub mod monitor;
pub use monitor::{is_available, Monitor, PcieSample, PcieSampler};

pub mod capi;

pub(crate) mod util;
