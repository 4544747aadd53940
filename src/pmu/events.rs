//! Event tables: the core events counted on every CPU and the IMC aliases of the uncore PMUs.

use crate::perf::ffi::{self, perf_event_attr, perf_hw_id::*, perf_type_id::*};

/// A core PMU event programmed on every logical CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreEvent {
    /// Name used in log messages.
    pub name: &'static str,
    /// `perf_event_attr::type_`.
    pub type_: u32,
    /// `perf_event_attr::config`.
    pub config: u64,
}

impl CoreEvent {
    /// Attributes for counting this event.
    pub fn attr(&self) -> perf_event_attr {
        ffi::counting_attr(self.type_, self.config)
    }
}

/// Encode an Intel core event select/umask pair into a raw config word.
pub const fn raw_config(event: u64, umask: u64) -> u64 {
    (umask << 8) | event
}

/// Encode a `PERF_TYPE_HW_CACHE` config word.
const fn hw_cache_config(cache: u64, op: u64, result: u64) -> u64 {
    cache | (op << 8) | (result << 16)
}

const PERF_COUNT_HW_CACHE_LL: u64 = 2;
const PERF_COUNT_HW_CACHE_OP_READ: u64 = 0;
const PERF_COUNT_HW_CACHE_RESULT_ACCESS: u64 = 0;
const PERF_COUNT_HW_CACHE_RESULT_MISS: u64 = 1;

/// Cycles, instructions retired and reference cycles, in group order.
///
/// Cycles lead the group so that a failing reference cycles counter (common on VMs) can be
/// dropped without losing the others.
pub const BASIC_EVENTS: [CoreEvent; 3] = [
    CoreEvent {
        name: "cycles",
        type_: PERF_TYPE_HARDWARE,
        config: PERF_COUNT_HW_CPU_CYCLES,
    },
    CoreEvent {
        name: "instructions",
        type_: PERF_TYPE_HARDWARE,
        config: PERF_COUNT_HW_INSTRUCTIONS,
    },
    CoreEvent {
        name: "ref-cycles",
        type_: PERF_TYPE_HARDWARE,
        config: PERF_COUNT_HW_REF_CPU_CYCLES,
    },
];

/// Source of the L2/L3 hit and miss counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventSet {
    /// `MEM_LOAD_RETIRED.{L2_HIT,L2_MISS,L3_HIT,L3_MISS}` (event `0xD1`), Intel cores since
    /// Haswell.
    IntelMemLoadRetired,
    /// Generic last level cache read accesses and misses. No L2 data.
    GenericLastLevel,
}

impl CacheEventSet {
    /// Pick the richest event set for a processor identified by `cpu_string`.
    pub fn for_cpu(cpu_string: &str) -> Self {
        if cpu_string.starts_with("GenuineIntel") {
            CacheEventSet::IntelMemLoadRetired
        } else {
            CacheEventSet::GenericLastLevel
        }
    }

    /// Events of this set, in group order.
    pub fn events(self) -> &'static [CoreEvent] {
        match self {
            CacheEventSet::IntelMemLoadRetired => &INTEL_CACHE_EVENTS,
            CacheEventSet::GenericLastLevel => &GENERIC_CACHE_EVENTS,
        }
    }

    /// Convert the group values into `(l2_hits, l2_misses, l3_hits, l3_misses)`.
    pub fn decode(self, values: &[u64]) -> Option<(u64, u64, u64, u64)> {
        match self {
            CacheEventSet::IntelMemLoadRetired => match values {
                [l2h, l2m, l3h, l3m] => Some((*l2h, *l2m, *l3h, *l3m)),
                _ => None,
            },
            CacheEventSet::GenericLastLevel => match values {
                [access, miss] => Some((0, 0, access.saturating_sub(*miss), *miss)),
                _ => None,
            },
        }
    }

    /// Whether this set provides L2 counts.
    pub fn has_l2(self) -> bool {
        self == CacheEventSet::IntelMemLoadRetired
    }
}

const INTEL_CACHE_EVENTS: [CoreEvent; 4] = [
    CoreEvent {
        name: "MEM_LOAD_RETIRED.L2_HIT",
        type_: PERF_TYPE_RAW,
        config: raw_config(0xD1, 0x02),
    },
    CoreEvent {
        name: "MEM_LOAD_RETIRED.L2_MISS",
        type_: PERF_TYPE_RAW,
        config: raw_config(0xD1, 0x10),
    },
    CoreEvent {
        name: "MEM_LOAD_RETIRED.L3_HIT",
        type_: PERF_TYPE_RAW,
        config: raw_config(0xD1, 0x04),
    },
    CoreEvent {
        name: "MEM_LOAD_RETIRED.L3_MISS",
        type_: PERF_TYPE_RAW,
        config: raw_config(0xD1, 0x20),
    },
];

const GENERIC_CACHE_EVENTS: [CoreEvent; 2] = [
    CoreEvent {
        name: "LLC-loads",
        type_: PERF_TYPE_HW_CACHE,
        config: hw_cache_config(
            PERF_COUNT_HW_CACHE_LL,
            PERF_COUNT_HW_CACHE_OP_READ,
            PERF_COUNT_HW_CACHE_RESULT_ACCESS,
        ),
    },
    CoreEvent {
        name: "LLC-load-misses",
        type_: PERF_TYPE_HW_CACHE,
        config: hw_cache_config(
            PERF_COUNT_HW_CACHE_LL,
            PERF_COUNT_HW_CACHE_OP_READ,
            PERF_COUNT_HW_CACHE_RESULT_MISS,
        ),
    },
];

/// Read/write event aliases of memory controller PMUs, server parts first.
///
/// Client parts name their free running counters `data_reads` up to Skylake and `data_read`
/// from Ice Lake on.
pub const IMC_EVENT_PAIRS: [(&str, &str); 3] = [
    ("cas_count_read", "cas_count_write"),
    ("data_reads", "data_writes"),
    ("data_read", "data_write"),
];
