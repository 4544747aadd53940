//! Defines core API interfaces used by this crate to access performance counters.

use crate::Result;

/// A generic synchronous access performance counter.
///
/// Every source that contributes to a measurement snapshot implements this trait, whether it is
/// backed by perf events, powercap files or model specific registers.
pub trait Counter<V> {
    /// Name of the performance counter.
    fn name(&self) -> &str;

    /// Enable the counter.
    fn enable(&self) -> Result<()>;

    /// Disable the counter.
    fn disable(&self) -> Result<()>;

    /// Reset the counter.
    fn reset(&self) -> Result<()>;

    /// Read the latest value of the counter.
    fn read_sync(&self) -> Result<V>;
}

/// Defines a measured value that can be scaled to correct for measurement errors.
pub trait ScaledValue<V> {
    /// Get the raw measurement value.
    fn raw_value(&self) -> V;

    /// Get the scaled measurement value.
    fn scaled_value(&self) -> V;
}
